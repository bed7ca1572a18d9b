use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::categories::{
    CategoryPageAction, CategoryRunStats, LangCategory, TemplateAliases, move_members,
    move_or_redirect_category_page,
};
use crate::editor::{Confirm, Editor};
use crate::site::{CATEGORY_PREFIX, WikiSite};

const CODE_COLUMN: usize = 1;
const NAME_COLUMN: usize = 2;

/// Language codes and canonical names, read from the `;`-separated language
/// list whose first row holds column headings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LanguageTable {
    code_to_name: BTreeMap<String, String>,
    name_to_code: BTreeMap<String, String>,
}

impl LanguageTable {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut table = Self::default();
        for (index, line) in content.lines().enumerate().skip(1) {
            if line.trim().is_empty() {
                continue;
            }
            let columns: Vec<&str> = line.split(';').map(unquote).collect();
            let (Some(code), Some(name)) = (columns.get(CODE_COLUMN), columns.get(NAME_COLUMN))
            else {
                bail!("line {} has fewer than {} columns", index + 1, NAME_COLUMN + 1);
            };
            table.insert(code, name);
        }
        Ok(table)
    }

    pub fn insert(&mut self, code: &str, name: &str) {
        self.code_to_name.insert(code.to_string(), name.to_string());
        self.name_to_code.insert(name.to_string(), code.to_string());
    }

    pub fn name_of(&self, code: &str) -> Option<&str> {
        self.code_to_name.get(code).map(String::as_str)
    }

    pub fn code_of(&self, name: &str) -> Option<&str> {
        self.name_to_code.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.code_to_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code_to_name.is_empty()
    }
}

fn unquote(field: &str) -> &str {
    let field = field.trim();
    field
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(field)
}

/// The umbrella category over every language's version of `base_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentCategory {
    pub base_name: String,
    pub topic: bool,
}

impl ParentCategory {
    pub fn new(base_name: impl Into<String>, topic: bool) -> Self {
        Self {
            base_name: base_name.into(),
            topic,
        }
    }

    pub fn full_name(&self) -> String {
        parent_full_name(&self.base_name, self.topic)
    }

    pub fn title(&self) -> String {
        format!("{CATEGORY_PREFIX}{}", self.full_name())
    }

    /// Works out which language a subcategory title belongs to.
    pub fn infer_language(&self, subcategory: &str, languages: &LanguageTable) -> Option<LangCategory> {
        let name = subcategory
            .strip_prefix(CATEGORY_PREFIX)
            .unwrap_or(subcategory);
        let (code, lang_name) = if self.topic {
            let (code, _) = name.split_once(':')?;
            (code.to_string(), languages.name_of(code)?.to_string())
        } else {
            let lang_name = name.strip_suffix(self.base_name.as_str())?.trim();
            (languages.code_of(lang_name)?.to_string(), lang_name.to_string())
        };
        Some(LangCategory::new(&self.base_name, code, lang_name, self.topic))
    }
}

/// `2-syllable words` becomes `2-syllable words by language`; topic parents
/// keep their base name.
pub fn parent_full_name(base_name: &str, topic: bool) -> String {
    if topic {
        base_name.to_string()
    } else {
        format!("{} by language", capitalize(base_name))
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone)]
pub struct TreeMoveRequest {
    pub source: ParentCategory,
    pub destination_base: String,
    pub destination_topic: bool,
    /// Move or redirect the parent category page first.
    pub move_parent_page: bool,
    pub summary: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeMoveReport {
    pub actions: usize,
    pub subcategories: usize,
    pub unknown_languages: Vec<String>,
    pub pages: Vec<(String, CategoryPageAction)>,
    pub members: CategoryRunStats,
    /// The limit ran out before the tree was finished.
    pub limit_reached: bool,
}

/// Renames a whole category tree language by language: every member of every
/// subcategory is transferred, then the subcategory page is moved or
/// redirected. Page moves and member edits all count toward the limit.
pub fn move_category_tree<S, P>(
    site: &mut S,
    editor: &mut Editor<P>,
    languages: &LanguageTable,
    aliases: &TemplateAliases,
    request: &TreeMoveRequest,
) -> Result<TreeMoveReport>
where
    S: WikiSite + ?Sized,
    P: Confirm,
{
    let mut report = TreeMoveReport::default();
    let reached = |actions: usize| request.limit.is_some_and(|limit| actions >= limit);

    if request.move_parent_page && !reached(report.actions) {
        let destination = parent_full_name(&request.destination_base, request.destination_topic);
        let action = move_or_redirect_category_page(
            site,
            editor,
            &request.source.full_name(),
            &destination,
            &request.summary,
        )?;
        report.pages.push((request.source.title(), action));
        report.actions += 1;
    }

    let subcategories = site
        .subcategories(&request.source.title())
        .with_context(|| format!("failed to list subcategories of {}", request.source.title()))?;
    for subcategory in subcategories {
        if reached(report.actions) {
            break;
        }
        let Some(source) = request.source.infer_language(&subcategory, languages) else {
            println!("Warning: Unable to work out the language of [[{subcategory}]]; skipping it.");
            warn!(subcategory = subcategory.as_str(), "unknown subcategory language");
            report.unknown_languages.push(subcategory);
            continue;
        };
        report.subcategories += 1;
        let destination = source.with_base(&request.destination_base, request.destination_topic);

        let remaining = request.limit.map(|limit| limit.saturating_sub(report.actions));
        let stats = move_members(
            site,
            editor,
            &source,
            &destination,
            aliases,
            &request.summary,
            remaining,
        )?;
        report.actions += stats.changed;
        report.members.absorb(stats);
        if reached(report.actions) {
            println!(
                "Note: Leaving [[{}]] in place because the limit was reached.",
                source.title()
            );
            break;
        }

        let action = move_or_redirect_category_page(
            site,
            editor,
            &source.full_name(),
            &destination.full_name(),
            &request.summary,
        )?;
        report.pages.push((source.title(), action));
        report.actions += 1;
    }

    report.limit_reached = reached(report.actions);
    info!(
        parent = request.source.full_name().as_str(),
        actions = report.actions,
        subcategories = report.subcategories,
        "category tree move finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{
        LanguageTable, ParentCategory, TreeMoveRequest, move_category_tree, parent_full_name,
    };
    use crate::categories::{CategoryPageAction, TemplateAliases};
    use crate::editor::{Editor, EditorOptions};
    use crate::test_support::{MemorySite, ScriptedPrompt};

    const LANGUAGES: &str = "line;code;canonical name;category\n1;en;English;English language\n2;fr;French;French language\n3;zh;Chinese;Chinese language\n";

    #[test]
    fn language_table_skips_header() {
        let table = LanguageTable::parse(LANGUAGES).expect("parse");
        assert_eq!(table.len(), 3);
        assert_eq!(table.name_of("fr"), Some("French"));
        assert_eq!(table.code_of("Chinese"), Some("zh"));
        assert_eq!(table.name_of("code"), None);
    }

    #[test]
    fn language_table_loads_from_file() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("languages.csv");
        fs::write(&path, "a;b;c\n1;\"de\";\"German\"\n").expect("write");
        let table = LanguageTable::load(&path).expect("load");
        assert_eq!(table.name_of("de"), Some("German"));
    }

    #[test]
    fn short_rows_are_rejected() {
        assert!(LanguageTable::parse("header\nonly;one\n").is_err());
    }

    #[test]
    fn parent_names_follow_scheme() {
        assert_eq!(parent_full_name("2-syllable words", false), "2-syllable words by language");
        assert_eq!(parent_full_name("nouns", false), "Nouns by language");
        assert_eq!(parent_full_name("Philosophy", true), "Philosophy");
    }

    #[test]
    fn languages_are_inferred_from_subcategory_titles() {
        let table = LanguageTable::parse(LANGUAGES).expect("parse");
        let langname = ParentCategory::new("2-syllable words", false);
        let english = langname
            .infer_language("Category:English 2-syllable words", &table)
            .expect("english");
        assert_eq!(english.lang_code, "en");
        assert_eq!(english.full_name(), "English 2-syllable words");
        assert!(langname.infer_language("Category:Klingon 2-syllable words", &table).is_none());

        let topic = ParentCategory::new("Philosophy", true);
        let chinese = topic
            .infer_language("Category:zh:Philosophy", &table)
            .expect("chinese");
        assert_eq!(chinese.lang_name, "Chinese");
    }

    #[test]
    fn tree_move_transfers_members_and_moves_pages() {
        let mut site = MemorySite::default();
        let parent = "Category:2-syllable words by language";
        site.insert(parent, "{{auto cat}}");
        site.insert("Category:English 2-syllable words", "{{auto cat}}");
        site.insert("Category:French 2-syllable words", "{{auto cat}}");
        site.insert("Category:French 3-syllable words", "{{auto cat}}");
        site.add_subcategory(parent, "Category:English 2-syllable words");
        site.add_subcategory(parent, "Category:French 2-syllable words");
        site.add_subcategory(parent, "Category:Klingon 2-syllable words");
        site.insert("dog", "==English==\n# a dog\n{{cln|en|2-syllable words}}\n");
        site.add_member("Category:English 2-syllable words", "dog");
        site.insert("chien", "==French==\n# un chien\n[[Category:French 2-syllable words|chien]]\n");
        site.add_member("Category:French 2-syllable words", "chien");

        let table = LanguageTable::parse(LANGUAGES).expect("parse");
        let mut editor = Editor::new(EditorOptions::default(), ScriptedPrompt::no());
        let request = TreeMoveRequest {
            source: ParentCategory::new("2-syllable words", false),
            destination_base: "3-syllable words".to_string(),
            destination_topic: false,
            move_parent_page: true,
            summary: "rename tree".to_string(),
            limit: None,
        };
        let report = move_category_tree(
            &mut site,
            &mut editor,
            &table,
            &TemplateAliases::default(),
            &request,
        )
        .expect("tree move");

        assert_eq!(report.subcategories, 2);
        assert_eq!(report.unknown_languages, vec!["Category:Klingon 2-syllable words"]);
        assert_eq!(report.members.changed, 2);
        assert!(site.text("Category:3-syllable words by language").is_some());
        assert_eq!(
            site.text("dog"),
            Some("==English==\n# a dog\n{{cln|en|3-syllable words}}\n")
        );
        assert_eq!(
            site.text("chien"),
            Some("==French==\n# un chien\n{{cln|fr|3-syllable words|sort=chien}}\n")
        );
        assert_eq!(
            report.pages,
            vec![
                (
                    "Category:2-syllable words by language".to_string(),
                    CategoryPageAction::Moved
                ),
                (
                    "Category:English 2-syllable words".to_string(),
                    CategoryPageAction::Moved
                ),
                (
                    "Category:French 2-syllable words".to_string(),
                    CategoryPageAction::Redirected
                ),
            ]
        );
    }

    #[test]
    fn tree_move_stops_at_limit() {
        let mut site = MemorySite::default();
        let parent = "Category:Philosophy";
        site.insert("Category:en:Philosophy", "{{auto cat}}");
        site.insert("Category:fr:Philosophy", "{{auto cat}}");
        site.add_subcategory(parent, "Category:en:Philosophy");
        site.add_subcategory(parent, "Category:fr:Philosophy");
        for (title, code, lang) in [("idea", "en", "English"), ("idée", "fr", "French")] {
            site.insert(title, &format!("=={lang}==\n{{{{c|{code}|Philosophy}}}}\n"));
            site.add_member(&format!("Category:{code}:Philosophy"), title);
        }

        let table = LanguageTable::parse(LANGUAGES).expect("parse");
        let mut editor = Editor::new(EditorOptions::default(), ScriptedPrompt::no());
        let request = TreeMoveRequest {
            source: ParentCategory::new("Philosophy", true),
            destination_base: "Thought".to_string(),
            destination_topic: true,
            move_parent_page: false,
            summary: "rename".to_string(),
            limit: Some(1),
        };
        let report = move_category_tree(
            &mut site,
            &mut editor,
            &table,
            &TemplateAliases::default(),
            &request,
        )
        .expect("tree move");

        assert_eq!(report.subcategories, 1);
        assert_eq!(report.actions, 1);
        assert!(report.limit_reached);
        assert_eq!(site.text("idea"), Some("==English==\n{{c|en|Thought}}\n"));
        assert_eq!(site.text("idée"), Some("==French==\n{{c|fr|Philosophy}}\n"));
        assert!(report.pages.is_empty());
        assert!(site.moves.is_empty());
        assert_eq!(site.text("Category:en:Philosophy"), Some("{{auto cat}}"));
        assert!(site.text("Category:en:Thought").is_none());
    }
}
