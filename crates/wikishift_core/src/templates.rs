use anyhow::{Context, Result};
use tracing::info;

use crate::editor::{Confirm, Editor};
use crate::page::Page;
use crate::site::{WikiSite, with_category_prefix};
use crate::wikitext::{Document, normalize_template_name};

const PROGRESS_INTERVAL: usize = 100;

/// Where the pages to scan come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSource {
    Category(String),
    /// Every lemma and non-lemma form of a language.
    Language(String),
}

impl PageSource {
    pub fn category_titles(&self) -> Vec<String> {
        match self {
            Self::Category(name) => vec![with_category_prefix(name)],
            Self::Language(lang) => vec![
                with_category_prefix(&format!("{lang} lemmas")),
                with_category_prefix(&format!("{lang} non-lemma forms")),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemplateRenameRequest {
    pub old_name: String,
    pub new_name: String,
    pub source: PageSource,
    pub summary: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenameStats {
    pub scanned: usize,
    pub changed: usize,
    pub invocations: usize,
}

/// Renames every invocation of `old_name` in `document`, keeping arguments
/// and the whitespace around the name. Returns the number renamed.
pub fn rename_template_in(document: &mut Document, old_name: &str, new_name: &str) -> usize {
    let wanted = normalize_template_name(old_name);
    let mut ranges: Vec<_> = document
        .templates()
        .into_iter()
        .filter(|template| template.normal_name() == wanted)
        .map(|template| {
            let raw = &document.as_str()[template.name_span.clone()];
            let leading = raw.len() - raw.trim_start().len();
            let trailing = raw.len() - raw.trim_end().len();
            template.name_span.start + leading..template.name_span.end - trailing
        })
        .collect();
    ranges.sort_by(|left, right| right.start.cmp(&left.start));
    let count = ranges.len();
    for range in ranges {
        document.splice(range, new_name);
    }
    count
}

pub fn rename_template<S, P>(
    site: &mut S,
    editor: &mut Editor<P>,
    request: &TemplateRenameRequest,
) -> Result<RenameStats>
where
    S: WikiSite + ?Sized,
    P: Confirm,
{
    let mut titles = Vec::new();
    for category in request.source.category_titles() {
        if !site.exists(&category)? {
            println!("Warning: {category} does not exist, so it is unlikely to contain entries.");
        }
        titles.extend(
            site.category_members(&category)
                .with_context(|| format!("failed to list members of {category}"))?,
        );
    }

    let mut stats = RenameStats::default();
    for title in titles {
        if request.limit.is_some_and(|limit| stats.changed >= limit) {
            break;
        }
        if stats.scanned % PROGRESS_INTERVAL == 0 {
            println!("{}", stats.scanned);
        }
        stats.scanned += 1;

        let mut page = Page::load(site, &title)?;
        let mut document = Document::parse(page.baseline());
        let renamed = rename_template_in(&mut document, &request.old_name, &request.new_name);
        if renamed == 0 {
            continue;
        }
        let new_text = document.into_text();
        if editor
            .edit(site, &mut page, &new_text, &request.summary, true)?
            .is_applied()
        {
            stats.changed += 1;
            stats.invocations += renamed;
        }
    }
    info!(
        old = request.old_name.as_str(),
        new = request.new_name.as_str(),
        scanned = stats.scanned,
        changed = stats.changed,
        "template rename finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::{PageSource, TemplateRenameRequest, rename_template, rename_template_in};
    use crate::editor::{Editor, EditorOptions};
    use crate::test_support::{MemorySite, ScriptedPrompt};
    use crate::wikitext::Document;

    #[test]
    fn renames_by_normal_name_and_keeps_layout() {
        let mut document = Document::parse(
            "{{ quote-book |en|year=1900}} {{Template:quote_book|fr}} {{quote-web|en}}",
        );
        let count = rename_template_in(&mut document, "quote book", "quote-text");
        assert_eq!(count, 1);

        let mut document = Document::parse(
            "{{ quote-book |en|year=1900}} {{Template:quote-book|fr}} {{quote-web|en}}",
        );
        let count = rename_template_in(&mut document, "quote-book", "quote-text");
        assert_eq!(count, 2);
        assert_eq!(
            document.as_str(),
            "{{ quote-text |en|year=1900}} {{quote-text|fr}} {{quote-web|en}}"
        );
    }

    #[test]
    fn nested_invocations_are_renamed() {
        let mut document = Document::parse("{{old|{{old|x}}}}");
        assert_eq!(rename_template_in(&mut document, "old", "new"), 2);
        assert_eq!(document.as_str(), "{{new|{{new|x}}}}");
    }

    #[test]
    fn language_source_scans_lemmas_and_forms() {
        assert_eq!(
            PageSource::Language("Latin".to_string()).category_titles(),
            vec!["Category:Latin lemmas", "Category:Latin non-lemma forms"]
        );
    }

    #[test]
    fn rename_saves_only_pages_with_invocations() {
        let mut site = MemorySite::default();
        site.insert("Category:Latin lemmas", "");
        site.insert("amo", "{{la-verb|amo}}");
        site.insert("amor", "{{la-noun|amor}}");
        site.insert("amas", "{{la-verb form|amo}}");
        site.add_member("Category:Latin lemmas", "amo");
        site.add_member("Category:Latin lemmas", "amor");
        site.add_member("Category:Latin non-lemma forms", "amas");

        let mut editor = Editor::new(EditorOptions::default(), ScriptedPrompt::no());
        let request = TemplateRenameRequest {
            old_name: "la-verb".to_string(),
            new_name: "la-conj".to_string(),
            source: PageSource::Language("Latin".to_string()),
            summary: "rename".to_string(),
            limit: None,
        };
        let stats = rename_template(&mut site, &mut editor, &request).expect("rename");
        assert_eq!(stats.scanned, 3);
        assert_eq!(stats.changed, 1);
        assert_eq!(site.text("amo"), Some("{{la-conj|amo}}"));
        assert_eq!(site.text("amas"), Some("{{la-verb form|amo}}"));
    }
}
