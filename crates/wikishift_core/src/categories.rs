//! Category membership transfer.
//!
//! A page can sit in a language category through a plain
//! `[[Category:English nouns|key]]` link or through a categorization
//! template such as `{{cln|en|nouns|sort=key}}`. Removal finds whichever
//! representation is present and hands back the sort key so the destination
//! membership can carry it over.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::CategoriesSection;
use crate::editor::{Confirm, Editor};
use crate::page::Page;
use crate::site::{
    CATEGORY_PREFIX, NS_CATEGORY, SiteError, WikiSite, namespace_of, normalize_title,
    with_category_prefix,
};
use crate::wikitext::{Document, Template, Wikilink, remove_extra_newlines};

const SECTION_SEPARATOR: &str = "----";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("Unable to find the link to \"{category}\" in the text of \"{title}\".")]
    NotAMember { title: String, category: String },
    #[error("Unable to find a \"{section}\" section on \"{title}\". Failed to add it to {category}.")]
    SectionNotFound {
        title: String,
        section: String,
        category: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFamily {
    /// `{{cat|en|English nouns}}`: full category names.
    Cat,
    /// `{{cln|en|nouns}}`: langname base names.
    Cln,
    /// `{{c|en|Philosophy}}`: topic base names.
    Topic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateAliases {
    cat: BTreeSet<String>,
    cln: BTreeSet<String>,
    topic: BTreeSet<String>,
}

impl Default for TemplateAliases {
    fn default() -> Self {
        Self::from_config(&CategoriesSection::default())
    }
}

impl TemplateAliases {
    pub fn from_config(section: &CategoriesSection) -> Self {
        Self {
            cat: section.cat_aliases.iter().cloned().collect(),
            cln: section.cln_aliases.iter().cloned().collect(),
            topic: section.topic_aliases.iter().cloned().collect(),
        }
    }

    pub fn family(&self, normal_name: &str) -> Option<TemplateFamily> {
        if self.cat.contains(normal_name) {
            Some(TemplateFamily::Cat)
        } else if self.cln.contains(normal_name) {
            Some(TemplateFamily::Cln)
        } else if self.topic.contains(normal_name) {
            Some(TemplateFamily::Topic)
        } else {
            None
        }
    }
}

/// One language's category in either naming scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LangCategory {
    pub base_name: String,
    pub lang_code: String,
    pub lang_name: String,
    pub topic: bool,
}

impl LangCategory {
    pub fn new(
        base_name: impl Into<String>,
        lang_code: impl Into<String>,
        lang_name: impl Into<String>,
        topic: bool,
    ) -> Self {
        Self {
            base_name: base_name.into(),
            lang_code: lang_code.into(),
            lang_name: lang_name.into(),
            topic,
        }
    }

    /// `en:Philosophy` for topic categories, `English nouns` otherwise.
    pub fn full_name(&self) -> String {
        if self.topic {
            format!("{}:{}", self.lang_code, self.base_name)
        } else {
            format!("{} {}", self.lang_name, self.base_name)
        }
    }

    pub fn title(&self) -> String {
        with_category_prefix(&self.full_name())
    }

    /// The same base name in another language or scheme.
    pub fn with_base(&self, base_name: &str, topic: bool) -> Self {
        Self::new(base_name, &self.lang_code, &self.lang_name, topic)
    }

    fn template_family(&self) -> TemplateFamily {
        if self.topic {
            TemplateFamily::Topic
        } else {
            TemplateFamily::Cln
        }
    }

    /// The argument value naming this category inside a template of `family`.
    fn argument_form(&self, family: TemplateFamily) -> Option<String> {
        match family {
            TemplateFamily::Cat => Some(self.full_name()),
            TemplateFamily::Cln if !self.topic => Some(self.base_name.clone()),
            TemplateFamily::Topic if self.topic => Some(self.base_name.clone()),
            _ => None,
        }
    }

}

/// Category name without its namespace prefix, `_` read as space.
pub fn bare_category_name(name: &str) -> String {
    let name = name.trim_start_matches(':');
    match name.split_once(':') {
        Some((prefix, rest)) if namespace_of(&format!("{prefix}:")) == NS_CATEGORY => {
            normalize_title(rest)
        }
        _ => normalize_title(name),
    }
}

/// `true` for a membership link `[[Category:<name>]]`. Escaped `[[:Category:…]]`
/// links only point at the category.
fn is_membership_link(link: &Wikilink, name: &str) -> bool {
    namespace_of(&link.title) == NS_CATEGORY && bare_category_name(&link.title) == name
}

fn is_language_template(template: &Template, lang_code: &str) -> bool {
    template
        .arguments
        .first()
        .is_some_and(|arg| arg.positional && arg.value.trim() == lang_code)
}

fn sort_value(template: &Template) -> Option<String> {
    template
        .get_arg("sort")
        .map(|arg| arg.value.clone())
}

/// Removes `page`'s membership in `category` from its working text and
/// returns the sort key it had.
pub fn remove_membership(
    page: &mut Page,
    category: &LangCategory,
    aliases: &TemplateAliases,
) -> Result<Option<String>, TransferError> {
    let mut document = Document::parse(page.working_text());
    let sort_key = match remove_from_template(&mut document, category, aliases) {
        Some(sort_key) => sort_key,
        None => remove_plain_link(&mut document, &category.full_name()).ok_or_else(|| {
            TransferError::NotAMember {
                title: page.title().to_string(),
                category: category.full_name(),
            }
        })?,
    };
    let text = remove_extra_newlines(document.as_str());
    if text == page.working_text() {
        return Err(TransferError::NotAMember {
            title: page.title().to_string(),
            category: category.full_name(),
        });
    }
    page.stage(text);
    Ok(sort_key)
}

/// `Some(sort_key)` when a template argument was removed.
fn remove_from_template(
    document: &mut Document,
    category: &LangCategory,
    aliases: &TemplateAliases,
) -> Option<Option<String>> {
    for template in document.templates() {
        let Some(family) = aliases.family(&template.normal_name()) else {
            continue;
        };
        let Some(expected) = category.argument_form(family) else {
            continue;
        };
        if !is_language_template(&template, &category.lang_code) {
            continue;
        }
        let Some(argument) = template
            .positional_args()
            .skip(1)
            .find(|arg| arg.value.trim() == expected)
        else {
            continue;
        };

        let sort_key = sort_value(&template);
        let category_args = template.positional_args().skip(1).count();
        if category_args == 1 {
            let range = whole_line_or(document.as_str(), template.span.clone());
            document.splice(range, "");
        } else {
            document.splice(argument.span.clone(), "");
        }
        return Some(sort_key);
    }
    None
}

fn remove_plain_link(document: &mut Document, name: &str) -> Option<Option<String>> {
    let link = document
        .wikilinks()
        .into_iter()
        .find(|link| is_membership_link(link, name))?;
    let range = whole_line_or(document.as_str(), link.span.clone());
    document.splice(range, "");
    Some(link.text)
}

/// Widens `span` to its whole line, newline included, when nothing else sits
/// on that line.
fn whole_line_or(text: &str, span: std::ops::Range<usize>) -> std::ops::Range<usize> {
    let line_start = text[..span.start].rfind('\n').map_or(0, |index| index + 1);
    let line_end = text[span.end..]
        .find('\n')
        .map_or(text.len(), |index| span.end + index + 1);
    let before = &text[line_start..span.start];
    let after = &text[span.end..line_end];
    if before.trim().is_empty() && after.trim().is_empty() {
        line_start..line_end
    } else {
        span
    }
}

/// Adds `page` to `category`, preferring an existing template for the same
/// language over a new one in the language's section.
pub fn add_membership(
    page: &mut Page,
    category: &LangCategory,
    sort_key: Option<&str>,
    aliases: &TemplateAliases,
) -> Result<(), TransferError> {
    let sort_key = sort_key.filter(|key| !key.trim().is_empty());
    let mut document = Document::parse(page.working_text());
    let family = category.template_family();

    let existing = document.templates().into_iter().find(|template| {
        aliases.family(&template.normal_name()) == Some(family)
            && is_language_template(template, &category.lang_code)
    });

    if let Some(template) = existing {
        let already_listed = template
            .positional_args()
            .skip(1)
            .any(|arg| arg.value.trim() == category.base_name);
        if !already_listed {
            let mut edits: Vec<(usize, String)> = Vec::new();
            if let Some(key) = sort_key
                && !template.has_arg("sort")
            {
                edits.push((template.closing_offset(), format!("|sort={key}")));
            }
            let position = template
                .first_named_arg()
                .map(|arg| arg.span.start)
                .unwrap_or_else(|| template.closing_offset());
            edits.push((position, format!("|{}", category.base_name)));
            edits.sort_by(|left, right| right.0.cmp(&left.0));
            for (position, insertion) in edits {
                document.splice(position..position, &insertion);
            }
            debug!(title = page.title(), "added to existing template");
        }
    } else {
        let section = document
            .sections(2)
            .into_iter()
            .find(|section| section.title.trim() == category.lang_name)
            .ok_or_else(|| TransferError::SectionNotFound {
                title: page.title().to_string(),
                section: category.lang_name.clone(),
                category: category.full_name(),
            })?;
        let name = if category.topic { "c" } else { "cln" };
        let mut invocation = format!("{{{{{name}|{}|{}", category.lang_code, category.base_name);
        if let Some(key) = sort_key {
            invocation.push_str(&format!("|sort={key}"));
        }
        invocation.push_str("}}");

        let contents = &document.as_str()[section.contents_span.clone()];
        let mut body = contents.trim_end();
        if let Some(stripped) = body.strip_suffix(SECTION_SEPARATOR) {
            body = stripped.trim_end();
        }
        if body.trim().is_empty() {
            let position = section.contents_span.start;
            document.splice(position..position, &format!("{invocation}\n"));
        } else {
            let position = section.contents_span.start + body.len();
            document.splice(position..position, &format!("\n{invocation}"));
        }
        debug!(title = page.title(), "added new categorization template");
    }

    page.stage(remove_extra_newlines(document.as_str()));
    Ok(())
}

/// Moves `page` from `source` to `destination`, keeping its sort key. On
/// failure nothing stays staged on the page.
pub fn transfer(
    page: &mut Page,
    source: &LangCategory,
    destination: &LangCategory,
    aliases: &TemplateAliases,
) -> Result<Option<String>, TransferError> {
    let result = remove_membership(page, source, aliases).and_then(|sort_key| {
        add_membership(page, destination, sort_key.as_deref(), aliases).map(|()| sort_key)
    });
    if result.is_err() {
        page.discard_staged();
    }
    result
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryRunStats {
    pub examined: usize,
    pub changed: usize,
    pub failed: usize,
}

impl CategoryRunStats {
    pub fn absorb(&mut self, other: CategoryRunStats) {
        self.examined += other.examined;
        self.changed += other.changed;
        self.failed += other.failed;
    }
}

/// Transfers every member of `source` into `destination`, stopping after
/// `limit` changed pages.
pub fn move_members<S, P>(
    site: &mut S,
    editor: &mut Editor<P>,
    source: &LangCategory,
    destination: &LangCategory,
    aliases: &TemplateAliases,
    summary: &str,
    limit: Option<usize>,
) -> Result<CategoryRunStats>
where
    S: WikiSite + ?Sized,
    P: Confirm,
{
    let members = site
        .category_members(&source.title())
        .with_context(|| format!("failed to list members of {}", source.title()))?;
    let mut stats = CategoryRunStats::default();
    for title in members {
        if limit.is_some_and(|limit| stats.changed >= limit) {
            break;
        }
        stats.examined += 1;
        let mut page = Page::load(site, &title)?;
        if let Err(error) = transfer(&mut page, source, destination, aliases) {
            println!("{error}");
            stats.failed += 1;
            continue;
        }
        let new_text = page.working_text().to_string();
        if editor.edit(site, &mut page, &new_text, summary, true)?.is_applied() {
            stats.changed += 1;
        } else {
            stats.failed += 1;
        }
    }
    info!(
        source = source.full_name().as_str(),
        destination = destination.full_name().as_str(),
        changed = stats.changed,
        failed = stats.failed,
        "moved category members"
    );
    Ok(stats)
}

/// Takes every member out of `category`.
pub fn remove_members<S, P>(
    site: &mut S,
    editor: &mut Editor<P>,
    category: &LangCategory,
    aliases: &TemplateAliases,
    summary: &str,
    limit: Option<usize>,
) -> Result<CategoryRunStats>
where
    S: WikiSite + ?Sized,
    P: Confirm,
{
    let members = site
        .category_members(&category.title())
        .with_context(|| format!("failed to list members of {}", category.title()))?;
    let mut stats = CategoryRunStats::default();
    for title in members {
        if limit.is_some_and(|limit| stats.changed >= limit) {
            break;
        }
        stats.examined += 1;
        let mut page = Page::load(site, &title)?;
        if let Err(error) = remove_membership(&mut page, category, aliases) {
            println!("{error}");
            stats.failed += 1;
            continue;
        }
        let new_text = page.working_text().to_string();
        if editor.edit(site, &mut page, &new_text, summary, true)?.is_applied() {
            stats.changed += 1;
        } else {
            stats.failed += 1;
        }
    }
    Ok(stats)
}

/// What [`recategorize`] does to each member of the category it walks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recategorization {
    /// Also put the page in this category.
    Add(String),
    /// Take the page out of the walked category.
    Remove,
    /// Swap the walked category for this one in place, sort key included.
    Replace(String),
}

impl Recategorization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add(_) => "add",
            Self::Remove => "remove",
            Self::Replace(_) => "replace",
        }
    }

    pub fn default_summary(&self, existing: &str) -> String {
        let existing = bare_category_name(existing);
        match self {
            Self::Add(name) => format!("Added [[{CATEGORY_PREFIX}{}]]", bare_category_name(name)),
            Self::Remove => format!("Removed [[{CATEGORY_PREFIX}{existing}]]"),
            Self::Replace(name) => default_summary(&existing, &bare_category_name(name)),
        }
    }
}

/// Appends `[[Category:<name>]]` after the page's last category link, or at
/// the end of the text when it has none. Returns `false` and stages nothing
/// when the page is already a member.
pub fn add_category_link(page: &mut Page, name: &str) -> bool {
    let name = bare_category_name(name);
    let mut document = Document::parse(page.working_text());
    let links: Vec<Wikilink> = document
        .wikilinks()
        .into_iter()
        .filter(|link| namespace_of(&link.title) == NS_CATEGORY)
        .collect();
    if links.iter().any(|link| is_membership_link(link, &name)) {
        return false;
    }

    let new_link = format!("[[{CATEGORY_PREFIX}{name}]]");
    match links.last() {
        Some(last) => {
            let position = last.span.end;
            document.splice(position..position, &format!("\n{new_link}"));
        }
        None => {
            let body_len = document.as_str().trim_end().len();
            if body_len == 0 {
                document.splice(0..0, &format!("{new_link}\n"));
            } else {
                document.splice(body_len..body_len, &format!("\n{new_link}"));
            }
        }
    }
    page.stage(document.into_text());
    true
}

/// Removes the plain `[[Category:<name>]]` link and returns its sort key.
pub fn remove_category_link(page: &mut Page, name: &str) -> Result<Option<String>, TransferError> {
    let name = bare_category_name(name);
    let mut document = Document::parse(page.working_text());
    let sort_key = remove_plain_link(&mut document, &name).ok_or_else(|| {
        TransferError::NotAMember {
            title: page.title().to_string(),
            category: name.clone(),
        }
    })?;
    page.stage(remove_extra_newlines(document.as_str()));
    Ok(sort_key)
}

/// Points the `[[Category:<existing>]]` link at `new` where it stands. When
/// the page is already in `new` the old link is simply dropped.
pub fn replace_category_link(page: &mut Page, existing: &str, new: &str) -> Result<(), TransferError> {
    let existing = bare_category_name(existing);
    let new = bare_category_name(new);
    let mut document = Document::parse(page.working_text());
    let links = document.wikilinks();
    let Some(link) = links.iter().find(|link| is_membership_link(link, &existing)) else {
        return Err(TransferError::NotAMember {
            title: page.title().to_string(),
            category: existing,
        });
    };
    if links.iter().any(|link| is_membership_link(link, &new)) {
        remove_category_link(page, &existing)?;
        return Ok(());
    }
    document.splice(link.title_span.clone(), &format!("{CATEGORY_PREFIX}{new}"));
    page.stage(document.into_text());
    Ok(())
}

/// Adds, removes or replaces a plain category link on every member of
/// `existing`, stopping after `limit` changed pages.
pub fn recategorize<S, P>(
    site: &mut S,
    editor: &mut Editor<P>,
    existing: &str,
    action: &Recategorization,
    summary: &str,
    limit: Option<usize>,
) -> Result<CategoryRunStats>
where
    S: WikiSite + ?Sized,
    P: Confirm,
{
    let existing = bare_category_name(existing);
    let category_title = format!("{CATEGORY_PREFIX}{existing}");
    let members = site
        .category_members(&category_title)
        .with_context(|| format!("failed to list members of {category_title}"))?;
    let mut stats = CategoryRunStats::default();
    for title in members {
        if limit.is_some_and(|limit| stats.changed >= limit) {
            break;
        }
        stats.examined += 1;
        debug!(title = title.as_str(), action = action.as_str(), "recategorizing");
        let mut page = Page::load(site, &title)?;
        let applied = match action {
            Recategorization::Add(name) => {
                if !add_category_link(&mut page, name) {
                    println!("Note: \"{title}\" is already in \"{}\".", bare_category_name(name));
                    continue;
                }
                Ok(())
            }
            Recategorization::Remove => remove_category_link(&mut page, &existing).map(|_| ()),
            Recategorization::Replace(name) => replace_category_link(&mut page, &existing, name),
        };
        if let Err(error) = applied {
            println!("{error}");
            stats.failed += 1;
            continue;
        }
        let new_text = page.working_text().to_string();
        if editor.edit(site, &mut page, &new_text, summary, true)?.is_applied() {
            stats.changed += 1;
        } else {
            stats.failed += 1;
        }
    }
    info!(
        category = category_title.as_str(),
        action = action.as_str(),
        changed = stats.changed,
        failed = stats.failed,
        "recategorized members"
    );
    Ok(stats)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryPageAction {
    NoSource,
    AlreadyRedirected,
    Redirected,
    Moved,
    /// Dry run: what would have happened.
    WouldRedirect,
    WouldMove,
    Skipped,
}

impl CategoryPageAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoSource => "no-source",
            Self::AlreadyRedirected => "already-redirected",
            Self::Redirected => "redirected",
            Self::Moved => "moved",
            Self::WouldRedirect => "would-redirect",
            Self::WouldMove => "would-move",
            Self::Skipped => "skipped",
        }
    }
}

pub fn default_summary(source: &str, destination: &str) -> String {
    format!(
        "Moved [[{}]] to [[{}]]",
        with_category_prefix(source),
        with_category_prefix(destination)
    )
}

/// Moves the category page `source` to `destination`, or turns it into a
/// redirect when the destination page already exists.
pub fn move_or_redirect_category_page<S, P>(
    site: &mut S,
    editor: &mut Editor<P>,
    source: &str,
    destination: &str,
    summary: &str,
) -> Result<CategoryPageAction>
where
    S: WikiSite + ?Sized,
    P: Confirm,
{
    let source_title = with_category_prefix(source);
    let destination_title = with_category_prefix(destination);
    if !site.exists(&source_title)? {
        debug!(source = source_title.as_str(), "no category page to move");
        return Ok(CategoryPageAction::NoSource);
    }

    if site.exists(&destination_title)? {
        if let Some(target) = site.redirect_target(&source_title)?
            && with_category_prefix(&normalize_title(target.trim_start_matches(':')))
                == normalize_title(&destination_title)
        {
            return Ok(CategoryPageAction::AlreadyRedirected);
        }
        let mut page = Page::load(site, &source_title)?;
        let redirect = format!("#REDIRECT [[:{destination_title}]]");
        let outcome = editor.edit(site, &mut page, &redirect, summary, true)?;
        return Ok(match outcome {
            outcome if !outcome.is_applied() => CategoryPageAction::Skipped,
            _ if editor.dry_run() => {
                println!("Would turn \"{source_title}\" into a redirect to \"{destination_title}\".");
                CategoryPageAction::WouldRedirect
            }
            _ => {
                println!("Turned \"{source_title}\" into a redirect to \"{destination_title}\".");
                CategoryPageAction::Redirected
            }
        });
    }

    if editor.dry_run() {
        println!("Would move \"{source_title}\" to \"{destination_title}\".");
        return Ok(CategoryPageAction::WouldMove);
    }
    match site.move_page(&source_title, &destination_title, summary) {
        Ok(()) => {
            println!("Moved \"{source_title}\" to \"{destination_title}\".");
            Ok(CategoryPageAction::Moved)
        }
        Err(SiteError::DestinationExists) => Ok(CategoryPageAction::AlreadyRedirected),
        Err(SiteError::PageLocked) => {
            println!("Warning: Skipping \"{source_title}\" because the page is protected.");
            Ok(CategoryPageAction::Skipped)
        }
        Err(SiteError::EditConflict) => Ok(CategoryPageAction::Skipped),
        Err(SiteError::Transport(error)) => Err(error.context(format!(
            "failed to move {source_title} to {destination_title}"
        ))),
    }
}
