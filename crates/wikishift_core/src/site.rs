use anyhow::Result;
use thiserror::Error;

pub const NS_MAIN: i32 = 0;
pub const NS_PROJECT: i32 = 4;
pub const NS_TEMPLATE: i32 = 10;
pub const NS_CATEGORY: i32 = 14;
pub const NS_MODULE: i32 = 828;

pub const CATEGORY_PREFIX: &str = "Category:";

const NAMESPACE_NAMES: &[(&str, i32)] = &[
    ("Wiktionary", NS_PROJECT),
    ("Project", NS_PROJECT),
    ("WT", NS_PROJECT),
    ("Template", NS_TEMPLATE),
    ("T", NS_TEMPLATE),
    ("Category", NS_CATEGORY),
    ("CAT", NS_CATEGORY),
    ("Module", NS_MODULE),
    ("MOD", NS_MODULE),
];

/// Failures a write against the wiki can report. Everything that is not a
/// recognised refusal arrives as `Transport` and aborts the run.
#[derive(Debug, Error)]
pub enum SiteError {
    #[error("page is protected")]
    PageLocked,
    #[error("destination already exists")]
    DestinationExists,
    #[error("edit conflict")]
    EditConflict,
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedText {
    pub text: String,
    pub timestamp: Option<String>,
}

/// A page linking to some target, as listed by the wiki.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkingPage {
    pub title: String,
    pub redirect: bool,
}

#[derive(Debug, Clone)]
pub struct SaveRequest<'a> {
    pub title: &'a str,
    pub text: &'a str,
    pub summary: &'a str,
    pub bot: bool,
    /// Revision timestamp the new text was derived from.
    pub base_timestamp: Option<&'a str>,
}

pub trait Readable {
    fn get_text(&mut self, title: &str) -> Result<Option<LoadedText>>;
    fn exists(&mut self, title: &str) -> Result<bool>;
    fn redirect_target(&mut self, title: &str) -> Result<Option<String>>;
    /// Titles of pages linking to `title`. With `follow_redirects` pages that
    /// reach it through a redirect are included as well.
    fn backlinks(&mut self, title: &str, follow_redirects: bool) -> Result<Vec<LinkingPage>>;
    /// Every page whose full title starts with `prefix`.
    fn prefixed_pages(&mut self, prefix: &str) -> Result<Vec<String>>;
}

pub trait Writable: Readable {
    fn save_text(&mut self, request: &SaveRequest<'_>) -> Result<(), SiteError>;
}

pub trait Movable {
    /// Moves a single page. Subpages are never moved along with it.
    fn move_page(&mut self, title: &str, new_title: &str, reason: &str) -> Result<(), SiteError>;
}

pub trait Categorized {
    /// Pages and files in a category, subcategories excluded.
    fn category_members(&mut self, category: &str) -> Result<Vec<String>>;
    fn subcategories(&mut self, category: &str) -> Result<Vec<String>>;
}

pub trait WikiSite: Writable + Movable + Categorized {}

impl<T: Writable + Movable + Categorized> WikiSite for T {}

/// `Category:` prefixed form of a category name.
pub fn with_category_prefix(name: &str) -> String {
    if name.starts_with(CATEGORY_PREFIX) {
        name.to_string()
    } else {
        format!("{CATEGORY_PREFIX}{name}")
    }
}

/// Namespace of `title` judged by its prefix alone. A leading `:` is not
/// stripped, so `:Category:Foo` reads as a main-namespace title.
pub fn namespace_of(title: &str) -> i32 {
    let Some((prefix, _)) = title.split_once(':') else {
        return NS_MAIN;
    };
    let prefix = normalize_title(prefix);
    NAMESPACE_NAMES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(&prefix))
        .map_or(NS_MAIN, |(_, id)| *id)
}

pub fn normalize_title(title: &str) -> String {
    crate::wikitext::collapse_whitespace(&title.replace('_', " "))
}
