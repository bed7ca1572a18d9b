use anyhow::{Context, Result};

use crate::site::Readable;

const REDIRECT_PREFIX: &str = "#redirect";

/// A page as loaded from the wiki plus any local, unsaved mutation of it.
///
/// `baseline` is only ever replaced by text that was actually saved, so a
/// diff against it always shows exactly what a save would change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    title: String,
    baseline: String,
    timestamp: Option<String>,
    exists: bool,
    staged: Option<String>,
}

impl Page {
    pub fn load<S: Readable + ?Sized>(site: &mut S, title: &str) -> Result<Self> {
        let loaded = site
            .get_text(title)
            .with_context(|| format!("failed to load {title}"))?;
        Ok(match loaded {
            Some(loaded) => Self {
                title: title.to_string(),
                baseline: loaded.text,
                timestamp: loaded.timestamp,
                exists: true,
                staged: None,
            },
            None => Self {
                title: title.to_string(),
                baseline: String::new(),
                timestamp: None,
                exists: false,
                staged: None,
            },
        })
    }

    pub fn from_text(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            baseline: text.into(),
            timestamp: None,
            exists: true,
            staged: None,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn baseline(&self) -> &str {
        &self.baseline
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.timestamp.as_deref()
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn working_text(&self) -> &str {
        self.staged.as_deref().unwrap_or(&self.baseline)
    }

    pub fn stage(&mut self, text: String) {
        self.staged = Some(text);
    }

    pub fn discard_staged(&mut self) {
        self.staged = None;
    }

    pub fn is_modified(&self) -> bool {
        self.staged
            .as_deref()
            .is_some_and(|staged| staged != self.baseline)
    }

    pub fn is_redirect(&self) -> bool {
        starts_with_ignore_case(&self.baseline, REDIRECT_PREFIX)
    }

    pub(crate) fn mark_saved(&mut self, text: &str) {
        self.baseline = text.to_string();
        self.staged = None;
        self.exists = true;
    }
}

pub fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

#[cfg(test)]
mod tests {
    use super::Page;
    use crate::test_support::MemorySite;

    #[test]
    fn staged_text_never_aliases_baseline() {
        let mut page = Page::from_text("dog", "old");
        page.stage("new".to_string());
        assert_eq!(page.baseline(), "old");
        assert_eq!(page.working_text(), "new");
        assert!(page.is_modified());
        page.discard_staged();
        assert_eq!(page.working_text(), "old");
        assert!(!page.is_modified());
    }

    #[test]
    fn redirect_detection_ignores_case() {
        assert!(Page::from_text("A", "#REDIRECT [[B]]").is_redirect());
        assert!(Page::from_text("A", "#redirect[[B]]").is_redirect());
        assert!(!Page::from_text("A", "See [[B]]").is_redirect());
    }

    #[test]
    fn load_reports_missing_pages() {
        let mut site = MemorySite::default();
        site.insert("Present", "body");

        let present = Page::load(&mut site, "Present").expect("load");
        assert!(present.exists());
        assert_eq!(present.baseline(), "body");

        let missing = Page::load(&mut site, "Absent").expect("load");
        assert!(!missing.exists());
        assert_eq!(missing.baseline(), "");
    }
}
