//! In-memory wiki and scripted operator used by the unit tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use anyhow::Result;

use crate::backlinks::BacklinkRules;
use crate::config::BacklinksSection;
use crate::editor::{Confirm, EditRequest, write_preview};
use crate::links::NamespaceAliases;
use crate::page::starts_with_ignore_case;
use crate::site::{
    Categorized, LinkingPage, LoadedText, Movable, Readable, SaveRequest, SiteError, Writable,
};
use crate::wikitext::Document;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedEdit {
    pub title: String,
    pub text: String,
    pub summary: String,
    pub bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedMove {
    pub from: String,
    pub to: String,
    pub reason: String,
}

/// Backlinks are derived from page text, so a page's links are whatever its
/// wikilinks currently say.
#[derive(Debug, Default)]
pub struct MemorySite {
    pub pages: BTreeMap<String, String>,
    pub locked: BTreeSet<String>,
    pub conflicted: BTreeSet<String>,
    pub members: BTreeMap<String, Vec<String>>,
    pub subcats: BTreeMap<String, Vec<String>>,
    pub saves: Vec<SavedEdit>,
    pub moves: Vec<RecordedMove>,
}

impl MemorySite {
    pub fn insert(&mut self, title: &str, text: &str) {
        self.pages.insert(title.to_string(), text.to_string());
    }

    pub fn text(&self, title: &str) -> Option<&str> {
        self.pages.get(title).map(String::as_str)
    }

    pub fn add_member(&mut self, category: &str, title: &str) {
        self.members
            .entry(category.to_string())
            .or_default()
            .push(title.to_string());
    }

    pub fn add_subcategory(&mut self, category: &str, subcategory: &str) {
        self.subcats
            .entry(category.to_string())
            .or_default()
            .push(subcategory.to_string());
    }

    fn links_to(text: &str, title: &str) -> bool {
        let aliases = NamespaceAliases::default();
        Document::parse(text)
            .wikilinks()
            .iter()
            .any(|link| aliases.canonical(&link.title) == title)
    }
}

impl Readable for MemorySite {
    fn get_text(&mut self, title: &str) -> Result<Option<LoadedText>> {
        Ok(self.pages.get(title).map(|text| LoadedText {
            text: text.clone(),
            timestamp: Some("2026-01-01T00:00:00Z".to_string()),
        }))
    }

    fn exists(&mut self, title: &str) -> Result<bool> {
        Ok(self.pages.contains_key(title))
    }

    fn redirect_target(&mut self, title: &str) -> Result<Option<String>> {
        let Some(text) = self.pages.get(title) else {
            return Ok(None);
        };
        if !starts_with_ignore_case(text, "#redirect") {
            return Ok(None);
        }
        Ok(Document::parse(text.as_str())
            .wikilinks()
            .first()
            .map(|link| link.title.clone()))
    }

    fn backlinks(&mut self, title: &str, _follow_redirects: bool) -> Result<Vec<LinkingPage>> {
        Ok(self
            .pages
            .iter()
            .filter(|(source, text)| source.as_str() != title && Self::links_to(text, title))
            .map(|(source, text)| LinkingPage {
                title: source.clone(),
                redirect: starts_with_ignore_case(text, "#redirect"),
            })
            .collect())
    }

    fn prefixed_pages(&mut self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .pages
            .keys()
            .filter(|title| title.starts_with(prefix))
            .cloned()
            .collect())
    }
}

impl Writable for MemorySite {
    fn save_text(&mut self, request: &SaveRequest<'_>) -> Result<(), SiteError> {
        if self.locked.contains(request.title) {
            return Err(SiteError::PageLocked);
        }
        if self.conflicted.contains(request.title) {
            return Err(SiteError::EditConflict);
        }
        self.pages
            .insert(request.title.to_string(), request.text.to_string());
        self.saves.push(SavedEdit {
            title: request.title.to_string(),
            text: request.text.to_string(),
            summary: request.summary.to_string(),
            bot: request.bot,
        });
        Ok(())
    }
}

impl Movable for MemorySite {
    fn move_page(&mut self, title: &str, new_title: &str, reason: &str) -> Result<(), SiteError> {
        if self.locked.contains(title) {
            return Err(SiteError::PageLocked);
        }
        if self.pages.contains_key(new_title) {
            return Err(SiteError::DestinationExists);
        }
        let text = self
            .pages
            .remove(title)
            .ok_or_else(|| SiteError::Transport(anyhow::anyhow!("missingtitle: {title}")))?;
        self.pages.insert(new_title.to_string(), text);
        self.pages
            .insert(title.to_string(), format!("#REDIRECT [[{new_title}]]"));
        self.moves.push(RecordedMove {
            from: title.to_string(),
            to: new_title.to_string(),
            reason: reason.to_string(),
        });
        Ok(())
    }
}

impl Categorized for MemorySite {
    fn category_members(&mut self, category: &str) -> Result<Vec<String>> {
        Ok(self.members.get(category).cloned().unwrap_or_default())
    }

    fn subcategories(&mut self, category: &str) -> Result<Vec<String>> {
        Ok(self.subcats.get(category).cloned().unwrap_or_default())
    }
}

/// Replays canned operator answers; once they run out every question is
/// answered with `fallback`.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    pub answers: VecDeque<String>,
    pub fallback: String,
    pub asked: Vec<String>,
    pub previews: Vec<u8>,
}

impl ScriptedPrompt {
    pub fn yes() -> Self {
        Self {
            fallback: "y".to_string(),
            ..Self::default()
        }
    }

    pub fn no() -> Self {
        Self {
            fallback: "n".to_string(),
            ..Self::default()
        }
    }

    pub fn with_answers(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(|answer| answer.to_string()).collect(),
            fallback: "n".to_string(),
            ..Self::default()
        }
    }

    pub fn preview_text(&self) -> String {
        String::from_utf8_lossy(&self.previews).into_owned()
    }

    fn next_answer(&mut self) -> String {
        self.answers
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Confirm for ScriptedPrompt {
    fn preview(&mut self, request: &EditRequest<'_>, dry_run: bool) -> Result<()> {
        write_preview(&mut self.previews, request, dry_run)
    }

    fn confirm(&mut self, request: &EditRequest<'_>) -> Result<bool> {
        self.asked.push(request.title.to_string());
        Ok(self.next_answer().to_lowercase().starts_with('y'))
    }

    fn choose(&mut self, question: &str) -> Result<String> {
        self.asked.push(question.to_string());
        Ok(self.next_answer())
    }
}

pub fn default_rules() -> BacklinkRules {
    BacklinkRules::from_config(&BacklinksSection::default()).expect("default backlink rules")
}
