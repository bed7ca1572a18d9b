//! The single write path to the wiki.
//!
//! Every page change goes through [`Editor::edit`], which diffs the proposed
//! text against the page's loaded baseline, previews the diff, asks the
//! injected [`Confirm`] strategy when needed and finally saves. Dry runs stop
//! after the preview and optionally drop the new text into a local file.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use similar::{ChangeTag, TextDiff};
use thiserror::Error;
use tracing::{debug, warn};

use crate::page::Page;
use crate::site::{SaveRequest, SiteError, Writable};

const DIFF_CONTEXT_LINES: usize = 1;

/// Why an edit was not saved even though nothing failed at the transport
/// level. Callers log these and move on to the next page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EditRefusal {
    #[error("the new text is identical to the existing text")]
    NoOpEdit,
    #[error("the page is protected")]
    PageLocked,
    #[error("the page changed since it was loaded")]
    EditConflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Saved,
    WouldSave,
    Declined,
    Refused(EditRefusal),
}

impl EditOutcome {
    /// `true` when the edit happened or would happen in a dry run.
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Saved | Self::WouldSave)
    }
}

/// What the operator is asked to approve.
#[derive(Debug, Clone)]
pub struct EditRequest<'a> {
    pub title: &'a str,
    pub summary: &'a str,
    pub diff: &'a str,
}

/// Confirmation strategy. The terminal implementation blocks on stdin; tests
/// inject scripted answers.
pub trait Confirm {
    /// Shows the diff and summary. Runs before every edit, confirmed or not.
    fn preview(&mut self, request: &EditRequest<'_>, dry_run: bool) -> Result<()> {
        write_preview(&mut io::stdout().lock(), request, dry_run)
    }

    fn confirm(&mut self, request: &EditRequest<'_>) -> Result<bool>;
    /// Free-form question, used for the per-page action menus.
    fn choose(&mut self, question: &str) -> Result<String>;
}

pub fn write_preview<W: Write>(out: &mut W, request: &EditRequest<'_>, dry_run: bool) -> Result<()> {
    let title = request.title;
    if dry_run {
        writeln!(out, "Would make the following edit at {title}:")?;
    } else {
        writeln!(out, "Making the following edit at {title}:")?;
    }
    for line in request.diff.lines() {
        writeln!(out, "\t{line}")?;
    }
    writeln!(out)?;
    writeln!(out, "Summary: {}", request.summary)?;
    Ok(())
}

#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl TerminalPrompt {
    fn read_answer(&mut self) -> Result<String> {
        print!("==> ");
        io::stdout().flush().context("failed to flush stdout")?;
        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .context("failed to read answer from stdin")?;
        Ok(line.trim().to_lowercase())
    }
}

impl Confirm for TerminalPrompt {
    fn confirm(&mut self, _request: &EditRequest<'_>) -> Result<bool> {
        println!("Save edit? (y/n)");
        Ok(self.read_answer()?.starts_with('y'))
    }

    fn choose(&mut self, question: &str) -> Result<String> {
        println!("{question}");
        self.read_answer()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EditorOptions {
    pub dry_run: bool,
    /// Where dry runs write `<title>.wiki` files. `None` previews only.
    pub dry_run_dir: Option<PathBuf>,
    pub bot: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditStats {
    pub saved: usize,
    pub would_save: usize,
    pub declined: usize,
    pub refused: usize,
}

#[derive(Debug)]
pub struct Editor<P: Confirm> {
    options: EditorOptions,
    prompt: P,
    stats: EditStats,
}

impl<P: Confirm> Editor<P> {
    pub fn new(options: EditorOptions, prompt: P) -> Self {
        Self {
            options,
            prompt,
            stats: EditStats::default(),
        }
    }

    pub fn options(&self) -> &EditorOptions {
        &self.options
    }

    pub fn dry_run(&self) -> bool {
        self.options.dry_run
    }

    pub fn stats(&self) -> EditStats {
        self.stats
    }

    pub fn prompt_mut(&mut self) -> &mut P {
        &mut self.prompt
    }

    /// Replaces `page`'s text with `new_text`, diffing against the text the
    /// page was loaded with rather than anything staged on it since.
    pub fn edit<S: Writable + ?Sized>(
        &mut self,
        site: &mut S,
        page: &mut Page,
        new_text: &str,
        summary: &str,
        skip_confirmation: bool,
    ) -> Result<EditOutcome> {
        let title = page.title().to_string();
        if new_text == page.baseline() {
            println!("Warning: Refusing to edit {title} because the new text is identical to the existing text.");
            return Ok(self.refuse(EditRefusal::NoOpEdit));
        }

        let diff = unified_diff(page.baseline(), new_text);
        let request = EditRequest {
            title: &title,
            summary,
            diff: &diff,
        };
        self.prompt.preview(&request, self.options.dry_run)?;

        if self.options.dry_run {
            if let Some(dir) = self.options.dry_run_dir.as_deref() {
                let path = write_dry_run_file(dir, &title, new_text)?;
                debug!(path = %path.display(), "wrote dry-run output");
            }
            self.stats.would_save += 1;
            return Ok(EditOutcome::WouldSave);
        }

        if !skip_confirmation && !self.prompt.confirm(&request)? {
            self.stats.declined += 1;
            return Ok(EditOutcome::Declined);
        }

        let request = SaveRequest {
            title: &title,
            text: new_text,
            summary,
            bot: self.options.bot,
            base_timestamp: page.timestamp(),
        };
        match site.save_text(&request) {
            Ok(()) => {
                page.mark_saved(new_text);
                self.stats.saved += 1;
                debug!(title = title.as_str(), "saved edit");
                Ok(EditOutcome::Saved)
            }
            Err(SiteError::PageLocked) => {
                println!("Error: Unable to save edit at {title} because the page is protected.");
                Ok(self.refuse(EditRefusal::PageLocked))
            }
            Err(SiteError::EditConflict) => {
                println!("Error: Unable to save edit at {title} because it was changed by someone else.");
                Ok(self.refuse(EditRefusal::EditConflict))
            }
            Err(SiteError::DestinationExists) => {
                Err(anyhow::anyhow!("unexpected destination conflict while saving {title}"))
            }
            Err(SiteError::Transport(error)) => {
                Err(error.context(format!("failed to save {title}")))
            }
        }
    }

    /// Asks the operator a free-form question through the injected prompt.
    pub fn choose(&mut self, question: &str) -> Result<String> {
        self.prompt.choose(question)
    }

    fn refuse(&mut self, refusal: EditRefusal) -> EditOutcome {
        warn!(reason = %refusal, "edit refused");
        self.stats.refused += 1;
        EditOutcome::Refused(refusal)
    }
}

/// Unified line diff with one line of context around each change.
pub fn unified_diff(original: &str, modified: &str) -> String {
    let diff = TextDiff::from_lines(original, modified);
    let mut output = String::new();
    for hunk in diff
        .unified_diff()
        .context_radius(DIFF_CONTEXT_LINES)
        .iter_hunks()
    {
        output.push_str(&hunk.header().to_string());
        output.push('\n');
        for change in hunk.iter_changes() {
            let sign = match change.tag() {
                ChangeTag::Delete => "-",
                ChangeTag::Insert => "+",
                ChangeTag::Equal => " ",
            };
            output.push_str(sign);
            output.push_str(change.value());
            if change.missing_newline() {
                output.push('\n');
            }
        }
    }
    output
}

pub fn dry_run_file_name(title: &str) -> String {
    format!("{}.wiki", title.replace([' ', '/'], "_"))
}

fn write_dry_run_file(dir: &Path, title: &str, text: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(dry_run_file_name(title));
    fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}
