//! Page moves with subpage cascade and backlink updates.
//!
//! Each page walks `pending -> moved | skipped`, and a moved page then has its
//! backlinks rewritten unless the policy defers them. Subpages are found by
//! title prefix and moved one by one; the wiki's own subpage flag is never
//! used.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::backlinks::{BacklinkClassification, BacklinkRules, resolve_backlinks};
use crate::editor::{Confirm, Editor};
use crate::links::rewrite_links;
use crate::page::Page;
use crate::site::{SiteError, WikiSite, Writable};
use crate::wikitext::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BacklinkPolicy {
    #[default]
    All,
    RedirectsOnly,
    LinksOnly,
    None,
}

impl BacklinkPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::RedirectsOnly => "redirects-only",
            Self::LinksOnly => "links-only",
            Self::None => "none",
        }
    }

    fn allows(self, redirect: bool) -> bool {
        match self {
            Self::All => true,
            Self::RedirectsOnly => redirect,
            Self::LinksOnly => !redirect,
            Self::None => false,
        }
    }
}

impl fmt::Display for BacklinkPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BacklinkPolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "redirects-only" | "redirects" => Ok(Self::RedirectsOnly),
            "links-only" | "links" => Ok(Self::LinksOnly),
            "none" => Ok(Self::None),
            other => bail!(
                "unknown backlink policy `{other}` (expected all, redirects-only, links-only or none)"
            ),
        }
    }
}

/// Edit summaries for backlink updates. `None` falls back to a summary
/// naming the old and new titles.
#[derive(Debug, Clone, Default)]
pub struct UpdateReasons {
    pub redirect: Option<String>,
    pub link: Option<String>,
}

impl UpdateReasons {
    pub fn redirect_summary(&self, old_title: &str, new_title: &str) -> String {
        self.redirect
            .clone()
            .unwrap_or_else(|| format!("Moved {old_title} to {new_title}"))
    }

    pub fn link_summary(&self, new_title: &str) -> String {
        self.link
            .clone()
            .unwrap_or_else(|| format!("Updated links to [[{new_title}]]"))
    }
}

#[derive(Debug, Clone)]
pub struct MoveRequest {
    pub old_title: String,
    pub new_title: String,
    pub move_reason: String,
    pub reasons: UpdateReasons,
    pub backlinks: BacklinkPolicy,
    pub include_subpages: bool,
    /// Language whose own `Category:<lang> language` page is never rewritten.
    pub lang: Option<String>,
    /// Stop after this many page moves plus backlink edits.
    pub limit: Option<usize>,
}

impl MoveRequest {
    pub fn new(
        old_title: impl Into<String>,
        new_title: impl Into<String>,
        move_reason: impl Into<String>,
    ) -> Self {
        Self {
            old_title: old_title.into(),
            new_title: new_title.into(),
            move_reason: move_reason.into(),
            reasons: UpdateReasons::default(),
            backlinks: BacklinkPolicy::All,
            include_subpages: true,
            lang: None,
            limit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveState {
    Moved,
    /// The destination already existed, taken to mean an earlier run moved it.
    AlreadyMoved,
    WouldMove,
    Skipped,
}

impl MoveState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Moved => "moved",
            Self::AlreadyMoved => "already-moved",
            Self::WouldMove => "would-move",
            Self::Skipped => "skipped",
        }
    }

    fn is_moved(self) -> bool {
        !matches!(self, Self::Skipped)
    }

    fn is_action(self) -> bool {
        matches!(self, Self::Moved | Self::WouldMove)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BacklinkUpdate {
    pub updated: usize,
    pub not_updated: usize,
    pub ignored: usize,
}

impl BacklinkUpdate {
    pub fn absorb(&mut self, other: BacklinkUpdate) {
        self.updated += other.updated;
        self.not_updated += other.not_updated;
        self.ignored += other.ignored;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageMove {
    pub from: String,
    pub to: String,
    pub state: MoveState,
    /// `None` when backlinks were deferred or the page was skipped.
    pub backlinks: Option<BacklinkUpdate>,
}

impl PageMove {
    fn actions(&self) -> usize {
        usize::from(self.state.is_action()) + self.backlinks.map_or(0, |update| update.updated)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveReport {
    pub pages: Vec<PageMove>,
    pub limit_reached: bool,
}

impl MoveReport {
    pub fn count(&self, state: MoveState) -> usize {
        self.pages.iter().filter(|page| page.state == state).count()
    }

    pub fn backlinks(&self) -> BacklinkUpdate {
        let mut total = BacklinkUpdate::default();
        for update in self.pages.iter().filter_map(|page| page.backlinks) {
            total.absorb(update);
        }
        total
    }
}

/// Moves `request.old_title` and, unless disabled, every page under it, then
/// rewrites what links to each moved page according to the backlink policy.
pub fn advanced_move<S, P>(
    site: &mut S,
    editor: &mut Editor<P>,
    rules: &BacklinkRules,
    request: &MoveRequest,
) -> Result<MoveReport>
where
    S: WikiSite + ?Sized,
    P: Confirm,
{
    let mut report = MoveReport::default();
    let subpages = if request.include_subpages {
        let prefix = format!("{}/", request.old_title);
        site.prefixed_pages(&prefix)
            .with_context(|| format!("failed to list subpages of {}", request.old_title))?
    } else {
        Vec::new()
    };

    let prefix_len = request.old_title.len() + 1;
    let mut targets = vec![(request.old_title.clone(), request.new_title.clone())];
    targets.extend(subpages.into_iter().filter_map(|subpage| {
        let suffix = subpage.get(prefix_len..)?.to_string();
        Some((subpage, format!("{}/{suffix}", request.new_title)))
    }));

    let mut actions = 0;
    let reached = |actions: usize| request.limit.is_some_and(|limit| actions >= limit);
    for (from, to) in targets {
        if reached(actions) {
            break;
        }
        let remaining = request.limit.map(|limit| limit - actions);
        let page = move_one(site, editor, rules, request, &from, &to, remaining)?;
        actions += page.actions();
        report.pages.push(page);
    }
    report.limit_reached = reached(actions);
    if report.limit_reached {
        println!("Stopped after {actions} actions (limit reached).");
    }

    info!(
        title = request.old_title.as_str(),
        pages = report.pages.len(),
        "move finished"
    );
    Ok(report)
}

fn move_one<S, P>(
    site: &mut S,
    editor: &mut Editor<P>,
    rules: &BacklinkRules,
    request: &MoveRequest,
    from: &str,
    to: &str,
    remaining: Option<usize>,
) -> Result<PageMove>
where
    S: WikiSite + ?Sized,
    P: Confirm,
{
    let state = if editor.dry_run() {
        println!("Would move {from} to {to}.");
        MoveState::WouldMove
    } else {
        println!("Moving {from} to {to}.");
        match site.move_page(from, to, &request.move_reason) {
            Ok(()) => MoveState::Moved,
            Err(SiteError::DestinationExists) => {
                println!("Skipping {from} because {to} already exists.");
                MoveState::AlreadyMoved
            }
            Err(SiteError::PageLocked) => {
                println!("Warning: Skipping {from} because the page is protected (so it can't be moved).");
                MoveState::Skipped
            }
            Err(SiteError::EditConflict) => bail!("unexpected edit conflict while moving {from}"),
            Err(SiteError::Transport(error)) => {
                return Err(error.context(format!("failed to move {from} to {to}")));
            }
        }
    };

    let remaining = remaining.map(|remaining| remaining.saturating_sub(usize::from(state.is_action())));
    let wants_backlinks = state.is_moved() && request.backlinks != BacklinkPolicy::None;
    if wants_backlinks && remaining == Some(0) {
        println!("Note: Not updating backlinks of {from} because the limit was reached.");
    }
    let backlinks = if wants_backlinks && remaining != Some(0) {
        let classification = resolve_backlinks(site, from, request.lang.as_deref(), rules)?;
        Some(update_backlinks(
            site,
            editor,
            rules,
            &classification,
            to,
            request.backlinks,
            &request.reasons,
            remaining,
        )?)
    } else {
        None
    };

    Ok(PageMove {
        from: from.to_string(),
        to: to.to_string(),
        state,
        backlinks,
    })
}

/// Rewrites the actionable backlinks in `classification` so that links to
/// their target point at `new_title`. Auto-approved pages are saved without
/// confirmation. At most `limit` pages are changed.
#[allow(clippy::too_many_arguments)]
pub fn update_backlinks<S, P>(
    site: &mut S,
    editor: &mut Editor<P>,
    rules: &BacklinkRules,
    classification: &BacklinkClassification,
    new_title: &str,
    policy: BacklinkPolicy,
    reasons: &UpdateReasons,
    limit: Option<usize>,
) -> Result<BacklinkUpdate>
where
    S: Writable + ?Sized,
    P: Confirm,
{
    let mut update = BacklinkUpdate::default();
    for (backlink, _) in &classification.skipped {
        debug!(title = backlink.title.as_str(), "backlink left alone");
    }
    update.ignored += classification.skipped.len();

    for (backlink, auto) in classification.actionable() {
        if limit.is_some_and(|limit| update.updated >= limit) {
            break;
        }
        let old_title = backlink.target.as_str();
        let mut page = Page::load(site, &backlink.title)?;
        if !page.exists() {
            update.ignored += 1;
            continue;
        }
        if !policy.allows(page.is_redirect()) {
            update.ignored += 1;
            continue;
        }

        let mut document = Document::parse(page.baseline());
        if rewrite_links(&mut document, old_title, new_title, rules.aliases()) == 0 {
            println!(
                "\tNote: [[{}]] does not link to [[{old_title}]] literally; it needs a manual look.",
                backlink.title
            );
            update.not_updated += 1;
            continue;
        }
        let summary = if page.is_redirect() {
            reasons.redirect_summary(old_title, new_title)
        } else {
            reasons.link_summary(new_title)
        };
        let new_text = document.into_text();
        let outcome = editor.edit(site, &mut page, &new_text, &summary, auto)?;
        if outcome.is_applied() {
            update.updated += 1;
        } else {
            println!(
                "\tWarning: Did not update the link to [[{old_title}]] at [[{}]].",
                backlink.title
            );
            update.not_updated += 1;
        }
    }
    Ok(update)
}
