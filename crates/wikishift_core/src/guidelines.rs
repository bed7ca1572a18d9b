//! Renames `Wiktionary:About <Lang>` pages to `Wiktionary:<Lang> entry
//! guidelines`, one language at a time, with the operator deciding per page.

use anyhow::{Context, Result};
use tracing::info;

use crate::backlinks::{
    BacklinkClassification, BacklinkRules, print_backlinks, resolve_backlinks_with_subpages,
};
use crate::editor::{Confirm, Editor};
use crate::links::NamespaceAliases;
use crate::moves::{
    BacklinkPolicy, BacklinkUpdate, MoveRequest, MoveState, UpdateReasons, advanced_move,
    update_backlinks,
};
use crate::page::Page;
use crate::site::WikiSite;
use crate::wikitext::Document;

pub const LANGUAGE_CONSIDERATIONS_CATEGORY: &str = "Category:Wiktionary language considerations";
pub const MOVE_SUMMARY: &str = "Moved to match the title of [[Wiktionary:English entry guidelines]] per [[Wiktionary talk:English entry guidelines#RFM discussion: November 2015–August 2018|old RFM]] and [[Wiktionary:Requests for moves, mergers and splits#Wiktionary:English entry guidelines vs \"About (language)\" in every other language|new RFM]]";
pub const REDIRECT_SUMMARY: &str = "Moved target to match the title of [[Wiktionary:English entry guidelines]] per [[Wiktionary talk:English entry guidelines#RFM discussion: November 2015–August 2018|old RFM]] and [[Wiktionary:Requests for moves, mergers and splits#Wiktionary:English entry guidelines vs \"About (language)\" in every other language|new RFM]]";
pub const SORT_KEY_SUMMARY: &str = "Removed redundant sort key";

const OLD_PREFIX: &str = "Wiktionary:About ";
const DONE_SUFFIX: &str = " entry guidelines";
const BANNED_TITLE_PARTS: &[&str] = &["/", "language", "script", "transliteration"];
const ACTION_QUESTION: &str = "What now? (m = move it and update backlinks; s = skip; q = quit)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    AlreadyDone,
    UnexpectedTitle,
    NotTitlecased(String),
    SkippedByOperator(String),
    Language(String),
}

/// Decides whether a member of the language considerations category is a
/// page this campaign should rename.
pub fn candidate(title: &str, skip: &[String]) -> Candidate {
    if title.ends_with(DONE_SUFFIX) {
        return Candidate::AlreadyDone;
    }
    let lowered = title.to_lowercase();
    let Some(lang) = title.strip_prefix(OLD_PREFIX) else {
        return Candidate::UnexpectedTitle;
    };
    if BANNED_TITLE_PARTS.iter().any(|part| lowered.contains(part)) {
        return Candidate::UnexpectedTitle;
    }
    if skip.iter().any(|skipped| skipped == lang) {
        return Candidate::SkippedByOperator(lang.to_string());
    }
    if lang
        .split_whitespace()
        .any(|word| word.chars().next().is_some_and(char::is_lowercase))
    {
        return Candidate::NotTitlecased(lang.to_string());
    }
    Candidate::Language(lang.to_string())
}

pub fn new_title_for(lang: &str) -> String {
    format!("Wiktionary:{lang}{DONE_SUFFIX}")
}

/// `Wiktionary:About Latin/Nouns` maps to `Wiktionary:Latin entry guidelines/Nouns`.
fn renamed_target(target: &str, old_title: &str, new_title: &str) -> String {
    match target
        .strip_prefix(old_title)
        .and_then(|rest| rest.strip_prefix('/'))
    {
        Some(suffix) if !suffix.is_empty() => format!("{new_title}/{suffix}"),
        _ => new_title.to_string(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct CampaignOptions {
    pub skip: Vec<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CampaignReport {
    pub moved: usize,
    pub skipped: usize,
    pub sort_keys_removed: usize,
    pub backlinks: BacklinkUpdate,
    pub quit: bool,
}

fn print_all(groups: &[(String, BacklinkClassification)], display_max: usize) {
    for (target, classification) in groups {
        print_backlinks(target, classification, display_max);
    }
}

pub fn run_campaign<S, P>(
    site: &mut S,
    editor: &mut Editor<P>,
    rules: &BacklinkRules,
    options: &CampaignOptions,
) -> Result<CampaignReport>
where
    S: WikiSite + ?Sized,
    P: Confirm,
{
    let members = site
        .category_members(LANGUAGE_CONSIDERATIONS_CATEGORY)
        .with_context(|| format!("failed to list members of {LANGUAGE_CONSIDERATIONS_CATEGORY}"))?;
    let mut report = CampaignReport::default();

    for title in members {
        if options.limit.is_some_and(|limit| report.moved >= limit) {
            break;
        }
        let lang = match candidate(&title, &options.skip) {
            Candidate::Language(lang) => lang,
            Candidate::AlreadyDone | Candidate::SkippedByOperator(_) => continue,
            Candidate::UnexpectedTitle => {
                println!("Note: Skipping [[{title}]] because its title does not fit the expected pattern.");
                continue;
            }
            Candidate::NotTitlecased(_) => {
                println!("Note: Skipping [[{title}]] because its language would not be titlecased.");
                continue;
            }
        };
        let new_title = new_title_for(&lang);

        let groups = resolve_backlinks_with_subpages(site, &title, Some(&lang), rules)?;
        print_all(&groups, rules.display_max());
        let answer = editor.choose(ACTION_QUESTION)?.trim().to_lowercase();
        if answer.starts_with('s') {
            report.skipped += 1;
            continue;
        }
        if !answer.starts_with('m') {
            report.quit = true;
            break;
        }

        let mut request = MoveRequest::new(&title, &new_title, MOVE_SUMMARY);
        request.backlinks = BacklinkPolicy::None;
        request.lang = Some(lang.clone());
        let moved = advanced_move(site, editor, rules, &request)?;
        if moved.pages.first().map(|page| page.state) == Some(MoveState::Skipped) {
            println!("Warning: Skipping [[{title}]] because the page is protected (so it can't be moved).");
            report.skipped += 1;
            continue;
        }
        report.moved += 1;

        let reasons = UpdateReasons {
            redirect: Some(REDIRECT_SUMMARY.to_string()),
            link: None,
        };
        for (target, classification) in &groups {
            let new_target = renamed_target(target, &title, &new_title);
            let update = update_backlinks(
                site,
                editor,
                rules,
                classification,
                &new_target,
                BacklinkPolicy::All,
                &reasons,
                None,
            )?;
            report.backlinks.absorb(update);
            println!();
        }

        let guideline_title = if editor.dry_run() { &title } else { &new_title };
        if remove_redundant_sort_key(site, editor, guideline_title, &lang, rules.aliases())? {
            report.sort_keys_removed += 1;
        }

        let remaining = resolve_backlinks_with_subpages(site, &title, Some(&lang), rules)?;
        print_all(&remaining, rules.display_max());
        println!();
    }

    info!(
        moved = report.moved,
        skipped = report.skipped,
        quit = report.quit,
        "guidelines campaign finished"
    );
    Ok(report)
}

/// Drops the category sort key of the guideline page when it only repeats the
/// language name. A key such as `Dutch, Middle` carries information and stays.
pub fn remove_redundant_sort_key<S, P>(
    site: &mut S,
    editor: &mut Editor<P>,
    title: &str,
    lang: &str,
    aliases: &NamespaceAliases,
) -> Result<bool>
where
    S: WikiSite + ?Sized,
    P: Confirm,
{
    let mut page = Page::load(site, title)?;
    let mut document = Document::parse(page.baseline());
    let Some(link) = document.wikilinks().into_iter().find(|link| {
        !link.title.starts_with(':')
            && aliases.canonical(&link.title) == LANGUAGE_CONSIDERATIONS_CATEGORY
    }) else {
        println!("Warning: Unable to find category link in [[{title}]] to [[{LANGUAGE_CONSIDERATIONS_CATEGORY}]].");
        return Ok(false);
    };
    let Some(sort_key) = link.text.as_deref() else {
        return Ok(false);
    };
    if sort_key.trim_end() != lang {
        println!(
            "Note: The sort key used at [[{title}]] is \"{sort_key}\", which does not match the language ({lang}), so it stays."
        );
        return Ok(false);
    }
    document.splice(link.span, &format!("[[{LANGUAGE_CONSIDERATIONS_CATEGORY}]]"));
    let new_text = document.into_text();
    Ok(editor
        .edit(site, &mut page, &new_text, SORT_KEY_SUMMARY, true)?
        .is_applied())
}

#[cfg(test)]
mod tests {
    use super::{
        Candidate, LANGUAGE_CONSIDERATIONS_CATEGORY, CampaignOptions, REDIRECT_SUMMARY,
        SORT_KEY_SUMMARY, candidate, renamed_target, run_campaign,
    };
    use crate::editor::{Editor, EditorOptions};
    use crate::test_support::{MemorySite, ScriptedPrompt, default_rules};

    #[test]
    fn candidates_follow_title_rules() {
        let skip = vec!["Finnish".to_string()];
        assert_eq!(candidate("Wiktionary:About Latin", &skip), Candidate::Language("Latin".to_string()));
        assert_eq!(
            candidate("Wiktionary:Latin entry guidelines", &skip),
            Candidate::AlreadyDone
        );
        assert_eq!(candidate("Wiktionary:About Latin/Nouns", &skip), Candidate::UnexpectedTitle);
        assert_eq!(candidate("Wiktionary:About sign languages", &skip), Candidate::UnexpectedTitle);
        assert_eq!(candidate("Wiktionary:About Cyrillic script", &skip), Candidate::UnexpectedTitle);
        assert_eq!(candidate("Wiktionary:Style guide", &skip), Candidate::UnexpectedTitle);
        assert_eq!(
            candidate("Wiktionary:About Finnish", &skip),
            Candidate::SkippedByOperator("Finnish".to_string())
        );
        assert_eq!(
            candidate("Wiktionary:About Kurdish dialects", &skip),
            Candidate::NotTitlecased("Kurdish dialects".to_string())
        );
    }

    #[test]
    fn subpage_targets_map_under_new_title() {
        assert_eq!(
            renamed_target(
                "Wiktionary:About Latin/Nouns",
                "Wiktionary:About Latin",
                "Wiktionary:Latin entry guidelines"
            ),
            "Wiktionary:Latin entry guidelines/Nouns"
        );
        assert_eq!(
            renamed_target(
                "Wiktionary:About Latin",
                "Wiktionary:About Latin",
                "Wiktionary:Latin entry guidelines"
            ),
            "Wiktionary:Latin entry guidelines"
        );
    }

    fn campaign_site() -> MemorySite {
        let mut site = MemorySite::default();
        site.insert(
            "Wiktionary:About Latin",
            &format!("Guidelines.\n[[{LANGUAGE_CONSIDERATIONS_CATEGORY}|Latin ]]\n"),
        );
        site.insert("Wiktionary:About Latin/Nouns", "Noun rules.");
        site.insert("Wiktionary:ALA", "#REDIRECT [[Wiktionary:About Latin]]");
        site.insert("amo", "See [[Wiktionary:About Latin/Nouns|noun rules]].");
        site.insert("Talk:amo", "[[Wiktionary:About Latin]]");
        site.add_member(LANGUAGE_CONSIDERATIONS_CATEGORY, "Wiktionary:About Latin");
        site.add_member(LANGUAGE_CONSIDERATIONS_CATEGORY, "Wiktionary:English entry guidelines");
        site
    }

    #[test]
    fn campaign_moves_page_and_rewrites_backlinks() {
        let mut site = campaign_site();
        let mut editor = Editor::new(
            EditorOptions::default(),
            ScriptedPrompt::with_answers(&["m", "y"]),
        );
        let report = run_campaign(
            &mut site,
            &mut editor,
            &default_rules(),
            &CampaignOptions::default(),
        )
        .expect("campaign");

        assert_eq!(report.moved, 1);
        assert_eq!(report.sort_keys_removed, 1);
        assert_eq!(
            site.text("Wiktionary:Latin entry guidelines"),
            Some(format!("Guidelines.\n[[{LANGUAGE_CONSIDERATIONS_CATEGORY}]]\n").as_str())
        );
        assert_eq!(site.text("Wiktionary:Latin entry guidelines/Nouns"), Some("Noun rules."));
        assert_eq!(
            site.text("Wiktionary:ALA"),
            Some("#REDIRECT [[Wiktionary:Latin entry guidelines]]")
        );
        assert_eq!(
            site.text("amo"),
            Some("See [[Wiktionary:Latin entry guidelines/Nouns|noun rules]].")
        );
        assert_eq!(site.text("Talk:amo"), Some("[[Wiktionary:About Latin]]"));
        assert!(site.saves.iter().any(|save| save.summary == REDIRECT_SUMMARY));
        assert!(site.saves.iter().any(|save| save.summary == SORT_KEY_SUMMARY));
    }

    #[test]
    fn quitting_stops_before_any_change() {
        let mut site = campaign_site();
        let mut editor = Editor::new(EditorOptions::default(), ScriptedPrompt::with_answers(&["q"]));
        let report = run_campaign(
            &mut site,
            &mut editor,
            &default_rules(),
            &CampaignOptions::default(),
        )
        .expect("campaign");
        assert!(report.quit);
        assert!(site.moves.is_empty());
        assert!(site.saves.is_empty());
    }
}
