//! Backlink discovery and classification.
//!
//! Every page linking to a moved title lands in exactly one bucket: skipped,
//! auto-approved redirect or link, or manual redirect or link. Auto-approved
//! pages are rewritten without asking; manual ones need confirmation.

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::config::BacklinksSection;
use crate::links::NamespaceAliases;
use crate::site::{CATEGORY_PREFIX, LinkingPage, NS_MODULE, NS_TEMPLATE, Readable, namespace_of};

const DOCUMENTATION_SUFFIX: &str = "/documentation";

#[derive(Debug, Clone)]
pub struct BacklinkRules {
    skip_prefixes: Vec<String>,
    talk_marker: String,
    auto_pattern: Regex,
    aliases: NamespaceAliases,
    display_max: usize,
}

impl BacklinkRules {
    pub fn from_config(section: &BacklinksSection) -> Result<Self> {
        let auto_pattern = Regex::new(&section.auto_redirect_pattern).with_context(|| {
            format!(
                "invalid auto_redirect_pattern {:?}",
                section.auto_redirect_pattern
            )
        })?;
        Ok(Self {
            skip_prefixes: section.skip_prefixes.clone(),
            talk_marker: section.talk_marker.clone(),
            auto_pattern,
            aliases: NamespaceAliases::new(section.namespace_aliases.clone()),
            display_max: section.display_max,
        })
    }

    pub fn aliases(&self) -> &NamespaceAliases {
        &self.aliases
    }

    pub fn display_max(&self) -> usize {
        self.display_max
    }

    pub fn skip_reason(&self, title: &str, lang: Option<&str>) -> Option<SkipReason> {
        if self
            .skip_prefixes
            .iter()
            .any(|prefix| title.starts_with(prefix.as_str()))
        {
            return Some(SkipReason::Allowlisted);
        }
        if !self.talk_marker.is_empty() && title.contains(self.talk_marker.as_str()) {
            return Some(SkipReason::TalkPage);
        }
        if let Some(lang) = lang
            && title == format!("{CATEGORY_PREFIX}{lang} language")
        {
            return Some(SkipReason::OwnLanguageCategory);
        }
        if is_template_source(title) {
            return Some(SkipReason::TemplateSource);
        }
        None
    }

    pub fn is_auto_approved(&self, title: &str) -> bool {
        self.auto_pattern.is_match(title)
    }
}

/// Templates and modules may build links out of parameters, so their text is
/// never rewritten blindly. Their documentation subpages are ordinary text.
pub fn is_template_source(title: &str) -> bool {
    matches!(namespace_of(title), NS_TEMPLATE | NS_MODULE) && !title.ends_with(DOCUMENTATION_SUFFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Allowlisted,
    TalkPage,
    OwnLanguageCategory,
    TemplateSource,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allowlisted => "allow-listed prefix",
            Self::TalkPage => "talk page",
            Self::OwnLanguageCategory => "own language category",
            Self::TemplateSource => "template or module",
        }
    }
}

/// A page that links to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backlink {
    pub title: String,
    pub target: String,
    pub redirect: bool,
}

impl Backlink {
    pub fn new(linking: LinkingPage, target: &str) -> Self {
        Self {
            title: linking.title,
            target: target.to_string(),
            redirect: linking.redirect,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BacklinkClassification {
    pub auto_redirects: Vec<Backlink>,
    pub manual_redirects: Vec<Backlink>,
    pub auto_links: Vec<Backlink>,
    pub manual_links: Vec<Backlink>,
    pub skipped: Vec<(Backlink, SkipReason)>,
}

impl BacklinkClassification {
    pub fn len(&self) -> usize {
        self.auto_redirects.len()
            + self.manual_redirects.len()
            + self.auto_links.len()
            + self.manual_links.len()
            + self.skipped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Backlinks that are eligible for rewriting, paired with whether they
    /// were auto-approved.
    pub fn actionable(&self) -> impl Iterator<Item = (&Backlink, bool)> {
        self.auto_redirects
            .iter()
            .chain(self.auto_links.iter())
            .map(|backlink| (backlink, true))
            .chain(
                self.manual_redirects
                    .iter()
                    .chain(self.manual_links.iter())
                    .map(|backlink| (backlink, false)),
            )
    }

    pub fn actionable_count(&self) -> usize {
        self.len() - self.skipped.len()
    }

    pub fn extend(&mut self, other: BacklinkClassification) {
        self.auto_redirects.extend(other.auto_redirects);
        self.manual_redirects.extend(other.manual_redirects);
        self.auto_links.extend(other.auto_links);
        self.manual_links.extend(other.manual_links);
        self.skipped.extend(other.skipped);
    }
}

pub fn classify_backlinks(
    backlinks: Vec<Backlink>,
    lang: Option<&str>,
    rules: &BacklinkRules,
) -> BacklinkClassification {
    let mut classification = BacklinkClassification::default();
    for backlink in backlinks {
        if let Some(reason) = rules.skip_reason(&backlink.title, lang) {
            classification.skipped.push((backlink, reason));
            continue;
        }
        let auto = rules.is_auto_approved(&backlink.title);
        let bucket = match (backlink.redirect, auto) {
            (true, true) => &mut classification.auto_redirects,
            (true, false) => &mut classification.manual_redirects,
            (false, true) => &mut classification.auto_links,
            (false, false) => &mut classification.manual_links,
        };
        bucket.push(backlink);
    }
    classification
}

/// Direct backlinks of `target`; pages that only reach it through a redirect
/// are left out because their own links do not name `target`.
pub fn collect_backlinks<S: Readable + ?Sized>(site: &mut S, target: &str) -> Result<Vec<Backlink>> {
    let linking = site
        .backlinks(target, false)
        .with_context(|| format!("failed to list backlinks of {target}"))?;
    debug!(target, count = linking.len(), "listed backlinks");
    Ok(linking
        .into_iter()
        .map(|page| Backlink::new(page, target))
        .collect())
}

pub fn resolve_backlinks<S: Readable + ?Sized>(
    site: &mut S,
    target: &str,
    lang: Option<&str>,
    rules: &BacklinkRules,
) -> Result<BacklinkClassification> {
    let backlinks = collect_backlinks(site, target)?;
    Ok(classify_backlinks(backlinks, lang, rules))
}

/// Backlinks of `target` and of every page under `target/`, each entry
/// keeping the title it links to.
pub fn resolve_backlinks_with_subpages<S: Readable + ?Sized>(
    site: &mut S,
    target: &str,
    lang: Option<&str>,
    rules: &BacklinkRules,
) -> Result<Vec<(String, BacklinkClassification)>> {
    let mut titles = vec![target.to_string()];
    titles.extend(
        site.prefixed_pages(&format!("{target}/"))
            .with_context(|| format!("failed to list subpages of {target}"))?,
    );
    let mut out = Vec::with_capacity(titles.len());
    for title in titles {
        let classification = resolve_backlinks(site, &title, lang, rules)?;
        out.push((title, classification));
    }
    Ok(out)
}

/// Operator listing of the actionable backlinks of `target`.
pub fn print_backlinks(target: &str, classification: &BacklinkClassification, display_max: usize) {
    for (backlink, reason) in &classification.skipped {
        if reason == &SkipReason::TemplateSource {
            println!(
                "Warning: [[{}]] links to [[{target}]], but it is a template or module and will not be edited.",
                backlink.title
            );
        }
    }
    let actionable: Vec<_> = classification.actionable().collect();
    if actionable.is_empty() {
        println!("[[{target}]] has no relevant backlinks.");
        return;
    }
    println!("[[{target}]] has the following relevant backlinks:");
    for (backlink, auto) in actionable.iter().take(display_max) {
        let mut tags = Vec::new();
        if backlink.redirect {
            tags.push("redirect");
        }
        if *auto {
            tags.push("auto");
        }
        if tags.is_empty() {
            println!("\t{}", backlink.title);
        } else {
            println!("\t{} ({})", backlink.title, tags.join(", "));
        }
    }
    if actionable.len() > display_max {
        println!(
            "Warning: {} more backlinks not shown.",
            actionable.len() - display_max
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Backlink, SkipReason, classify_backlinks, is_template_source,
        resolve_backlinks, resolve_backlinks_with_subpages,
    };
    use crate::test_support::{MemorySite, default_rules};

    fn backlink(title: &str, redirect: bool) -> Backlink {
        Backlink {
            title: title.to_string(),
            target: "Wiktionary:About Latin".to_string(),
            redirect,
        }
    }

    #[test]
    fn talk_pages_are_always_skipped() {
        let rules = default_rules();
        for lang in [None, Some("English"), Some("Latin")] {
            let result = classify_backlinks(vec![backlink("Talk:Foo", false)], lang, &rules);
            assert_eq!(result.skipped.len(), 1);
            assert_eq!(result.skipped[0].1, SkipReason::Allowlisted);
        }
        let result = classify_backlinks(
            vec![backlink("Wiktionary talk:About Latin", false)],
            None,
            &rules,
        );
        assert_eq!(result.skipped[0].1, SkipReason::TalkPage);
    }

    #[test]
    fn own_language_category_is_skipped() {
        let rules = default_rules();
        let result = classify_backlinks(
            vec![
                backlink("Category:Latin language", false),
                backlink("Category:Greek language", false),
            ],
            Some("Latin"),
            &rules,
        );
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].1, SkipReason::OwnLanguageCategory);
        assert_eq!(result.manual_links.len(), 1);
    }

    #[test]
    fn templates_are_excluded_but_documentation_is_not() {
        assert!(is_template_source("Template:la-noun"));
        assert!(is_template_source("Module:la-verb"));
        assert!(!is_template_source("Template:la-noun/documentation"));
        assert!(is_template_source("T:la-noun"));
        assert!(!is_template_source("Templates of Latin"));

        let rules = default_rules();
        let result = classify_backlinks(
            vec![
                backlink("Template:la-noun", false),
                backlink("Template:la-noun/documentation", false),
            ],
            None,
            &rules,
        );
        assert_eq!(result.skipped[0].1, SkipReason::TemplateSource);
        assert_eq!(result.manual_links[0].title, "Template:la-noun/documentation");
    }

    #[test]
    fn language_code_redirects_are_auto_approved() {
        let rules = default_rules();
        let result = classify_backlinks(
            vec![
                backlink("Wiktionary:ALA", true),
                backlink("Wiktionary:AGRC-ABC", true),
                backlink("Wiktionary:About", true),
                backlink("Wiktionary:ALA", false),
            ],
            None,
            &rules,
        );
        assert_eq!(result.auto_redirects.len(), 2);
        assert_eq!(result.manual_redirects.len(), 1);
        assert_eq!(result.auto_links.len(), 1);
    }

    #[test]
    fn buckets_partition_the_input() {
        let rules = default_rules();
        let input = vec![
            backlink("Talk:Foo", false),
            backlink("User:Someone/sandbox", false),
            backlink("Wiktionary:Beer parlour/2020", false),
            backlink("Template:la", false),
            backlink("Wiktionary:ALA", true),
            backlink("Wiktionary:ALA/B", false),
            backlink("Wiktionary:Old Latin", true),
            backlink("amo", false),
            backlink("Category:Latin language", false),
        ];
        let total = input.len();
        let result = classify_backlinks(input.clone(), Some("Latin"), &rules);
        assert_eq!(result.len(), total);

        let mut seen: Vec<&str> = result
            .auto_redirects
            .iter()
            .chain(&result.manual_redirects)
            .chain(&result.auto_links)
            .chain(&result.manual_links)
            .map(|backlink| backlink.title.as_str())
            .chain(result.skipped.iter().map(|(backlink, _)| backlink.title.as_str()))
            .collect();
        seen.sort_unstable();
        let mut expected: Vec<&str> = input.iter().map(|backlink| backlink.title.as_str()).collect();
        expected.sort_unstable();
        assert_eq!(seen, expected);
    }

    #[test]
    fn resolve_reads_backlinks_from_site() {
        let mut site = MemorySite::default();
        site.insert("Foo", "target");
        site.insert("Foo/A", "sub");
        site.insert("Bar", "see [[Foo]]");
        site.insert("Baz", "#REDIRECT [[Foo]]");
        site.insert("Qux", "see [[Foo/A]]");
        site.insert("Talk:Bar", "[[Foo]]");

        let rules = default_rules();
        let result = resolve_backlinks(&mut site, "Foo", None, &rules).expect("resolve");
        assert_eq!(result.manual_links.len(), 1);
        assert_eq!(result.manual_redirects.len(), 1);
        assert_eq!(result.skipped.len(), 1);

        let nested =
            resolve_backlinks_with_subpages(&mut site, "Foo", None, &rules).expect("resolve");
        assert_eq!(nested.len(), 2);
        assert_eq!(nested[1].0, "Foo/A");
        assert_eq!(nested[1].1.manual_links[0].title, "Qux");
        assert_eq!(nested[1].1.manual_links[0].target, "Foo/A");
    }
}
