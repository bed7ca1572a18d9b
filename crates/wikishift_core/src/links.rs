use std::collections::BTreeMap;

use tracing::debug;

use crate::wikitext::Document;

/// Short namespace prefixes that stand in for a canonical one, e.g. `WT` for
/// `Wiktionary`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceAliases {
    aliases: BTreeMap<String, String>,
}

impl Default for NamespaceAliases {
    fn default() -> Self {
        Self::new(BTreeMap::from([(
            "WT".to_string(),
            "Wiktionary".to_string(),
        )]))
    }
}

impl NamespaceAliases {
    pub fn new(aliases: BTreeMap<String, String>) -> Self {
        Self { aliases }
    }

    /// Title with one escaping `:` removed, underscores read as spaces and an
    /// aliased namespace prefix expanded.
    pub fn canonical(&self, title: &str) -> String {
        let title = title.trim();
        let title = title.strip_prefix(':').unwrap_or(title);
        let title = crate::wikitext::collapse_whitespace(&title.replace('_', " "));
        if let Some((prefix, rest)) = title.split_once(':')
            && let Some(canonical) = self.aliases.get(prefix.trim())
        {
            return format!("{canonical}:{rest}");
        }
        title
    }
}

/// Part of a title after its namespace prefix, or the whole title when it has
/// none.
pub fn strip_namespace(title: &str) -> &str {
    title.split_once(':').map(|(_, rest)| rest).unwrap_or(title)
}

/// Points every wikilink targeting `old_title` at `new_title` and returns how
/// many links changed.
///
/// Display text that merely repeats the old title without its namespace is
/// rewritten along with the target. Any other display text is left alone, as
/// are `#fragment` parts and a leading escaping `:`.
pub fn rewrite_links(
    document: &mut Document,
    old_title: &str,
    new_title: &str,
    aliases: &NamespaceAliases,
) -> usize {
    let old_canonical = aliases.canonical(old_title);
    let derived_old = strip_namespace(old_title);
    let derived_new = strip_namespace(new_title);

    let mut edits = Vec::new();
    let mut count = 0;
    for link in document.wikilinks() {
        if aliases.canonical(&link.title) != old_canonical {
            continue;
        }
        count += 1;
        let escaped = link.title.starts_with(':');
        let target = if escaped {
            format!(":{new_title}")
        } else {
            new_title.to_string()
        };
        if let (Some(text), Some(text_span)) = (link.text.as_deref(), link.text_span.clone())
            && !text.is_empty()
            && text == derived_old
        {
            edits.push((text_span, derived_new.to_string()));
        }
        edits.push((link.title_span.clone(), target));
    }

    edits.sort_by(|left, right| right.0.start.cmp(&left.0.start));
    for (range, replacement) in edits {
        document.splice(range, &replacement);
    }
    debug!(old_title, new_title, count, "rewrote wikilinks");
    count
}
