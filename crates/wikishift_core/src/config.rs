use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_URL: &str = "https://en.wiktionary.org/w/api.php";
pub const DEFAULT_USER_AGENT: &str = "wikishift/0.1";
pub const DEFAULT_TALK_MARKER: &str = " talk:";
pub const DEFAULT_AUTO_REDIRECT_PATTERN: &str = r"^Wiktionary:A[A-Z]{2,3}(-[A-Z]{3})?$";
pub const DEFAULT_DISPLAY_MAX: usize = 200;

/// Discussion venues, archives and votes quote historical titles on purpose.
/// Reconstruction pages are listed because `{{reconstructed}}` links every
/// reconstructed term to its language's guideline page.
pub const DEFAULT_SKIP_PREFIXES: &[&str] = &[
    "Talk:",
    "User:",
    "Reconstruction:",
    "Wiktionary:Beer parlour",
    "Wiktionary:Etymology scriptorium",
    "Wiktionary:Information desk",
    "Wiktionary:Grease pit",
    "Wiktionary:Tea room",
    "Wiktionary:Requests for ",
    "Wiktionary:Translation requests/archive",
    "Wiktionary:News for editors/Archive",
    "Wiktionary:Votes/",
    "Wiktionary:Language treatment requests",
];

pub const DEFAULT_CAT_ALIASES: &[&str] = &["categorize", "cat"];
pub const DEFAULT_CLN_ALIASES: &[&str] = &["catlangname", "cln"];
pub const DEFAULT_TOPIC_ALIASES: &[&str] = &["topics", "top", "C", "c"];

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ShiftConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub backlinks: BacklinksSection,
    #[serde(default)]
    pub categories: CategoriesSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub bot: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HttpSection {
    pub timeout_ms: Option<u64>,
    pub rate_limit_read_ms: Option<u64>,
    pub rate_limit_write_ms: Option<u64>,
    pub max_retries: Option<usize>,
    pub max_write_retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct BacklinksSection {
    pub skip_prefixes: Vec<String>,
    pub talk_marker: String,
    pub auto_redirect_pattern: String,
    pub namespace_aliases: BTreeMap<String, String>,
    pub display_max: usize,
}

impl Default for BacklinksSection {
    fn default() -> Self {
        Self {
            skip_prefixes: to_strings(DEFAULT_SKIP_PREFIXES),
            talk_marker: DEFAULT_TALK_MARKER.to_string(),
            auto_redirect_pattern: DEFAULT_AUTO_REDIRECT_PATTERN.to_string(),
            namespace_aliases: BTreeMap::from([("WT".to_string(), "Wiktionary".to_string())]),
            display_max: DEFAULT_DISPLAY_MAX,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CategoriesSection {
    pub cat_aliases: Vec<String>,
    pub cln_aliases: Vec<String>,
    pub topic_aliases: Vec<String>,
}

impl Default for CategoriesSection {
    fn default() -> Self {
        Self {
            cat_aliases: to_strings(DEFAULT_CAT_ALIASES),
            cln_aliases: to_strings(DEFAULT_CLN_ALIASES),
            topic_aliases: to_strings(DEFAULT_TOPIC_ALIASES),
        }
    }
}

impl ShiftConfig {
    /// Resolve the API URL: env WIKI_API_URL > config > DEFAULT_API_URL.
    pub fn api_url(&self) -> String {
        env_value("WIKI_API_URL")
            .or_else(|| self.wiki.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_value("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn bot(&self) -> bool {
        self.wiki.bot.unwrap_or(true)
    }
}

/// Bot credentials from WIKI_BOT_USER / WIKI_BOT_PASS, when both are set.
pub fn credentials_from_env() -> Option<(String, String)> {
    Some((env_value("WIKI_BOT_USER")?, env_value("WIKI_BOT_PASS")?))
}

/// Load and parse a ShiftConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ShiftConfig> {
    if !config_path.exists() {
        return Ok(ShiftConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ShiftConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

pub(crate) fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_uses_builtin_rules() {
        let config = ShiftConfig::default();
        assert!(config.wiki.api_url.is_none());
        assert!(config.bot());
        assert_eq!(config.backlinks.talk_marker, " talk:");
        assert_eq!(config.backlinks.display_max, 200);
        assert!(
            config
                .backlinks
                .skip_prefixes
                .iter()
                .any(|prefix| prefix == "Wiktionary:Votes/")
        );
        assert_eq!(
            config.backlinks.namespace_aliases.get("WT").map(String::as_str),
            Some("Wiktionary")
        );
        assert_eq!(config.categories.cln_aliases, vec!["catlangname", "cln"]);
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, ShiftConfig::default());
    }

    #[test]
    fn load_config_parses_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[wiki]
api_url = "https://example.wiki/api.php"
user_agent = "test-agent/1.0"
bot = false

[http]
rate_limit_write_ms = 500

[backlinks]
skip_prefixes = ["Talk:"]
display_max = 10

[categories]
topic_aliases = ["c"]
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(
            config.wiki.api_url.as_deref(),
            Some("https://example.wiki/api.php")
        );
        assert_eq!(config.wiki.user_agent.as_deref(), Some("test-agent/1.0"));
        assert!(!config.bot());
        assert_eq!(config.http.rate_limit_write_ms, Some(500));
        assert_eq!(config.backlinks.skip_prefixes, vec!["Talk:"]);
        assert_eq!(config.backlinks.display_max, 10);
        assert_eq!(config.backlinks.talk_marker, " talk:");
        assert_eq!(config.categories.topic_aliases, vec!["c"]);
        assert_eq!(config.categories.cat_aliases, vec!["categorize", "cat"]);
    }

    #[test]
    fn load_config_tolerates_unknown_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[paths]\nproject_root = \"/foo\"\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert!(config.wiki.api_url.is_none());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[wiki\napi_url = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }
}
