use std::collections::BTreeMap;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ShiftConfig, env_value};
use crate::site::{
    Categorized, LinkingPage, LoadedText, Movable, NS_MAIN, Readable, SaveRequest, SiteError,
    Writable, with_category_prefix,
};

const QUERY_LIMIT: &str = "max";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl ClientConfig {
    /// Environment overrides the config file, which overrides the built-in defaults.
    pub fn from_config(config: &ShiftConfig) -> Self {
        let http = &config.http;
        Self {
            api_url: config.api_url(),
            user_agent: config.user_agent(),
            timeout_ms: env_number("WIKI_HTTP_TIMEOUT_MS").or(http.timeout_ms).unwrap_or(30_000),
            rate_limit_read_ms: env_number("WIKI_RATE_LIMIT_READ")
                .or(http.rate_limit_read_ms)
                .unwrap_or(300),
            rate_limit_write_ms: env_number("WIKI_RATE_LIMIT_WRITE")
                .or(http.rate_limit_write_ms)
                .unwrap_or(1_000),
            max_retries: env_number("WIKI_HTTP_RETRIES").or(http.max_retries).unwrap_or(2),
            max_write_retries: env_number("WIKI_HTTP_WRITE_RETRIES")
                .or(http.max_write_retries)
                .unwrap_or(1),
            retry_delay_ms: env_number("WIKI_HTTP_RETRY_DELAY_MS")
                .or(http.retry_delay_ms)
                .unwrap_or(500),
        }
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_value(key).and_then(|value| value.parse().ok())
}

/// An `error` object returned by the API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("MediaWiki API error [{code}]: {info}")]
pub struct ApiError {
    pub code: String,
    pub info: String,
}

/// Maps API refusals onto the outcomes callers act on; anything else is a
/// transport failure.
pub fn site_error(error: anyhow::Error) -> SiteError {
    let Some(code) = error.downcast_ref::<ApiError>().map(|api| api.code.as_str()) else {
        return SiteError::Transport(error);
    };
    match code {
        "protectedpage"
        | "cascadeprotected"
        | "protectednamespace"
        | "protectednamespace-interface"
        | "protectedtitle"
        | "cantmove-titleprotected"
        | "immobilenamespace"
        | "permissiondenied" => SiteError::PageLocked,
        "articleexists" | "redirectexists" | "selfmove" => SiteError::DestinationExists,
        "editconflict" => SiteError::EditConflict,
        _ => SiteError::Transport(error),
    }
}

/// Case-folded namespace names and aliases to their ids.
#[derive(Debug, Clone, Default)]
pub struct NamespaceIds {
    ids: BTreeMap<String, i32>,
}

impl NamespaceIds {
    pub fn insert(&mut self, name: &str, id: i32) {
        let key = name.replace('_', " ").trim().to_lowercase();
        if !key.is_empty() {
            self.ids.insert(key, id);
        }
    }

    pub fn from_siteinfo(payload: &Value) -> Result<Self> {
        let parsed: SiteInfoResponse = serde_json::from_value(payload.clone())
            .context("failed to decode siteinfo response")?;
        let mut ids = Self::default();
        for namespace in parsed.query.namespaces.into_values() {
            ids.insert(&namespace.name, namespace.id);
            if let Some(canonical) = &namespace.canonical {
                ids.insert(canonical, namespace.id);
            }
        }
        for alias in parsed.query.namespacealiases {
            ids.insert(&alias.alias, alias.id);
        }
        Ok(ids)
    }

    /// Namespace id and in-namespace remainder of `title`. Unknown prefixes
    /// belong to the main namespace.
    pub fn split<'a>(&self, title: &'a str) -> (i32, &'a str) {
        if let Some((prefix, rest)) = title.split_once(':')
            && let Some(id) = self.ids.get(&prefix.replace('_', " ").trim().to_lowercase())
        {
            return (*id, rest.trim_start());
        }
        (NS_MAIN, title)
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: ClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
    namespaces: Option<NamespaceIds>,
}

impl MediaWikiClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
            namespaces: None,
        })
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    pub fn api_url(&self) -> &str {
        &self.config.api_url
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let token_response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.request_json_post(
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
            true,
        )?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.csrf_token = None;
                info!(user = username, "logged in");
                Ok(())
            }
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    fn request_pairs(params: &[(&str, String)]) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push(((*key).to_string(), value.clone()));
            }
        }
        pairs
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let base_url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", self.config.api_url))?;
        let pairs = Self::request_pairs(params);

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit(false);
            let response = self
                .client
                .get(base_url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .query(&pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, false);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }
                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    return check_api_error(payload);
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, false);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn request_json_post(&mut self, params: &[(&str, String)], is_write: bool) -> Result<Value> {
        let max_retries = if is_write {
            self.config.max_write_retries
        } else {
            self.config.max_retries
        };
        let pairs = Self::request_pairs(params);

        for attempt in 0..=max_retries {
            self.apply_rate_limit(is_write);
            let response = self
                .client
                .post(&self.config.api_url)
                .header("User-Agent", self.config.user_agent.clone())
                .form(&pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, is_write);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }
                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    return check_api_error(payload);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, is_write);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, is_write: bool) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = if is_write { 2u64 } else { 1u64 };
        debug!(attempt, is_write, "retrying MediaWiki request");
        sleep(Duration::from_millis(
            base.saturating_mul(multiplier).saturating_add(jitter),
        ));
    }

    fn ensure_csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }

    fn namespace_ids(&mut self) -> Result<&NamespaceIds> {
        if self.namespaces.is_none() {
            let response = self.request_json_get(&[
                ("action", "query".to_string()),
                ("meta", "siteinfo".to_string()),
                ("siprop", "namespaces|namespacealiases".to_string()),
            ])?;
            self.namespaces = Some(NamespaceIds::from_siteinfo(&response)?);
        }
        self.namespaces
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("namespace table unavailable"))
    }

    /// Follows `continue` tokens until `collect` has seen every batch.
    fn query_all<F>(&mut self, params: Vec<(&'static str, String)>, mut collect: F) -> Result<()>
    where
        F: FnMut(QueryPayload),
    {
        let mut continuation: Option<BTreeMap<String, Value>> = None;
        loop {
            let mut request: Vec<(&str, String)> = params
                .iter()
                .map(|(key, value)| (*key, value.clone()))
                .collect();
            let extra: Vec<(String, String)> = continuation
                .iter()
                .flatten()
                .map(|(key, value)| (key.clone(), continue_value(value)))
                .collect();
            for (key, value) in &extra {
                request.push((key.as_str(), value.clone()));
            }

            let response = self.request_json_get(&request)?;
            let parsed: QueryResponse =
                serde_json::from_value(response).context("failed to decode query response")?;
            collect(parsed.query);
            continuation = parsed.continuation;
            if continuation.is_none() {
                return Ok(());
            }
        }
    }

    fn category_listing(&mut self, category: &str, cmtype: &str) -> Result<Vec<String>> {
        let mut titles = Vec::new();
        self.query_all(
            vec![
                ("action", "query".to_string()),
                ("list", "categorymembers".to_string()),
                ("cmtitle", with_category_prefix(category)),
                ("cmtype", cmtype.to_string()),
                ("cmlimit", QUERY_LIMIT.to_string()),
            ],
            |query| titles.extend(query.categorymembers.into_iter().map(|item| item.title)),
        )?;
        Ok(titles)
    }

    fn page_info(&mut self, title: &str) -> Result<Option<PageQueryItem>> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "content|timestamp".to_string()),
            ("rvslots", "main".to_string()),
        ])?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode page content API response")?;
        Ok(parsed.query.pages.into_iter().next())
    }
}

impl Readable for MediaWikiClient {
    fn get_text(&mut self, title: &str) -> Result<Option<LoadedText>> {
        let Some(page) = self.page_info(title)? else {
            return Ok(None);
        };
        if page.missing || page.invalid {
            return Ok(None);
        }
        let Some(revision) = page.revisions.into_iter().next() else {
            return Ok(None);
        };
        let text = revision
            .slots
            .and_then(|slots| slots.main)
            .map(|slot| slot.content)
            .unwrap_or_default();
        Ok(Some(LoadedText {
            text,
            timestamp: Some(revision.timestamp),
        }))
    }

    fn exists(&mut self, title: &str) -> Result<bool> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "info".to_string()),
        ])?;
        let parsed: QueryResponse =
            serde_json::from_value(response).context("failed to decode page info response")?;
        Ok(parsed
            .query
            .pages
            .first()
            .is_some_and(|page| !page.missing && !page.invalid))
    }

    fn redirect_target(&mut self, title: &str) -> Result<Option<String>> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("redirects", "1".to_string()),
        ])?;
        let parsed: QueryResponse =
            serde_json::from_value(response).context("failed to decode redirect response")?;
        Ok(parsed.query.redirects.into_iter().next().map(|redirect| redirect.to))
    }

    fn backlinks(&mut self, title: &str, follow_redirects: bool) -> Result<Vec<LinkingPage>> {
        let mut params = vec![
            ("action", "query".to_string()),
            ("list", "backlinks".to_string()),
            ("bltitle", title.to_string()),
            ("bllimit", QUERY_LIMIT.to_string()),
        ];
        if follow_redirects {
            params.push(("blredirect", "1".to_string()));
        }
        let mut pages = Vec::new();
        self.query_all(params, |query| pages.extend(linking_pages(query.backlinks)))?;
        Ok(pages)
    }

    fn prefixed_pages(&mut self, prefix: &str) -> Result<Vec<String>> {
        let (namespace, rest) = self.namespace_ids()?.split(prefix);
        let rest = rest.to_string();
        let mut titles = Vec::new();
        self.query_all(
            vec![
                ("action", "query".to_string()),
                ("list", "allpages".to_string()),
                ("apnamespace", namespace.to_string()),
                ("apprefix", rest),
                ("aplimit", QUERY_LIMIT.to_string()),
            ],
            |query| titles.extend(query.allpages.into_iter().map(|item| item.title)),
        )?;
        Ok(titles)
    }
}

impl Writable for MediaWikiClient {
    fn save_text(&mut self, request: &SaveRequest<'_>) -> Result<(), SiteError> {
        let token = self.ensure_csrf_token()?;
        let mut params = vec![
            ("action", "edit".to_string()),
            ("title", request.title.to_string()),
            ("text", request.text.to_string()),
            ("summary", request.summary.to_string()),
            ("token", token),
        ];
        if request.bot {
            params.push(("bot", "1".to_string()));
        }
        if let Some(timestamp) = request.base_timestamp {
            params.push(("basetimestamp", timestamp.to_string()));
        }
        let response = self.request_json_post(&params, true).map_err(site_error)?;
        let edit_payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        let result = edit_payload.edit.and_then(|edit| edit.result);
        if result.as_deref() != Some("Success") {
            return Err(SiteError::Transport(anyhow::anyhow!(
                "MediaWiki edit failed for {}: {}",
                request.title,
                result.unwrap_or_else(|| "unknown".to_string())
            )));
        }
        debug!(title = request.title, "saved page");
        Ok(())
    }
}

impl Movable for MediaWikiClient {
    fn move_page(&mut self, title: &str, new_title: &str, reason: &str) -> Result<(), SiteError> {
        let token = self.ensure_csrf_token()?;
        self.request_json_post(
            &[
                ("action", "move".to_string()),
                ("from", title.to_string()),
                ("to", new_title.to_string()),
                ("reason", reason.to_string()),
                ("movetalk", "1".to_string()),
                ("token", token),
            ],
            true,
        )
        .map_err(site_error)?;
        debug!(from = title, to = new_title, "moved page");
        Ok(())
    }
}

impl Categorized for MediaWikiClient {
    fn category_members(&mut self, category: &str) -> Result<Vec<String>> {
        self.category_listing(category, "page|file")
    }

    fn subcategories(&mut self, category: &str) -> Result<Vec<String>> {
        self.category_listing(category, "subcat")
    }
}

fn check_api_error(payload: Value) -> Result<Value> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        return Err(ApiError {
            code: code.to_string(),
            info: info.to_string(),
        }
        .into());
    }
    Ok(payload)
}

fn continue_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Backlink items with the pages reaching the target through each redirect
/// flattened in after it.
fn linking_pages(items: Vec<BacklinkItem>) -> Vec<LinkingPage> {
    let mut pages = Vec::new();
    for item in items {
        pages.push(LinkingPage {
            title: item.title,
            redirect: item.redirect,
        });
        pages.extend(item.redirlinks.into_iter().map(|nested| LinkingPage {
            title: nested.title,
            redirect: false,
        }));
    }
    pages
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    allpages: Vec<TitleQueryItem>,
    #[serde(default)]
    categorymembers: Vec<TitleQueryItem>,
    #[serde(default)]
    backlinks: Vec<BacklinkItem>,
    #[serde(default)]
    pages: Vec<PageQueryItem>,
    #[serde(default)]
    redirects: Vec<RedirectItem>,
}

#[derive(Debug, Deserialize)]
struct TitleQueryItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct BacklinkItem {
    title: String,
    #[serde(default)]
    redirect: bool,
    #[serde(default)]
    redirlinks: Vec<TitleQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RedirectItem {
    to: String,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    timestamp: String,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct SiteInfoResponse {
    #[serde(default)]
    query: SiteInfoPayload,
}

#[derive(Debug, Deserialize, Default)]
struct SiteInfoPayload {
    #[serde(default)]
    namespaces: BTreeMap<String, NamespaceItem>,
    #[serde(default)]
    namespacealiases: Vec<NamespaceAliasItem>,
}

#[derive(Debug, Deserialize)]
struct NamespaceItem {
    id: i32,
    #[serde(default)]
    name: String,
    canonical: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamespaceAliasItem {
    id: i32,
    alias: String,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
}
