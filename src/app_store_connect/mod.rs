// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Signed-request transport for the App Store Connect API.
//!
//! [AppStoreConnectClient] owns request authentication (short-lived ES256
//! bearer tokens, proactively refreshed before expiry), bounded retry with
//! per-attempt observation, JSON decoding and the classification of portal
//! error responses. The sibling modules build typed resource operations on
//! top of it.

pub mod api_token;
pub mod bundle_ids;
pub mod capabilities;
pub mod certificates;
pub mod devices;
pub mod profiles;

use {
    self::api_token::{AppStoreConnectToken, ConnectTokenEncoder},
    crate::AppleProvisioningError,
    chrono::Duration,
    log::{debug, warn},
    reqwest::{
        blocking::{Client, ClientBuilder},
        header, Method,
    },
    serde::{de::DeserializeOwned, Deserialize, Serialize},
    std::{
        collections::BTreeMap,
        fmt::{Display, Formatter},
        sync::Mutex,
        time::Instant,
    },
    url::Url,
};

/// A given token can be reused for up to 20 minutes. We stay a minute under
/// that so time inaccuracies at token validation do not cause issues.
const TOKEN_DURATION_MINUTES: i64 = 19;

/// Tokens within this margin of expiry are regenerated instead of reused.
const TOKEN_REFRESH_MARGIN_MINUTES: i64 = 2;

/// Total request attempts, including the initial one.
const MAX_REQUEST_ATTEMPTS: u32 = 5;

/// Cap on the exponential inter-attempt wait.
const MAX_RETRY_WAIT_SECONDS: u64 = 30;

/// Page size used while following pagination cursors.
pub(crate) const PAGE_SIZE: u32 = 20;

/// The portal's page size ceiling, used by the invalid-cursor fallback.
pub(crate) const MAX_PAGE_SIZE: u32 = 200;

/// Which App Store Connect host to talk to.
///
/// Enterprise program accounts live on a separate host with its own token
/// audience.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PortalEnvironment {
    Standard,
    Enterprise,
}

impl PortalEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            Self::Standard => "https://api.appstoreconnect.apple.com/",
            Self::Enterprise => "https://api.enterprise.developer.apple.com/",
        }
    }

    pub fn token_audience(&self) -> &'static str {
        match self {
            Self::Standard => "appstoreconnect-v1",
            Self::Enterprise => "apple-developer-enterprise-v1",
        }
    }
}

/// A single `errors[]` entry in a portal error response.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ApiErrorEntry {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub detail: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorPayload {
    #[serde(default)]
    errors: Vec<ApiErrorEntry>,
}

/// A non-2xx portal response, decoded into its HTTP status and error entries.
#[derive(Clone, Debug)]
pub struct ApiError {
    pub status: u16,
    pub errors: Vec<ApiErrorEntry>,
}

impl ApiError {
    fn from_body(status: u16, body: &[u8]) -> Self {
        let errors = match serde_json::from_slice::<ApiErrorPayload>(body) {
            Ok(payload) => payload.errors,
            Err(_) => {
                if !body.is_empty() {
                    debug!(
                        "failed to decode portal error response: {}",
                        String::from_utf8_lossy(body)
                    );
                }
                Vec::new()
            }
        };

        Self { status, errors }
    }

    /// Whether the portal rejected the pagination cursor itself.
    pub fn is_cursor_invalid(&self) -> bool {
        self.errors.iter().any(|e| {
            e.code == "PARAMETER_ERROR.INVALID"
                && e.detail.contains("is not a valid cursor for this request")
        })
    }

    /// Whether the account has a pending license agreement, which the portal
    /// reports intermittently and is worth retrying through.
    pub fn is_required_agreements_missing_or_expired(&self) -> bool {
        self.errors
            .iter()
            .any(|e| e.code == "FORBIDDEN.REQUIRED_AGREEMENTS_MISSING_OR_EXPIRED")
    }

    /// Whether any error detail contains the given needle.
    pub fn has_detail_containing(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.errors
            .iter()
            .any(|e| e.detail.to_lowercase().contains(&needle))
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP {}", self.status)?;
        for entry in &self.errors {
            write!(f, "\n- {}: {}: {}", entry.code, entry.title, entry.detail)?;
        }
        Ok(())
    }
}

/// One timed HTTP attempt, reported to a [RequestObserver].
///
/// Attempts are reported individually so retry backoff never inflates the
/// observed server latency.
#[derive(Clone, Debug)]
pub struct RequestMetric {
    pub method: String,
    pub host: String,
    pub path: String,
    pub status: Option<u16>,
    pub duration: std::time::Duration,
    pub retry: bool,
}

/// Observability sink for portal requests.
pub trait RequestObserver: Send + Sync {
    fn request_completed(&self, metric: &RequestMetric);
}

/// Default observer that emits each attempt as a debug log line.
pub struct LogRequestObserver;

impl RequestObserver for LogRequestObserver {
    fn request_completed(&self, metric: &RequestMetric) {
        debug!(
            "{} {}{} -> {} in {:?}{}",
            metric.method,
            metric.host,
            metric.path,
            metric
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "transport error".to_string()),
            metric.duration,
            if metric.retry { " (retry)" } else { "" },
        );
    }
}

/// Pagination links of a list response.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PagedDocumentLinks {
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub total: usize,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PagingInformation {
    #[serde(default)]
    pub paging: Paging,
}

/// Envelope common to all paged list responses.
#[derive(Debug, Deserialize)]
pub struct PagedResponse<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub links: PagedDocumentLinks,
    #[serde(default)]
    pub meta: PagingInformation,
}

/// Paging parameters for a single list request.
#[derive(Clone, Debug, Default)]
pub struct PageOptions {
    pub limit: Option<u32>,
    pub cursor: Option<String>,
    pub sort: Option<&'static str>,
}

impl PageOptions {
    fn apply(&self, url: &mut Url) {
        let mut pairs = url.query_pairs_mut();
        if let Some(limit) = self.limit {
            pairs.append_pair("limit", &limit.to_string());
        }
        if let Some(cursor) = &self.cursor {
            pairs.append_pair("cursor", cursor);
        }
        if let Some(sort) = self.sort {
            pairs.append_pair("sort", sort);
        }
    }
}

/// A resource with a portal-assigned object ID, unionable by ID during the
/// invalid-cursor fallback.
pub(crate) trait Identified {
    fn portal_id(&self) -> &str;
}

/// Extract the opaque cursor from a `links.next` URL.
pub(crate) fn cursor_from_next(next: &str) -> Result<Option<String>, AppleProvisioningError> {
    let url = Url::parse(next)?;

    Ok(url
        .query_pairs()
        .find(|(key, _)| key == "cursor")
        .map(|(_, value)| value.into_owned()))
}

/// Follow `links.next` until exhausted, accumulating all pages.
///
/// `meta.paging.total` bounds the loop when the portal keeps handing out
/// next links past the declared result count. When the portal reports the
/// cursor itself as invalid (an item deleted mid-pagination can shift the
/// cursor out of range), falls back to [list_fallback].
pub(crate) fn list_all<T, F>(resource: &str, mut fetch: F) -> Result<Vec<T>, AppleProvisioningError>
where
    T: Identified,
    F: FnMut(PageOptions) -> Result<PagedResponse<T>, AppleProvisioningError>,
{
    let mut collected: Vec<T> = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = match fetch(PageOptions {
            limit: Some(PAGE_SIZE),
            cursor: cursor.clone(),
            sort: None,
        }) {
            Ok(page) => page,
            Err(err) if err.is_cursor_invalid() => {
                warn!(
                    "cursor is invalid, falling back to listing {} with {} limit",
                    resource,
                    2 * MAX_PAGE_SIZE
                );
                return list_fallback(resource, fetch);
            }
            Err(err) => return Err(err),
        };

        let total = page.meta.paging.total;
        collected.extend(page.data);

        let next = match page.links.next.as_deref() {
            Some(next) if !next.is_empty() => next.to_string(),
            _ => return Ok(collected),
        };

        if collected.len() >= total {
            warn!("all {} fetched, but next page link is present", resource);
            return Ok(collected);
        }

        cursor = cursor_from_next(&next)?;
    }
}

/// Best-effort recovery for a corrupted pagination cursor: two single-page
/// fetches at the maximum page size, sorted ascending and descending by ID,
/// unioned by ID. Recovers up to twice the portal's page size ceiling.
pub(crate) fn list_fallback<T, F>(
    resource: &str,
    mut fetch: F,
) -> Result<Vec<T>, AppleProvisioningError>
where
    T: Identified,
    F: FnMut(PageOptions) -> Result<PagedResponse<T>, AppleProvisioningError>,
{
    let mut by_id: BTreeMap<String, T> = BTreeMap::new();
    let mut total = 0;

    for sort in ["id", "-id"] {
        let page = fetch(PageOptions {
            limit: Some(MAX_PAGE_SIZE),
            cursor: None,
            sort: Some(sort),
        })?;

        if total == 0 {
            total = page.meta.paging.total;
        }

        for item in page.data {
            by_id.insert(item.portal_id().to_string(), item);
        }
    }

    if total > 2 * MAX_PAGE_SIZE as usize {
        warn!("more than {} {} ({}) found", 2 * MAX_PAGE_SIZE, resource, total);
    }

    Ok(by_id.into_values().collect())
}

/// A client for the App Store Connect API.
///
/// All requests are signed with a short-lived bearer token minted from the
/// bound [ConnectTokenEncoder] and retried a bounded number of times on
/// transient failures.
pub struct AppStoreConnectClient {
    client: Client,
    connect_token: ConnectTokenEncoder,
    token: Mutex<Option<AppStoreConnectToken>>,
    environment: PortalEnvironment,
    base_url: Url,
    observer: Box<dyn RequestObserver>,
}

impl AppStoreConnectClient {
    pub fn new(
        connect_token: ConnectTokenEncoder,
        environment: PortalEnvironment,
    ) -> Result<Self, AppleProvisioningError> {
        Ok(Self {
            client: default_client()?,
            connect_token,
            token: Mutex::new(None),
            environment,
            base_url: Url::parse(environment.base_url())?,
            observer: Box::new(LogRequestObserver),
        })
    }

    /// Replace the default log-backed request observer.
    pub fn with_observer(mut self, observer: Box<dyn RequestObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Resolve the URL of a versioned API endpoint like `profiles`.
    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, AppleProvisioningError> {
        Ok(self.base_url.join(&format!("v1/{}", path))?)
    }

    fn bearer_token(&self) -> Result<String, AppleProvisioningError> {
        let mut token = self.token.lock().expect("token lock poisoned");

        let usable = token
            .as_ref()
            .map(|t| t.is_usable(Duration::minutes(TOKEN_REFRESH_MARGIN_MINUTES)))
            .unwrap_or(false);

        if !usable {
            debug!("generating a new App Store Connect bearer token");
            token.replace(self.connect_token.new_token(
                self.environment.token_audience(),
                Duration::minutes(TOKEN_DURATION_MINUTES),
            )?);
        }

        Ok(token.as_ref().expect("token just set").bearer.clone())
    }

    fn should_retry(api_error: &ApiError, retry_after: Option<&str>) -> bool {
        match api_error.status {
            401 => {
                debug!("received HTTP 401 (Unauthorized), retrying request");
                true
            }
            403 if api_error.is_required_agreements_missing_or_expired() => {
                warn!(
                    "received error FORBIDDEN.REQUIRED_AGREEMENTS_MISSING_OR_EXPIRED (status 403), retrying request"
                );
                true
            }
            429 => {
                match retry_after {
                    Some(seconds) => warn!(
                        "received HTTP 429 Too Many Requests, retrying the request in {} seconds",
                        seconds
                    ),
                    None => warn!("received HTTP 429 Too Many Requests, retrying the request"),
                }
                true
            }
            status => status >= 500,
        }
    }

    fn retry_wait(attempt: u32) -> std::time::Duration {
        let seconds = (1u64 << attempt.min(16)).min(MAX_RETRY_WAIT_SECONDS);
        std::time::Duration::from_secs(seconds)
    }

    fn observe(
        &self,
        method: &Method,
        url: &Url,
        status: Option<u16>,
        duration: std::time::Duration,
        retry: bool,
    ) {
        self.observer.request_completed(&RequestMetric {
            method: method.to_string(),
            host: url.host_str().unwrap_or_default().to_string(),
            path: url.path().to_string(),
            status,
            duration,
            retry,
        });
    }

    /// Execute a request, retrying transient failures, and return the raw
    /// response body.
    fn execute(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<Vec<u8>, AppleProvisioningError> {
        let mut attempt = 0;

        loop {
            let token = self.bearer_token()?;

            let mut builder = self
                .client
                .request(method.clone(), url.clone())
                .bearer_auth(token)
                .header(header::ACCEPT, "application/json");

            if let Some(body) = &body {
                builder = builder.json(body);
            }

            let start = Instant::now();
            let result = builder.send();
            let duration = start.elapsed();

            let last_attempt = attempt + 1 >= MAX_REQUEST_ATTEMPTS;

            match result {
                Err(err) => {
                    self.observe(&method, &url, None, duration, attempt > 0);

                    if last_attempt {
                        return Err(err.into());
                    }

                    warn!(
                        "request error for {} {}: {}, retrying",
                        method,
                        url.path(),
                        err
                    );
                }
                Ok(response) => {
                    let status = response.status();
                    self.observe(&method, &url, Some(status.as_u16()), duration, attempt > 0);

                    if status.is_success() {
                        return Ok(response.bytes()?.to_vec());
                    }

                    let retry_after = response
                        .headers()
                        .get(header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .map(|v| v.to_string());
                    let body = response.bytes().map(|b| b.to_vec()).unwrap_or_default();
                    let api_error = ApiError::from_body(status.as_u16(), &body);

                    if last_attempt || !Self::should_retry(&api_error, retry_after.as_deref()) {
                        return Err(AppleProvisioningError::Api(api_error));
                    }
                }
            }

            attempt += 1;
            std::thread::sleep(Self::retry_wait(attempt));
        }
    }

    /// GET a versioned endpoint with paging options and extra query pairs.
    pub(crate) fn get_paged<T: DeserializeOwned>(
        &self,
        path: &str,
        filters: &[(&str, String)],
        options: &PageOptions,
    ) -> Result<T, AppleProvisioningError> {
        let url = self.endpoint(path)?;
        self.get_url_paged(url, filters, options)
    }

    /// GET an absolute URL (e.g. a relationship link) with paging options.
    pub(crate) fn get_url_paged<T: DeserializeOwned>(
        &self,
        mut url: Url,
        filters: &[(&str, String)],
        options: &PageOptions,
    ) -> Result<T, AppleProvisioningError> {
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in filters {
                pairs.append_pair(key, value);
            }
        }
        options.apply(&mut url);

        let body = self.execute(Method::GET, url, None)?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// GET an absolute URL without paging.
    pub(crate) fn get_url<T: DeserializeOwned>(
        &self,
        url: Url,
    ) -> Result<T, AppleProvisioningError> {
        let body = self.execute(Method::GET, url, None)?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// POST a JSON body to a versioned endpoint.
    pub(crate) fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, AppleProvisioningError> {
        let url = self.endpoint(path)?;
        let body = self.execute(Method::POST, url, Some(serde_json::to_value(body)?))?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// PATCH a JSON body to a versioned endpoint.
    pub(crate) fn patch<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, AppleProvisioningError> {
        let url = self.endpoint(path)?;
        let body = self.execute(Method::PATCH, url, Some(serde_json::to_value(body)?))?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// DELETE a versioned endpoint. The portal answers with an empty body.
    pub(crate) fn delete(&self, path: &str) -> Result<(), AppleProvisioningError> {
        let url = self.endpoint(path)?;
        self.execute(Method::DELETE, url, None)?;
        Ok(())
    }
}

/// Obtain the default [Client] to use for HTTP requests.
pub fn default_client() -> Result<Client, AppleProvisioningError> {
    Ok(ClientBuilder::default()
        .user_agent("apple-provisioning crate (https://crates.io/crates/apple-provisioning)")
        .build()?)
}
