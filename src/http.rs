//! Strava API client and the blocking [`ActivitySource`] built on it.
//!
//! [`StravaClient`] is async (reqwest). [`StravaSource`] owns a
//! current-thread tokio runtime and drives the client synchronously, since
//! the merge pipeline is strictly sequential.
//!
//! HTTP 429 from any endpoint becomes [`TrackMergeError::RateLimited`]; the
//! pipeline decides whether to retry or move on.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::runtime::Runtime;
use url::Url;

use crate::activity::RawActivity;
use crate::config::Credentials;
use crate::dataset::ActivityId;
use crate::error::{Result, TrackMergeError};
use crate::normalize::parse_timestamp;
use crate::pipeline::ActivitySource;

pub const STRAVA_AUTH_URL: &str = "https://www.strava.com/oauth/authorize";
pub const STRAVA_TOKEN_URL: &str = "https://www.strava.com/oauth/token";
pub const STRAVA_API_BASE: &str = "https://www.strava.com/api/v3";

/// Listing page size used while streaming (Strava's own default).
const LIST_PAGE_SIZE: usize = 30;
/// Strava rejects larger pages.
const MAX_PAGE_SIZE: usize = 200;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// API payloads
// ============================================================================

/// Entry of `GET /athlete/activities`.
#[derive(Debug, Clone, Deserialize)]
pub struct SummaryActivity {
    pub id: u64,
    pub start_date: Option<String>,
    pub start_date_local: Option<String>,
}

impl SummaryActivity {
    fn started_at(&self) -> Option<DateTime<Utc>> {
        self.start_date
            .as_deref()
            .or(self.start_date_local.as_deref())
            .and_then(parse_timestamp)
    }
}

/// Subset of `GET /activities/{id}` the pipeline uses.
#[derive(Debug, Clone, Deserialize)]
pub struct DetailedActivity {
    pub id: u64,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub activity_type: Option<String>,
    pub start_date: Option<String>,
    pub start_date_local: Option<String>,
    /// Meters
    pub distance: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct StreamSet {
    latlng: Option<LatLngStream>,
}

#[derive(Debug, Deserialize)]
struct LatLngStream {
    #[serde(default)]
    data: Vec<[f64; 2]>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

// ============================================================================
// Async client
// ============================================================================

/// Minimal Strava API client: OAuth code exchange plus the three read
/// endpoints the merge pipeline needs.
pub struct StravaClient {
    client: Client,
    credentials: Credentials,
    redirect_uri: String,
    api_base: String,
    token_url: String,
    access_token: Option<String>,
}

impl StravaClient {
    pub fn new(credentials: Credentials, redirect_uri: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TrackMergeError::Http {
                message: format!("Failed to create HTTP client: {}", e),
                status_code: None,
            })?;

        debug!("StravaClient initialized with client_id={}", credentials.client_id);

        Ok(Self {
            client,
            credentials,
            redirect_uri: redirect_uri.into(),
            api_base: STRAVA_API_BASE.to_string(),
            token_url: STRAVA_TOKEN_URL.to_string(),
            access_token: None,
        })
    }

    /// Point the client at another API host (local test servers).
    pub fn with_endpoints(mut self, api_base: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self.token_url = token_url.into();
        self
    }

    /// Use an already-issued access token instead of the code exchange.
    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = Some(token.into());
    }

    pub fn is_authorized(&self) -> bool {
        self.access_token.is_some()
    }

    /// Browser URL that asks the athlete to grant `scopes`.
    pub fn authorization_url(&self, scopes: &[String]) -> Result<String> {
        let scope = scopes.join(",");
        let url = Url::parse_with_params(
            STRAVA_AUTH_URL,
            &[
                ("client_id", self.credentials.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("approval_prompt", "auto"),
                ("scope", scope.as_str()),
            ],
        )
        .map_err(|e| TrackMergeError::Config {
            message: format!("invalid authorization URL: {}", e),
        })?;

        debug!("Authorization URL with scope {}", scope);
        Ok(url.into())
    }

    /// Exchange a one-time authorization code for an access token.
    pub async fn exchange_code(&mut self, code: &str) -> Result<()> {
        debug!("Exchanging authorization code for token");
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(transport_error)?;

        let token: TokenResponse = match check_status(response, "token exchange").await {
            Ok(response) => response.json().await.map_err(transport_error)?,
            Err(TrackMergeError::Http { message, .. }) => {
                return Err(TrackMergeError::Authorization { message })
            }
            Err(e) => return Err(e),
        };

        self.access_token = Some(token.access_token);
        debug!("Access token received");
        Ok(())
    }

    /// One page of activities that started after `after`, oldest first.
    pub async fn list_activities(
        &self,
        after: DateTime<Utc>,
        page: u32,
        per_page: usize,
    ) -> Result<Vec<SummaryActivity>> {
        let path = format!(
            "athlete/activities?after={}&page={}&per_page={}",
            after.timestamp(),
            page,
            per_page.clamp(1, MAX_PAGE_SIZE)
        );
        self.get_json(&path, "activity listing").await
    }

    pub async fn activity_detail(&self, id: u64) -> Result<DetailedActivity> {
        self.get_json(&format!("activities/{}", id), "activity detail")
            .await
    }

    /// `[lat, lng]` stream of an activity; empty when it has no GPS data.
    pub async fn latlng_stream(&self, id: u64, resolution: &str) -> Result<Vec<[f64; 2]>> {
        let path = format!(
            "activities/{}/streams?keys=latlng&key_by_type=true&resolution={}",
            id, resolution
        );
        match self.get_json::<StreamSet>(&path, "activity streams").await {
            Ok(streams) => Ok(streams.latlng.map(|s| s.data).unwrap_or_default()),
            Err(TrackMergeError::Http {
                status_code: Some(404),
                ..
            }) => {
                debug!("Activity {} has no streams", id);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Detail plus coordinate stream, as a raw activity record.
    pub async fn fetch_activity(&self, id: u64, resolution: &str) -> Result<RawActivity> {
        let detail = self.activity_detail(id).await?;
        let latlng = self.latlng_stream(detail.id, resolution).await?;

        debug!(
            "Fetched {} coordinates for activity {}",
            latlng.len(),
            detail.name.as_deref().unwrap_or("<unnamed>")
        );

        Ok(RawActivity {
            id: Some(ActivityId::Numeric(detail.id)),
            name: detail.name,
            category: detail.activity_type,
            start_date: detail.start_date.or(detail.start_date_local),
            distance: detail.distance,
            latlng,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let token = self.access_token.as_deref().ok_or_else(|| TrackMergeError::Authorization {
            message: "no access token; complete the OAuth flow first".to_string(),
        })?;

        let response = self
            .client
            .get(format!("{}/{}", self.api_base, path))
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)?;

        check_status(response, what)
            .await?
            .json()
            .await
            .map_err(transport_error)
    }
}

async fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(TrackMergeError::RateLimited {
            message: format!("{} returned {}", what, status),
        });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TrackMergeError::Http {
            message: format!("{} failed: {}", what, body.trim()),
            status_code: Some(status.as_u16()),
        });
    }

    Ok(response)
}

fn transport_error(e: reqwest::Error) -> TrackMergeError {
    TrackMergeError::Http {
        message: e.to_string(),
        status_code: e.status().map(|s| s.as_u16()),
    }
}

// ============================================================================
// Blocking activity source
// ============================================================================

/// [`ActivitySource`] backed by the Strava API.
pub struct StravaSource {
    runtime: Runtime,
    client: StravaClient,
    stream_resolution: String,
}

impl StravaSource {
    pub fn new(client: StravaClient, stream_resolution: impl Into<String>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            runtime,
            client,
            stream_resolution: stream_resolution.into(),
        })
    }

    pub fn client(&self) -> &StravaClient {
        &self.client
    }

    /// Blocking [`StravaClient::exchange_code`].
    pub fn authorize(&mut self, code: &str) -> Result<()> {
        self.runtime.block_on(self.client.exchange_code(code))?;
        info!("Strava authorization complete");
        Ok(())
    }
}

impl ActivitySource for StravaSource {
    fn fetch_batch(&mut self, after: DateTime<Utc>, limit: usize) -> Result<Vec<RawActivity>> {
        let client = &self.client;
        let resolution = self.stream_resolution.as_str();

        self.runtime.block_on(async {
            let summaries = client.list_activities(after, 1, limit).await?;
            let mut activities = Vec::with_capacity(summaries.len());

            for summary in summaries {
                if !summary.started_at().is_some_and(|t| t > after) {
                    continue;
                }
                activities.push(client.fetch_activity(summary.id, resolution).await?);
            }

            Ok::<_, TrackMergeError>(activities)
        })
    }

    fn activities_after<'a>(
        &'a mut self,
        after: DateTime<Utc>,
    ) -> Result<Box<dyn Iterator<Item = Result<RawActivity>> + 'a>> {
        Ok(Box::new(StravaActivityIter {
            source: self,
            after,
            page: 1,
            pending: VecDeque::new(),
            listing_done: false,
        }))
    }
}

/// Lazy walk over the listing, fetching details one activity at a time.
///
/// A failed listing request ends the iteration after yielding its error. A
/// failed detail request yields its error and the walk moves on.
struct StravaActivityIter<'a> {
    source: &'a mut StravaSource,
    after: DateTime<Utc>,
    page: u32,
    pending: VecDeque<SummaryActivity>,
    listing_done: bool,
}

impl StravaActivityIter<'_> {
    fn fill(&mut self) -> Result<()> {
        let source = &*self.source;
        let summaries = source.runtime.block_on(source.client.list_activities(
            self.after,
            self.page,
            LIST_PAGE_SIZE,
        ))?;

        self.page += 1;
        if summaries.len() < LIST_PAGE_SIZE {
            self.listing_done = true;
        }
        self.pending.extend(summaries);
        Ok(())
    }
}

impl Iterator for StravaActivityIter<'_> {
    type Item = Result<RawActivity>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.pending.is_empty() {
                if self.listing_done {
                    return None;
                }
                if let Err(e) = self.fill() {
                    self.listing_done = true;
                    return Some(Err(e));
                }
                continue;
            }

            let summary = self.pending.pop_front()?;
            match summary.started_at() {
                Some(started_at) if started_at > self.after => {}
                _ => continue,
            }

            let source = &*self.source;
            return Some(source.runtime.block_on(
                source
                    .client
                    .fetch_activity(summary.id, &source.stream_resolution),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Canned HTTP server: answers each request by exact path (query ignored).
    fn serve(routes: Vec<(&'static str, u16, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut reader = BufReader::new(stream.try_clone().unwrap());

                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                let mut content_length = 0usize;
                loop {
                    let mut header = String::new();
                    reader.read_line(&mut header).unwrap();
                    if header.trim().is_empty() {
                        break;
                    }
                    if let Some(value) = header.to_ascii_lowercase().strip_prefix("content-length:") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                }
                let mut body = vec![0u8; content_length];
                reader.read_exact(&mut body).unwrap();

                let target = request_line.split_whitespace().nth(1).unwrap_or("/");
                let path = target.split('?').next().unwrap_or(target);
                let (status, payload) = routes
                    .iter()
                    .find(|(route, _, _)| *route == path)
                    .map(|(_, status, payload)| (*status, *payload))
                    .unwrap_or((404, "{}"));

                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    payload.len(),
                    payload
                );
                stream.write_all(response.as_bytes()).unwrap();
                stream.flush().unwrap();
            }
        });

        base
    }

    fn client(base: &str) -> StravaClient {
        let credentials = Credentials {
            client_id: "42".to_string(),
            client_secret: "secret".to_string(),
        };
        let mut client = StravaClient::new(credentials, "http://localhost:8080")
            .unwrap()
            .with_endpoints(base, format!("{}/oauth/token", base));
        client.set_access_token("token");
        client
    }

    const DETAIL: &str = r#"{"id": 11, "name": "Lunch Ride", "type": "Ride",
        "start_date": "2024-05-02T12:00:00Z", "start_date_local": "2024-05-02T14:00:00Z",
        "distance": 12000.5, "kudos_count": 3}"#;
    const STREAMS: &str = r#"{"latlng": {"data": [[46.0, 7.0], [46.001, 7.001]],
        "series_type": "distance", "original_size": 2, "resolution": "medium"}}"#;
    const LISTING: &str = r#"[
        {"id": 10, "start_date": "2024-05-01T00:00:00Z"},
        {"id": 11, "start_date": "2024-05-02T12:00:00Z"}]"#;

    fn boundary() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_authorization_url() {
        let client = client("http://127.0.0.1:1");
        let url = client
            .authorization_url(&["read_all".to_string(), "activity:read_all".to_string()])
            .unwrap();
        let parsed = Url::parse(&url).unwrap();
        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert!(url.starts_with(STRAVA_AUTH_URL));
        assert_eq!(params["client_id"], "42");
        assert_eq!(params["redirect_uri"], "http://localhost:8080");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["scope"], "read_all,activity:read_all");
    }

    #[tokio::test]
    async fn test_429_is_rate_limited() {
        let base = serve(vec![("/athlete/activities", 429, "{}")]);
        let result = client(&base).list_activities(boundary(), 1, 5).await;
        assert!(matches!(result, Err(TrackMergeError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn test_fetch_activity_combines_detail_and_stream() {
        let base = serve(vec![
            ("/activities/11", 200, DETAIL),
            ("/activities/11/streams", 200, STREAMS),
        ]);
        let raw = client(&base).fetch_activity(11, "medium").await.unwrap();

        assert_eq!(raw.id, Some(ActivityId::Numeric(11)));
        assert_eq!(raw.category.as_deref(), Some("Ride"));
        assert_eq!(raw.start_date.as_deref(), Some("2024-05-02T12:00:00Z"));
        assert_eq!(raw.latlng, vec![[46.0, 7.0], [46.001, 7.001]]);
    }

    #[tokio::test]
    async fn test_missing_streams_is_empty() {
        let base = serve(vec![("/activities/11", 200, DETAIL)]);
        let raw = client(&base).fetch_activity(11, "medium").await.unwrap();
        assert!(raw.latlng.is_empty());
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let base = serve(vec![("/oauth/token", 200, r#"{"access_token": "fresh", "expires_at": 1}"#)]);
        let credentials = Credentials {
            client_id: "42".to_string(),
            client_secret: "secret".to_string(),
        };
        let mut client = StravaClient::new(credentials, "http://localhost:8080")
            .unwrap()
            .with_endpoints(base.clone(), format!("{}/oauth/token", base));

        assert!(!client.is_authorized());
        client.exchange_code("abc").await.unwrap();
        assert!(client.is_authorized());
    }

    #[tokio::test]
    async fn test_exchange_code_rejected() {
        let base = serve(vec![("/oauth/token", 400, r#"{"message": "Bad Request"}"#)]);
        let mut client = client(&base);
        let result = client.exchange_code("stale").await;
        assert!(matches!(result, Err(TrackMergeError::Authorization { .. })));
    }

    #[test]
    fn test_source_fetch_batch_skips_boundary() {
        let base = serve(vec![
            ("/athlete/activities", 200, LISTING),
            ("/activities/11", 200, DETAIL),
            ("/activities/11/streams", 200, STREAMS),
        ]);
        let mut source = StravaSource::new(client(&base), "medium").unwrap();
        let batch = source.fetch_batch(boundary(), 5).unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].name.as_deref(), Some("Lunch Ride"));
    }

    #[test]
    fn test_source_streaming_yields_rate_limit_and_ends() {
        let base = serve(vec![
            ("/athlete/activities", 200, LISTING),
            ("/activities/11", 429, "{}"),
        ]);
        let mut source = StravaSource::new(client(&base), "medium").unwrap();
        let items: Vec<Result<RawActivity>> = source.activities_after(boundary()).unwrap().collect();

        assert_eq!(items.len(), 1);
        assert!(items[0].as_ref().is_err_and(TrackMergeError::is_rate_limit));
    }

    #[test]
    fn test_source_streaming_listing_rate_limit() {
        let base = serve(vec![("/athlete/activities", 429, "{}")]);
        let mut source = StravaSource::new(client(&base), "medium").unwrap();
        let items: Vec<Result<RawActivity>> = source.activities_after(boundary()).unwrap().collect();

        assert_eq!(items.len(), 1);
        assert!(items[0].as_ref().is_err_and(TrackMergeError::is_rate_limit));
    }
}
