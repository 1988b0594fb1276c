use std::time::Duration;

use log::{debug, info, trace};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::library::{StoryJob, StorySummary};
use crate::session::Session;
use crate::story::{StoryDocument, StoryError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("backend returned a broken story: {0}")]
    Story(#[from] StoryError),

    #[error("no image returned: {0}")]
    MissingImage(String),

    #[error("invalid backend url '{url}': {reason}")]
    BadBaseUrl { url: String, reason: String },
}

// ---------------------------------------------------------------------------
// Client configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend root, without a trailing slash.
    pub api_base_url: String,
    /// Delay between story-generation job polls.
    pub poll_interval: Duration,
    /// Give up on a generation job after this many polls.
    pub max_polls: u32,
    /// `None` leaves requests unbounded.
    pub request_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.into(),
            poll_interval: Duration::from_secs(2),
            max_polls: 90,
            request_timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.api_base_url = url.trim().trim_end_matches('/').to_string();
        self
    }
}

// ---------------------------------------------------------------------------
// Backend API
// ---------------------------------------------------------------------------

/// The story backend as seen by this client.
pub trait StoryApi: Send + Sync {
    /// Fetch a complete story document by id.
    fn fetch_story(&self, story_id: &str) -> Result<StoryDocument, ApiError>;

    /// Ask for an image of a scene; returns the image URL.
    fn generate_scene_image(&self, scene_description: &str) -> Result<String, ApiError>;

    fn list_stories(&self, session: &Session) -> Result<Vec<StorySummary>, ApiError>;

    /// Start generating a new story for `theme`.
    fn create_story(&self, theme: &str, session: &Session) -> Result<StoryJob, ApiError>;

    fn job_status(&self, job_id: &str) -> Result<StoryJob, ApiError>;
}

#[derive(Debug, Serialize)]
struct SceneImageRequest<'a> {
    scene_description: &'a str,
}

#[derive(Debug, Deserialize)]
struct SceneImageResponse {
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl SceneImageResponse {
    fn into_url(self) -> Result<String, ApiError> {
        if let Some(error) = self.error {
            return Err(ApiError::MissingImage(error));
        }
        self.image_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ApiError::MissingImage("backend sent no image url".into()))
    }
}

/// Blocking HTTP client for the story backend.
pub struct HttpStoryApi {
    client: Client,
    base_url: Url,
    bearer: Option<String>,
}

impl HttpStoryApi {
    pub fn new(config: &ClientConfig, session: Option<&Session>) -> Result<Self, ApiError> {
        let bad_url = |reason: String| ApiError::BadBaseUrl {
            url: config.api_base_url.clone(),
            reason,
        };
        let base_url = Url::parse(&config.api_base_url).map_err(|e| bad_url(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(bad_url("not a hierarchical url".into()));
        }

        let client = Client::builder().timeout(config.request_timeout).build()?;
        info!("Backend: {base_url}");
        Ok(Self {
            client,
            base_url,
            bearer: session.and_then(|s| s.access_token.clone()),
        })
    }

    /// Append path segments to the base url, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Base urls that cannot take a path are rejected in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let request = match &self.bearer {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send()?;
        let status = response.status();
        let body = response.text()?;
        trace!("<- {status}: {body}");

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

impl StoryApi for HttpStoryApi {
    fn fetch_story(&self, story_id: &str) -> Result<StoryDocument, ApiError> {
        let url = self.url(&["stories", story_id, "complete"]);
        debug!("GET {url}");
        let value: serde_json::Value = self.send(self.client.get(url))?;
        Ok(StoryDocument::from_value(value)?)
    }

    fn generate_scene_image(&self, scene_description: &str) -> Result<String, ApiError> {
        let url = self.url(&["stories", "generate-scene-image"]);
        debug!("POST {url}");
        let request = self
            .client
            .post(url)
            .json(&SceneImageRequest { scene_description });
        self.send::<SceneImageResponse>(request)?.into_url()
    }

    fn list_stories(&self, session: &Session) -> Result<Vec<StorySummary>, ApiError> {
        let url = self.url(&["stories", "user", &session.user_id]);
        debug!("GET {url}");
        self.send(self.client.get(url))
    }

    fn create_story(&self, theme: &str, session: &Session) -> Result<StoryJob, ApiError> {
        let url = self.url(&["stories", "create"]);
        debug!("POST {url} (theme={theme})");
        let body = json!({ "theme": theme, "session_id": session.user_id });
        self.send(self.client.post(url).json(&body))
    }

    fn job_status(&self, job_id: &str) -> Result<StoryJob, ApiError> {
        let url = self.url(&["jobs", job_id]);
        debug!("GET {url}");
        self.send(self.client.get(url))
    }
}
