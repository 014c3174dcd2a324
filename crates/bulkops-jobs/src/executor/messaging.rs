use async_trait::async_trait;
use bulkops_common::error::{BulkopsError, Result};
use reqwest::{Method, StatusCode};
use url::Url;

use super::{ActionExecutor, ActionResult};
use crate::{job::Job, outcome::ItemError, types::JobItem};

pub const ACCOUNT_ID_PARAM: &str = "accountId";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Pause,
    Resume,
    Delete,
}

impl SessionAction {
    pub const ALL: [SessionAction; 3] = [Self::Pause, Self::Resume, Self::Delete];

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pause => "session.pause",
            Self::Resume => "session.resume",
            Self::Delete => "session.delete",
        }
    }

    fn method(&self) -> Method {
        match self {
            Self::Pause | Self::Resume => Method::POST,
            Self::Delete => Method::DELETE,
        }
    }

    fn path_suffix(&self) -> Option<&'static str> {
        match self {
            Self::Pause => Some("pause"),
            Self::Resume => Some("resume"),
            Self::Delete => None,
        }
    }
}

/// Applies a session state change against the remote messaging API.
#[derive(Debug, Clone)]
pub struct HttpSessionExecutor {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    action: SessionAction,
}

impl HttpSessionExecutor {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_token: Option<String>,
        action: SessionAction,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_token: api_token.filter(|token| !token.trim().is_empty()),
            action,
        }
    }

    pub fn session_url(&self, account_id: &str, session_id: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|err| {
            BulkopsError::MissingConfiguration(format!("invalid messaging api url: {err}"))
        })?;

        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                BulkopsError::MissingConfiguration(
                    "messaging api url cannot be a base url".to_string(),
                )
            })?;
            segments
                .pop_if_empty()
                .extend(["accounts", account_id, "sessions", session_id]);
            if let Some(suffix) = self.action.path_suffix() {
                segments.push(suffix);
            }
        }

        Ok(url)
    }
}

fn account_id(parameters: &serde_json::Value) -> Option<&str> {
    parameters
        .get(ACCOUNT_ID_PARAM)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[async_trait]
impl ActionExecutor for HttpSessionExecutor {
    async fn preflight(&self, job: &Job) -> Result<()> {
        if self.api_token.is_none() {
            return Err(BulkopsError::MissingConfiguration(
                "messaging api token is not configured".to_string(),
            ));
        }
        let Some(account_id) = account_id(&job.parameters) else {
            return Err(BulkopsError::MissingConfiguration(format!(
                "job parameters must include {ACCOUNT_ID_PARAM}"
            )));
        };
        self.session_url(account_id, "probe")?;
        Ok(())
    }

    async fn apply(&self, item: &JobItem, parameters: &serde_json::Value) -> ActionResult {
        let (Some(token), Some(account_id)) = (self.api_token.as_deref(), account_id(parameters))
        else {
            return Err(ItemError::Rejected(
                "messaging api credentials are missing".to_string(),
            ));
        };

        let url = self
            .session_url(account_id, &item.id)
            .map_err(|err| ItemError::Rejected(err.to_string()))?;

        let mut request = self
            .client
            .request(self.action.method(), url)
            .bearer_auth(token);
        if !item.params.is_null() && self.action.method() == Method::POST {
            request = request.json(&item.params);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ItemError::Transport(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ItemError::Transport(err.to_string()))?;

        if !status.is_success() {
            return Err(ItemError::Rejected(format!(
                "session {} returned status {status}",
                item.id
            )));
        }

        Ok(parse_body(status, &body))
    }
}

fn parse_body(status: StatusCode, body: &str) -> serde_json::Value {
    if body.trim().is_empty() {
        return serde_json::json!({ "status": status.as_u16() });
    }
    serde_json::from_str(body).unwrap_or_else(|_| serde_json::Value::String(body.to_string()))
}
