//! Vote submission to the MyHero data service.
//!
//! One vote is one `POST {data_server}/vote/{hero}` carrying the shared key
//! in a `key` header. The service answers with a JSON object whose `result`
//! field is the string `"1"` on success.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{RelayError, VoteError};

/// Header carrying the data service key.
pub const KEY_HEADER: &str = "key";

/// Outcome of one vote submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteResult {
    /// The data service recorded the vote.
    Success,
    /// Any other outcome, including transport and decode failures.
    Failure,
}

impl VoteResult {
    /// Whether the vote was recorded.
    pub fn is_success(self) -> bool {
        matches!(self, VoteResult::Success)
    }
}

impl fmt::Display for VoteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteResult::Success => f.write_str("Vote Successful"),
            VoteResult::Failure => f.write_str("Vote UnSuccessful"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VoteResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
}

/// Interpret a data service response body.
///
/// Only the string `"1"` counts as success; a missing field, any other value
/// (the number `1` included) is a failure. Non-JSON bodies are an error.
pub fn parse_vote_response(body: &[u8]) -> Result<VoteResult, VoteError> {
    let response: VoteResponse = serde_json::from_slice(body)?;

    Ok(match response.result {
        Some(serde_json::Value::String(ref value)) if value == "1" => VoteResult::Success,
        _ => VoteResult::Failure,
    })
}

/// Records votes somewhere.
#[async_trait]
pub trait VoteForwarder: Send + Sync {
    /// Record one vote for `hero`. Exactly one attempt, never an error.
    async fn record_vote(&self, hero: &str) -> VoteResult;
}

/// Forwarder that posts votes to the data service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpVoteForwarder {
    client: Client,
    data_server: Url,
    data_key: String,
}

impl HttpVoteForwarder {
    /// Create a forwarder with a per-request timeout.
    pub fn new(data_server: Url, data_key: String, timeout: Duration) -> Result<Self, RelayError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            data_server,
            data_key,
        })
    }

    /// URL a vote for `hero` is posted to.
    pub fn vote_url(&self, hero: &str) -> Result<Url, VoteError> {
        let mut url = self.data_server.clone();
        url.path_segments_mut()
            .map_err(|_| VoteError::Url(self.data_server.to_string()))?
            .pop_if_empty()
            .push("vote")
            .push(hero);
        Ok(url)
    }

    /// Submit a vote, surfacing every failure as a [`VoteError`].
    pub async fn submit(&self, hero: &str) -> Result<VoteResult, VoteError> {
        let url = self.vote_url(hero)?;
        debug!(%url, "Posting vote");

        let response = self
            .client
            .post(url)
            .header(KEY_HEADER, self.data_key.as_str())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(VoteError::Status(status));
        }

        let body = response.bytes().await?;
        parse_vote_response(&body)
    }
}

#[async_trait]
impl VoteForwarder for HttpVoteForwarder {
    async fn record_vote(&self, hero: &str) -> VoteResult {
        match self.submit(hero).await {
            Ok(result) => result,
            Err(e) => {
                warn!(hero, error = %e, "Vote submission failed");
                VoteResult::Failure
            }
        }
    }
}
