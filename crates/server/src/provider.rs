use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStage {
    Generation,
    Summarization,
}

impl CompletionStage {
    pub fn as_str(self) -> &'static str {
        match self {
            CompletionStage::Generation => "generation",
            CompletionStage::Summarization => "summarization",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub stage: CompletionStage,
    pub messages: Vec<ChatMessage>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderFailure {
    EmptyInput,
    Unavailable(String),
    Timeout,
}

impl std::fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderFailure::EmptyInput => write!(f, "nothing to send to the completion provider"),
            ProviderFailure::Unavailable(detail) => {
                write!(f, "completion provider unavailable: {}", detail)
            }
            ProviderFailure::Timeout => write!(f, "completion provider timed out"),
        }
    }
}

impl std::error::Error for ProviderFailure {}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderFailure>;
}

#[derive(Debug)]
enum AttemptError {
    Timeout,
    Transport(reqwest::Error),
    Status(reqwest::StatusCode),
    Malformed(&'static str),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        matches!(self, AttemptError::Timeout | AttemptError::Transport(_))
    }
}

impl From<reqwest::Error> for AttemptError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            AttemptError::Timeout
        } else {
            AttemptError::Transport(value)
        }
    }
}

impl From<AttemptError> for ProviderFailure {
    fn from(value: AttemptError) -> Self {
        match value {
            AttemptError::Timeout => ProviderFailure::Timeout,
            AttemptError::Transport(err) => {
                ProviderFailure::Unavailable(format!("transport error: {}", err))
            }
            AttemptError::Status(status) => {
                ProviderFailure::Unavailable(format!("provider returned status {}", status))
            }
            AttemptError::Malformed(detail) => ProviderFailure::Unavailable(detail.to_string()),
        }
    }
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct HttpCompletionClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    retry: bool,
}

impl HttpCompletionClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        retry: bool,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().build()?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: model.to_string(),
            retry,
        })
    }

    async fn attempt(&self, request: &CompletionRequest) -> Result<String, AttemptError> {
        let body = CompletionBody {
            model: &self.model,
            messages: &request.messages,
            temperature: 0.0,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Status(status));
        }

        let parsed = response.json::<CompletionResponse>().await.map_err(|err| {
            if err.is_timeout() {
                AttemptError::Timeout
            } else {
                AttemptError::Malformed("provider returned an unparseable completion")
            }
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(AttemptError::Malformed("provider returned an empty completion"))
    }
}

#[async_trait]
impl CompletionProvider for HttpCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderFailure> {
        if request.messages.iter().all(|m| m.content.trim().is_empty()) {
            return Err(ProviderFailure::EmptyInput);
        }

        match self.attempt(request).await {
            Err(err) if self.retry && err.is_retryable() => {
                tracing::warn!(
                    stage = request.stage.as_str(),
                    error = ?err,
                    "completion attempt failed; retrying once"
                );
                metrics::inc_provider_retry(request.stage.as_str());
                Ok(self.attempt(request).await?)
            }
            other => Ok(other?),
        }
    }
}

/// Deterministic provider for local development and tests.
///
/// Generation answers with a fenced statement filtering on the location
/// after the last "in"; summarization lists the titles in the payload.
#[derive(Debug, Clone, Default)]
pub struct MockProvider;

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderFailure> {
        let user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.trim())
            .filter(|c| !c.is_empty())
            .ok_or(ProviderFailure::EmptyInput)?;

        Ok(match request.stage {
            CompletionStage::Generation => mock_generation(user),
            CompletionStage::Summarization => mock_summary(user),
        })
    }
}

fn mock_generation(user_text: &str) -> String {
    let lowered = user_text.to_lowercase();
    let location = lowered
        .rsplit_once(" in ")
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
        })
        .filter(|word| !word.is_empty());

    let sql = match location {
        Some(location) => format!(
            "SELECT * FROM jobs WHERE location ILIKE '%{}%' ORDER BY id",
            location
        ),
        None => "SELECT * FROM jobs ORDER BY id".to_string(),
    };

    format!("```sql\n{}\n```", sql)
}

/// Heads the result payload in the summarization prompt.
pub(crate) const RESULTS_MARKER: &str = "Results (JSON):";

fn mock_summary(user_text: &str) -> String {
    // The payload is compact JSON on the line after the last marker.
    let payload = user_text
        .rsplit_once(format!("{}\n", RESULTS_MARKER).as_str())
        .and_then(|(_, results)| serde_json::from_str::<serde_json::Value>(results.trim()).ok())
        .unwrap_or(serde_json::Value::Null);

    let rows = payload
        .get("rows")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    if rows.is_empty() {
        return "No matching jobs were found for your request.".to_string();
    }

    let threshold = payload
        .get("display_threshold")
        .and_then(|v| v.as_u64())
        .unwrap_or(5) as usize;
    let listed = rows
        .iter()
        .take(threshold)
        .map(|row| {
            let title = row.get("title").and_then(|v| v.as_str()).unwrap_or("Untitled role");
            match row.get("location").and_then(|v| v.as_str()) {
                Some(location) => format!("{} ({})", title, location),
                None => title.to_string(),
            }
        })
        .collect::<Vec<_>>();

    let mut out = format!(
        "I found {} matching job{}: {}.",
        rows.len(),
        if rows.len() == 1 { "" } else { "s" },
        listed.join(", ")
    );
    let additional = payload
        .get("additional_results")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if additional {
        out.push_str(" There are more results beyond the ones listed here.");
    }
    out
}
