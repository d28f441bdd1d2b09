use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jobchat_contracts::{ErrorKind, ResultSet, SchemaDescriptor, canonical};
use jobchat_policy::{ExtractionFailure, ValidatedQuery, ValidationFailure, extract, validate};
use jobchat_store::{ExecutionFailure, QueryStore};
use tracing::Instrument;

use crate::metrics;
use crate::provider::{
    ChatMessage, CompletionProvider, CompletionRequest, CompletionStage, ProviderFailure,
    RESULTS_MARKER,
};

#[derive(Debug)]
pub enum PipelineError {
    InvalidRequest,
    Generation(ProviderFailure),
    Extraction(ExtractionFailure),
    Validation(ValidationFailure),
    Execution(ExecutionFailure),
    Summarization(ProviderFailure),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidRequest => ErrorKind::InvalidRequest,
            PipelineError::Generation(_) => ErrorKind::GenerationFailed,
            PipelineError::Extraction(_) => ErrorKind::ExtractionFailed,
            PipelineError::Validation(_) => ErrorKind::ValidationFailed,
            PipelineError::Execution(_) => ErrorKind::ExecutionFailed,
            PipelineError::Summarization(_) => ErrorKind::SummarizationFailed,
        }
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::InvalidRequest => write!(f, "empty chat message"),
            PipelineError::Generation(err) => write!(f, "generation failed: {}", err),
            PipelineError::Extraction(err) => write!(f, "extraction failed: {}", err),
            PipelineError::Validation(err) => write!(f, "validation failed: {}", err),
            PipelineError::Execution(err) => write!(f, "execution failed: {}", err),
            PipelineError::Summarization(err) => write!(f, "summarization failed: {}", err),
        }
    }
}

impl std::error::Error for PipelineError {}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Generate,
    Extract,
    Validate,
    Execute,
    Summarize,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Stage::Generate => "query.generate",
            Stage::Extract => "query.extract",
            Stage::Validate => "query.validate",
            Stage::Execute => "query.execute",
            Stage::Summarize => "result.summarize",
        }
    }

    fn span(self) -> tracing::Span {
        match self {
            Stage::Generate => tracing::info_span!(
                "query.generate",
                latency_ms = tracing::field::Empty,
                outcome = tracing::field::Empty,
            ),
            Stage::Extract => tracing::info_span!(
                "query.extract",
                latency_ms = tracing::field::Empty,
                outcome = tracing::field::Empty,
            ),
            Stage::Validate => tracing::info_span!(
                "query.validate",
                latency_ms = tracing::field::Empty,
                outcome = tracing::field::Empty,
            ),
            Stage::Execute => tracing::info_span!(
                "query.execute",
                latency_ms = tracing::field::Empty,
                outcome = tracing::field::Empty,
            ),
            Stage::Summarize => tracing::info_span!(
                "result.summarize",
                latency_ms = tracing::field::Empty,
                outcome = tracing::field::Empty,
            ),
        }
    }
}

// Runs one stage inside its span and records latency and outcome.
async fn observed<T, E, F>(stage: Stage, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    async move {
        let started = Instant::now();
        let result = fut.await;

        let outcome = if result.is_ok() { "ok" } else { "error" };
        let elapsed = started.elapsed();
        tracing::Span::current().record("latency_ms", elapsed.as_millis() as u64);
        tracing::Span::current().record("outcome", outcome);
        metrics::observe_stage(stage.as_str(), outcome, elapsed);

        if let Err(err) = &result {
            tracing::warn!(stage = stage.as_str(), error = %err, "chat stage failed");
        }
        result
    }
    .instrument(stage.span())
    .await
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub row_cap: usize,
    pub display_threshold: usize,
    pub generation_timeout: Duration,
    pub summary_timeout: Duration,
}

/// The chat mediation chain: generate, extract, validate, execute,
/// summarize. Each stage gates the next; nothing runs concurrently.
#[derive(Clone)]
pub struct Pipeline {
    provider: Arc<dyn CompletionProvider>,
    store: Arc<dyn QueryStore>,
    schema: &'static SchemaDescriptor,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        store: Arc<dyn QueryStore>,
        schema: &'static SchemaDescriptor,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            provider,
            store,
            schema,
            settings,
        }
    }

    pub async fn run(&self, message: &str) -> Result<String, PipelineError> {
        let user_text = canonical::normalize_user_text(message);
        if user_text.is_empty() {
            return Err(PipelineError::InvalidRequest);
        }
        tracing::debug!(user_text = %user_text, "chat message received");

        let generated = observed(Stage::Generate, self.generate(&user_text))
            .await
            .map_err(PipelineError::Generation)?;
        tracing::debug!(generated = %generated, "generated text");

        let candidate = observed(Stage::Extract, async { extract(&generated) })
            .await
            .map_err(PipelineError::Extraction)?;

        let validated = observed(Stage::Validate, async {
            validate(&candidate, self.schema, self.settings.row_cap)
        })
        .await
        .map_err(PipelineError::Validation)?;
        tracing::info!(
            query_fingerprint = %validated.fingerprint(),
            row_bound = validated.row_bound(),
            "query validated"
        );
        tracing::debug!(sql = %validated.sql(), "validated statement");

        let results = observed(Stage::Execute, self.execute(&validated))
            .await
            .map_err(PipelineError::Execution)?;

        observed(Stage::Summarize, self.summarize(&results, &user_text))
            .await
            .map_err(PipelineError::Summarization)
    }

    async fn generate(&self, user_text: &str) -> Result<String, ProviderFailure> {
        if user_text.trim().is_empty() {
            return Err(ProviderFailure::EmptyInput);
        }

        let request = CompletionRequest {
            stage: CompletionStage::Generation,
            messages: generation_messages(self.schema, user_text),
            timeout: self.settings.generation_timeout,
        };
        self.provider.complete(&request).await
    }

    async fn execute(&self, query: &ValidatedQuery) -> Result<ResultSet, ExecutionFailure> {
        let rows = self.store.fetch_rows(query).await?;
        let results = ResultSet::bounded(rows, self.settings.row_cap);
        if results.truncated() {
            tracing::info!(
                matched_rows = results.matched_rows(),
                kept_rows = results.len(),
                "result set truncated"
            );
        }
        Ok(results)
    }

    async fn summarize(
        &self,
        results: &ResultSet,
        user_text: &str,
    ) -> Result<String, ProviderFailure> {
        let request = CompletionRequest {
            stage: CompletionStage::Summarization,
            messages: summary_messages(results, user_text, self.settings.display_threshold),
            timeout: self.settings.summary_timeout,
        };
        self.provider.complete(&request).await
    }
}

pub(crate) fn generation_messages(schema: &SchemaDescriptor, user_text: &str) -> Vec<ChatMessage> {
    let system = format!(
        "You translate job-search questions into a single PostgreSQL query.\n\
         \n\
         {schema}\n\
         \n\
         Rules:\n\
         - Reply with exactly one fenced ```sql code block containing the query.\n\
         - The query must be one read-only SELECT statement against the {table} table only.\n\
         - Use only the columns listed above.\n\
         - Match title, description and location with ILIKE and % wildcards.\n\
         - Correct obvious misspellings of job titles and locations.\n\
         - For questions about a specific job id, filter on id.\n\
         - Salary values are in Indian rupees.",
        schema = schema.render(),
        table = schema.table,
    );

    vec![ChatMessage::system(system), ChatMessage::user(user_text)]
}

pub(crate) fn summary_payload(results: &ResultSet, display_threshold: usize) -> serde_json::Value {
    serde_json::json!({
        "row_count": results.len(),
        "rows": results.rows(),
        "display_threshold": display_threshold,
        "additional_results": results.len() > display_threshold || results.truncated(),
        "truncated": results.truncated(),
    })
}

pub(crate) fn summary_messages(
    results: &ResultSet,
    user_text: &str,
    display_threshold: usize,
) -> Vec<ChatMessage> {
    let payload = summary_payload(results, display_threshold);

    let system = format!(
        "You answer a job seeker using only the job rows provided.\n\
         - Detail at most {display_threshold} jobs.\n\
         - If additional_results is true, say clearly that more matching jobs exist beyond the ones detailed.\n\
         - If rows is empty, say that no matching jobs were found.\n\
         - Never invent jobs, companies or salaries that are not in the rows.\n\
         - Salary values are in Indian rupees."
    );
    let user = format!(
        "Question: {}\n\n{}\n{}",
        user_text,
        RESULTS_MARKER,
        canonical::canonical_json_string(&payload)
    );

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}
