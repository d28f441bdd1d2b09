use axum::http::StatusCode;
use jobchat_contracts::{ChatResponse, ErrorKind};
use jobchat_store::ExecutionErrorKind;
use serde::Serialize;

use super::pipeline::PipelineError;
use crate::provider::ProviderFailure;

pub(super) const SUCCESS_MESSAGE: &str = "Generated response from the job assistant";

/// Wire shape of a successful `/chat` response.
#[derive(Debug, Serialize)]
pub(super) struct ChatSuccessBody {
    pub(super) message: &'static str,
    pub(super) response: String,
}

/// Wire shape of a failed `/chat` response.
#[derive(Debug, Serialize)]
pub(super) struct ChatFailureBody {
    pub(super) error: &'static str,
    pub(super) reason: ErrorKind,
    pub(super) detail: String,
}

/// Maps the pipeline's terminal state onto a response. Pure and total.
pub(super) fn compose(outcome: &Result<String, PipelineError>) -> ChatResponse {
    match outcome {
        Ok(narrative) => ChatResponse::Success {
            narrative: narrative.clone(),
        },
        Err(err) => ChatResponse::Failure {
            reason: err.kind(),
            detail: failure_detail(err),
        },
    }
}

pub(super) fn status_for(response: &ChatResponse) -> StatusCode {
    match response {
        ChatResponse::Success { .. } => StatusCode::OK,
        ChatResponse::Failure { reason, .. } if reason.is_client_error() => StatusCode::BAD_REQUEST,
        ChatResponse::Failure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(super) fn headline_for(reason: ErrorKind) -> &'static str {
    match reason {
        ErrorKind::InvalidRequest => "Message must not be empty.",
        ErrorKind::GenerationFailed => "Error generating a query for your request.",
        ErrorKind::ExtractionFailed => {
            "No SQL query generated. Please check the response format."
        }
        ErrorKind::ValidationFailed => "The generated query was rejected.",
        ErrorKind::ExecutionFailed => "Error executing SQL query.",
        ErrorKind::SummarizationFailed => "Error generating a response from the query results.",
    }
}

fn failure_detail(err: &PipelineError) -> String {
    match err {
        PipelineError::InvalidRequest => "message is empty after trimming".to_string(),
        PipelineError::Generation(failure) => provider_detail("query generator", failure),
        PipelineError::Extraction(failure) => failure.to_string(),
        PipelineError::Validation(failure) => failure.to_string(),
        PipelineError::Execution(failure) => match failure.kind {
            ExecutionErrorKind::SyntaxRejected => {
                "the store rejected the generated query".to_string()
            }
            ExecutionErrorKind::ConstraintViolated => {
                "the store refused the generated query".to_string()
            }
            ExecutionErrorKind::Timeout => "the query did not finish in time".to_string(),
            ExecutionErrorKind::Unknown => "the job store is unavailable".to_string(),
        },
        PipelineError::Summarization(failure) => provider_detail("summarizer", failure),
    }
}

fn provider_detail(who: &str, failure: &ProviderFailure) -> String {
    match failure {
        ProviderFailure::EmptyInput => format!("nothing to send to the {}", who),
        ProviderFailure::Unavailable(_) => format!("the {} is unavailable", who),
        ProviderFailure::Timeout => format!("the {} did not respond in time", who),
    }
}
