use http::StatusCode;

use crate::{apis::LlmError, prompt::PromptError, schema::ErrorBody};

/// Everything that can go wrong between a validated question and its answer.
#[derive(Debug, thiserror::Error)]
pub enum AskError {
    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl AskError {
    pub fn status(&self) -> StatusCode {
        match self {
            AskError::Prompt(_) | AskError::Llm(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            detail: format!("An error occurred while processing your request: {}", self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_carries_cause() {
        let err = AskError::from(LlmError::Api {
            status: 429,
            message: "Rate limit reached".to_string(),
        });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            err.to_body().detail,
            "An error occurred while processing your request: API error (429): Rate limit reached"
        );
    }

    #[test]
    fn test_prompt_error_is_server_error() {
        let err = AskError::from(PromptError::MissingVariable("tone".to_string()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_body().detail.ends_with("missing variable `tone` in prompt template"));
    }
}
