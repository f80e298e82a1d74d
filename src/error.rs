//! Error taxonomy for the router, matching the error design in SPEC_FULL.md §7.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("invalid input: {0}")]
    InputValidation(String),

    /// A graph invariant was violated (split of a non-existent edge, node id
    /// collision). Never surfaces internal ids to the caller.
    #[error("internal graph invariant violated")]
    GraphInvariant(#[source] Option<Box<dyn std::error::Error + Send + Sync>>),

    #[error("no route exists between the requested points")]
    NoRoute,

    /// The policy repeatedly returned invalid actions or its artifact could
    /// not be loaded, and the force-arriving fallback also failed.
    #[error("routing policy failed")]
    PolicyFailure(String),
}

impl RouterError {
    pub fn graph_invariant(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        RouterError::GraphInvariant(Some(Box::new(source)))
    }
}

impl ResponseError for RouterError {
    fn status_code(&self) -> StatusCode {
        match self {
            RouterError::InputValidation(_) => StatusCode::BAD_REQUEST,
            RouterError::GraphInvariant(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RouterError::NoRoute => StatusCode::UNPROCESSABLE_ENTITY,
            RouterError::PolicyFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            RouterError::GraphInvariant(_) | RouterError::PolicyFailure(_) => {
                log::error!("{}", self);
                HttpResponse::build(self.status_code())
                    .json(serde_json::json!({ "error": "internal server error" }))
            }
            _ => HttpResponse::build(self.status_code())
                .json(serde_json::json!({ "error": self.to_string() })),
        }
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;
