use std::io;

use thiserror::Error;

/// Errors raised while building or training a chain CRF learner
#[derive(Debug, Error)]
pub enum Error {
    /// A parameter, shape or sequence failed validation
    #[error("{0}")]
    InvalidInput(String),
    /// An operation needs a weight vector before one was initialized
    #[error("no weight vector: initialize or train the learner first")]
    MissingWeights,
    /// The selected strategy only defines a single-example gradient
    #[error("objective is not defined for the {0} strategy")]
    ObjectiveUndefined(&'static str),
    /// Inference produced a non-finite quantity
    #[error("numerical failure: {0}")]
    Numerical(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid<S: Into<String>>(msg: S) -> Self {
        Error::InvalidInput(msg.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
