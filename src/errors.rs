use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Config(String),
    #[error("could not determine current position: {0}")]
    PositionUnavailable(String),
    #[error("venue search returned no candidates")]
    NoCandidates,
    #[error("cannot build a selection pool from an empty candidate list")]
    EmptyCandidateSet,
    #[error("every candidate in the pool has already been shown")]
    NoEligibleCandidates,
    #[error("detail lookup failed for venue {id}")]
    DetailLookup {
        id: String,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    pub fn detail_lookup(id: impl Into<String>, source: AppError) -> Self {
        AppError::DetailLookup {
            id: id.into(),
            source: Box::new(source),
        }
    }
}
