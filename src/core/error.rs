use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("remote API returned HTTP {0}")]
    Transport(u16),

    #[error("remote API error: {0}")]
    Remote(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
