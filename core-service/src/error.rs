use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Playback error: {0}")]
    Playback(#[from] core_playback::PlaybackError),
}

impl ServiceError {
    /// The underlying playback error, if this is one.
    pub fn as_playback(&self) -> Option<&core_playback::PlaybackError> {
        match self {
            ServiceError::Playback(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
