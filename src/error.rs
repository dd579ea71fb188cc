use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Feed request failed: non-2xx status (`status` set) or unreachable host (`status` None).
    #[error("notifications request failed ({}: {message})", .status.map(|s| s.to_string()).unwrap_or_else(|| "-".into()))]
    Transport { status: Option<u16>, message: String },

    #[error("malformed notification feed: {0}")]
    Parse(String),

    #[error("stored value under '{key}' is not valid JSON: {source}")]
    StoreDecode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("desktop notifications unavailable: {0}")]
    PermissionDenied(String),

    #[error("notification sink failed: {0}")]
    Sink(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}
