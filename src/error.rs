use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("signal parameter `{0}` is required but was not provided")]
    MissingSignalParam(&'static str),

    #[error("inconsistent signal parameters: {0}")]
    InconsistentSignal(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unexpected configuration keys: {0:?}")]
    UnexpectedKeys(Vec<String>),

    #[error("invalid hyperparameter `{name}`: {reason}")]
    InvalidHyperparameter { name: &'static str, reason: String },

    /// A layer's output extent reached zero while probing shapes.
    #[error("input of {n_chans} channels x {n_times} samples is too small: layer `{layer}` cannot take shape {shape:?}")]
    InputTooShort {
        n_chans: usize,
        n_times: usize,
        layer: &'static str,
        shape: [usize; 4],
    },

    #[error("malformed tensor file {path}: {reason}")]
    MalformedTensor { path: String, reason: String },

    #[error("parameter `{0}` not found")]
    MissingParam(String),

    #[error("parameter `{name}` has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record error: {0}")]
    Recorder(#[from] burn::record::RecorderError),
}

impl Error {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidHyperparameter {
            name,
            reason: reason.into(),
        }
    }
}
