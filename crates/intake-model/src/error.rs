use std::path::PathBuf;

/// Errors raised by the model crate (snapshot I/O and aggregate invariants).
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("snapshot I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("record identity already set to {existing}")]
    IdentityAlreadySet { existing: String },
    #[error("no {kind} at index {index}")]
    NoSuchEntry { kind: &'static str, index: usize },
    #[error("unknown history type: {0}")]
    UnknownHistoryType(String),
    #[error("no field change for key: {0}")]
    UnknownField(String),
}
