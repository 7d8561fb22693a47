use std::io;
use std::path::PathBuf;

/// Errors surfaced while assembling a layer.
///
/// Every variant except [`LayerError::DuplicateEntry`] aborts the build.
#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error("[LY101] invalid mode string '{clause}' in '{mode}'")]
    InvalidModeFormat { mode: String, clause: String },
    #[error("[LY102] invalid mode '{mode}', please specify numeric modes as 4-digit octal")]
    InvalidNumericMode { mode: String },
    #[error("[LY103] invalid umask '{umask}'")]
    InvalidUmask { umask: String },
    #[error("[LY110] unknown type for {path}: {kind}")]
    UnsupportedEntryType { path: String, kind: String },
    #[error("[LY111] invalid entry for {path}: {reason}")]
    InvalidEntry { path: String, reason: String },
    #[error("[LY112] path '{path}' must not contain '..'")]
    InvalidPath { path: String },
    #[error("[LY113] malformed entry specification: {reason}")]
    MalformedEntries { reason: String },
    #[error("[LY201] unsupported file: {}", path.display())]
    UnsupportedFilesystemObject { path: PathBuf },
    #[error("[LY202] cannot read source {}: {source}", path.display())]
    MissingSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("[LY301] {path} already exists, skipping")]
    DuplicateEntry { path: String },
    #[error("[LY302] failed to write layer archive {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("[LY303] {} is not a tar file: {source}", path.display())]
    NotAnArchive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LayerError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidModeFormat { .. } => "LY101",
            Self::InvalidNumericMode { .. } => "LY102",
            Self::InvalidUmask { .. } => "LY103",
            Self::UnsupportedEntryType { .. } => "LY110",
            Self::InvalidEntry { .. } => "LY111",
            Self::InvalidPath { .. } => "LY112",
            Self::MalformedEntries { .. } => "LY113",
            Self::UnsupportedFilesystemObject { .. } => "LY201",
            Self::MissingSource { .. } => "LY202",
            Self::DuplicateEntry { .. } => "LY301",
            Self::Archive { .. } => "LY302",
            Self::NotAnArchive { .. } => "LY303",
        }
    }

    /// Whether the error must abort the build.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::DuplicateEntry { .. })
    }

    pub fn missing_source(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::MissingSource {
            path: path.into(),
            source,
        }
    }

    pub fn archive(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Archive {
            path: path.into(),
            source,
        }
    }
}
