use std::path::PathBuf;

use layr_domain::{LayerError, ModeSpec};

pub const DEFAULT_UMASK: &str = "0022";

/// Settings shared by every entry of one layer build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerConfig {
    /// Archive written on a successful build.
    pub output: PathBuf,
    /// Modification time stamped on every entry, in epoch seconds.
    pub mtime: u64,
    pub umask: u32,
}

impl LayerConfig {
    #[must_use]
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            mtime: 0,
            umask: 0o022,
        }
    }

    #[must_use]
    pub fn with_mtime(mut self, mtime: u64) -> Self {
        self.mtime = mtime;
        self
    }

    pub fn with_umask(mut self, umask: &str) -> Result<Self, LayerError> {
        self.umask = parse_umask(umask)?;
        Ok(self)
    }

    #[must_use]
    pub fn file_mode(&self) -> u32 {
        0o666 & !self.umask
    }

    #[must_use]
    pub fn dir_mode(&self) -> u32 {
        0o777 & !self.umask
    }
}

/// Parses a umask the same way entry modes are parsed, evaluated from zero.
pub fn parse_umask(raw: &str) -> Result<u32, LayerError> {
    let invalid = || LayerError::InvalidUmask {
        umask: raw.to_string(),
    };
    let mode = ModeSpec::parse(Some(raw), 0).map_err(|_| invalid())?;
    let bits = mode.apply(0, false);
    if bits > 0o777 {
        return Err(invalid());
    }
    Ok(bits)
}
