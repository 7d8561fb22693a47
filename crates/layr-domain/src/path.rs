use std::fmt;
use std::path::Path;

use serde::{Serialize, Serializer};

use crate::error::LayerError;

/// Root-relative archive path: `.` for the root, `./a/b` otherwise.
///
/// Ordering is plain string ordering, which places every parent before its
/// children.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalPath(String);

impl CanonicalPath {
    pub const ROOT: &'static str = ".";

    #[must_use]
    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    /// Canonicalizes a raw path string.
    ///
    /// A leading `/` is stripped, empty and `.` segments are dropped. `..` is
    /// never resolved; it is rejected.
    pub fn normalize(raw: &str) -> Result<Self, LayerError> {
        let mut segments = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    return Err(LayerError::InvalidPath {
                        path: raw.to_string(),
                    })
                }
                other => segments.push(other),
            }
        }
        if segments.is_empty() {
            Ok(Self::root())
        } else {
            Ok(Self(format!("./{}", segments.join("/"))))
        }
    }

    /// Canonicalizes a host filesystem path, which must be valid UTF-8.
    pub fn from_host_path(path: &Path) -> Result<Self, LayerError> {
        let raw = path.to_str().ok_or_else(|| LayerError::InvalidPath {
            path: path.display().to_string(),
        })?;
        Self::normalize(raw)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    /// The containing directory; `None` only for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(1) | None => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
        }
    }

    /// Appends a relative path below this one.
    pub fn join(&self, relative: &str) -> Result<Self, LayerError> {
        let tail = Self::normalize(relative)?;
        if tail.is_root() {
            return Ok(self.clone());
        }
        if self.is_root() {
            return Ok(tail);
        }
        Ok(Self(format!("{}/{}", self.0, &tail.0[2..])))
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for CanonicalPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}
