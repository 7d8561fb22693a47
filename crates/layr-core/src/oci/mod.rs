//! OCI blob-layout documents built around finished layers.
//!
//! Each step leaves a `metadata.json` descriptor next to its output and a
//! `blobs/sha256/<hex>` entry for everything it produced, which the next step
//! consolidates into its own blob directory.

mod blobs;
mod digest;
mod index;
mod manifest;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use blobs::{blobs_dir, consolidate, link_blob};
pub use digest::{hash_layer, LayerFormat};
pub use index::build_index;
pub use manifest::{build_manifest, ManifestRequest};

pub const LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar";
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
pub const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

pub const METADATA_FILE: &str = "metadata.json";

/// Content descriptor, also the shape of every `metadata.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub size: u64,
    pub digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
}

impl Descriptor {
    #[must_use]
    pub fn new(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            media_type: media_type.into(),
            size: bytes.len() as u64,
            digest: format!("sha256:{}", sha256_hex(bytes)),
            platform: None,
            annotations: BTreeMap::new(),
        }
    }

    /// The digest without its algorithm prefix.
    #[must_use]
    pub fn hex(&self) -> &str {
        self.digest
            .strip_prefix("sha256:")
            .unwrap_or(&self.digest)
    }
}

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn read_metadata(dir: &Path) -> Result<Descriptor> {
    let path = dir.join(METADATA_FILE);
    let contents = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&contents).with_context(|| format!("invalid metadata in {}", path.display()))
}

pub(crate) fn write_metadata(dir: &Path, descriptor: &Descriptor) -> Result<()> {
    let path = dir.join(METADATA_FILE);
    let bytes = serde_json::to_vec(descriptor).context("encoding metadata")?;
    fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))
}

/// Writes `bytes` to `dir/name` and links it into `dir`'s blob directory.
pub(crate) fn write_document(
    dir: &Path,
    name: &str,
    media_type: &str,
    bytes: &[u8],
) -> Result<Descriptor> {
    let path = dir.join(name);
    fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
    let descriptor = Descriptor::new(media_type, bytes);
    link_blob(&blobs_dir(dir), descriptor.hex(), &path)?;
    Ok(descriptor)
}
