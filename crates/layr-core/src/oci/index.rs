use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use super::{
    blobs_dir, consolidate, read_metadata, write_document, write_metadata, Descriptor,
    INDEX_MEDIA_TYPE,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageIndex<'a> {
    schema_version: u32,
    media_type: &'static str,
    manifests: &'a [Descriptor],
}

/// Combines per-platform images into one index written to `out`.
pub fn build_index(images: &[PathBuf], out: &Path) -> Result<Descriptor> {
    let manifests = images
        .iter()
        .map(|image| read_metadata(image))
        .collect::<Result<Vec<_>>>()?;
    let bytes = serde_json::to_vec(&ImageIndex {
        schema_version: 2,
        media_type: INDEX_MEDIA_TYPE,
        manifests: &manifests,
    })
    .context("encoding image index")?;

    fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    let descriptor = write_document(out, "manifest.json", INDEX_MEDIA_TYPE, &bytes)?;
    write_metadata(out, &descriptor)?;

    let blobs = blobs_dir(out);
    for image in images {
        consolidate(image, &blobs)?;
    }
    info!(
        out = %out.display(),
        manifests = manifests.len(),
        digest = %descriptor.digest,
        "image index written"
    );
    Ok(descriptor)
}
