use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info};

use super::{
    blobs_dir, consolidate, read_metadata, write_document, write_metadata, Descriptor,
    LayerFormat, Platform, CONFIG_MEDIA_TYPE, MANIFEST_MEDIA_TYPE, REF_NAME_ANNOTATION,
};

/// Inputs of one image manifest.
#[derive(Clone, Debug)]
pub struct ManifestRequest {
    /// Hashed layer directories, bottom layer first.
    pub layers: Vec<PathBuf>,
    /// Container configuration (`Env`, `Cmd`, ...) embedded in the image config.
    pub config: PathBuf,
    pub architecture: String,
    pub os: String,
    pub tag: Option<String>,
    /// Image creation time in epoch seconds.
    pub created: u64,
    pub out: PathBuf,
}

#[derive(Serialize)]
struct ImageConfig<'a> {
    created: String,
    rootfs: RootFs,
    config: &'a Value,
    architecture: &'a str,
    os: &'a str,
}

#[derive(Serialize)]
struct RootFs {
    #[serde(rename = "type")]
    kind: &'static str,
    diff_ids: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageManifest<'a> {
    schema_version: u32,
    config: &'a Descriptor,
    layers: &'a [Descriptor],
}

/// Writes `config.json`, `manifest.json` and `metadata.json` for one image
/// and gathers every referenced blob under `out/blobs/sha256`.
///
/// Layer directories without an archive are empty layers and are skipped.
pub fn build_manifest(request: &ManifestRequest) -> Result<Descriptor> {
    let mut layers = Vec::with_capacity(request.layers.len());
    for dir in &request.layers {
        if !has_archive(dir) {
            debug!(layer = %dir.display(), "skipping empty layer");
            continue;
        }
        layers.push((dir.as_path(), read_metadata(dir)?));
    }

    let container: Value = serde_json::from_slice(
        &fs::read(&request.config)
            .with_context(|| format!("reading {}", request.config.display()))?,
    )
    .with_context(|| format!("invalid container config {}", request.config.display()))?;

    let image_config = ImageConfig {
        created: created_timestamp(request.created)?,
        rootfs: RootFs {
            kind: "layers",
            diff_ids: layers
                .iter()
                .map(|(_, descriptor)| descriptor.digest.clone())
                .collect(),
        },
        config: &container,
        architecture: &request.architecture,
        os: &request.os,
    };
    let config_bytes = serde_json::to_vec(&image_config).context("encoding image config")?;

    let out = request.out.as_path();
    fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    let config = write_document(out, "config.json", CONFIG_MEDIA_TYPE, &config_bytes)?;

    let layer_descriptors: Vec<Descriptor> =
        layers.iter().map(|(_, descriptor)| descriptor.clone()).collect();
    let manifest_bytes = serde_json::to_vec(&ImageManifest {
        schema_version: 2,
        config: &config,
        layers: &layer_descriptors,
    })
    .context("encoding image manifest")?;
    let mut manifest = write_document(out, "manifest.json", MANIFEST_MEDIA_TYPE, &manifest_bytes)?;

    manifest.platform = Some(Platform {
        architecture: request.architecture.clone(),
        os: request.os.clone(),
    });
    if let Some(tag) = request.tag.as_deref().filter(|tag| !tag.is_empty()) {
        manifest
            .annotations
            .insert(REF_NAME_ANNOTATION.to_string(), tag.to_string());
    }
    write_metadata(out, &manifest)?;

    let blobs = blobs_dir(out);
    for (dir, _) in &layers {
        consolidate(dir, &blobs)?;
    }
    info!(
        out = %out.display(),
        layers = layers.len(),
        digest = %manifest.digest,
        "image manifest written"
    );
    Ok(manifest)
}

fn has_archive(dir: &Path) -> bool {
    LayerFormat::ALL
        .iter()
        .any(|format| dir.join(format.file_name()).is_file())
}

fn created_timestamp(epoch: u64) -> Result<String> {
    let seconds = i64::try_from(epoch).context("creation time out of range")?;
    let created =
        OffsetDateTime::from_unix_timestamp(seconds).context("creation time out of range")?;
    created
        .format(&Rfc3339)
        .context("formatting creation time")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::{hash_layer, sha256_hex};
    use tempfile::tempdir;

    fn hashed_layer(root: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let dir = root.join(name);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("layer.tar"), bytes)?;
        hash_layer(&dir, LayerFormat::Tar)?;
        Ok(dir)
    }

    fn request(root: &Path, layers: Vec<PathBuf>, tag: Option<&str>) -> Result<ManifestRequest> {
        let config = root.join("container.json");
        fs::write(&config, br#"{"Env":["PATH=/bin"],"Cmd":["/bin/sh"]}"#)?;
        Ok(ManifestRequest {
            layers,
            config,
            architecture: "amd64".into(),
            os: "linux".into(),
            tag: tag.map(str::to_string),
            created: 0,
            out: root.join("image"),
        })
    }

    #[test]
    fn manifest_references_non_empty_layers() -> Result<()> {
        let temp = tempdir()?;
        let base = hashed_layer(temp.path(), "base", b"base layer")?;
        let empty = temp.path().join("empty");
        fs::create_dir_all(&empty)?;
        let app = hashed_layer(temp.path(), "app", b"app layer")?;

        let request = request(temp.path(), vec![base, empty, app], Some("demo:latest"))?;
        let descriptor = build_manifest(&request)?;
        let out = &request.out;

        let config_bytes = fs::read(out.join("config.json"))?;
        let config: Value = serde_json::from_slice(&config_bytes)?;
        assert_eq!(config["created"], "1970-01-01T00:00:00Z");
        assert_eq!(config["architecture"], "amd64");
        assert_eq!(config["config"]["Cmd"][0], "/bin/sh");
        let diff_ids = config["rootfs"]["diff_ids"].as_array().unwrap();
        assert_eq!(diff_ids.len(), 2);
        assert_eq!(diff_ids[0], format!("sha256:{}", sha256_hex(b"base layer")));

        let manifest_bytes = fs::read(out.join("manifest.json"))?;
        let manifest: Value = serde_json::from_slice(&manifest_bytes)?;
        assert_eq!(manifest["schemaVersion"], 2);
        assert_eq!(manifest["config"]["mediaType"], CONFIG_MEDIA_TYPE);
        assert_eq!(
            manifest["config"]["digest"],
            format!("sha256:{}", sha256_hex(&config_bytes))
        );
        assert_eq!(manifest["layers"].as_array().unwrap().len(), 2);

        assert_eq!(descriptor.media_type, MANIFEST_MEDIA_TYPE);
        assert_eq!(descriptor.digest, format!("sha256:{}", sha256_hex(&manifest_bytes)));
        assert_eq!(
            descriptor.annotations.get(REF_NAME_ANNOTATION).map(String::as_str),
            Some("demo:latest")
        );
        assert_eq!(read_metadata(out)?, descriptor);

        let blobs = blobs_dir(out);
        for digest in [
            sha256_hex(b"base layer"),
            sha256_hex(b"app layer"),
            sha256_hex(&config_bytes),
            sha256_hex(&manifest_bytes),
        ] {
            assert!(blobs.join(&digest).exists(), "missing blob {digest}");
        }
        Ok(())
    }

    #[test]
    fn empty_tags_add_no_annotation() -> Result<()> {
        let temp = tempdir()?;
        let base = hashed_layer(temp.path(), "base", b"base layer")?;
        let descriptor = build_manifest(&request(temp.path(), vec![base], Some(""))?)?;
        assert!(descriptor.annotations.is_empty());
        let metadata = fs::read_to_string(temp.path().join("image/metadata.json"))?;
        assert!(!metadata.contains("annotations"));
        assert!(metadata.contains(r#""platform":{"architecture":"amd64","os":"linux"}"#));
        Ok(())
    }

    #[test]
    fn creation_time_is_rendered_as_rfc3339() -> Result<()> {
        assert_eq!(created_timestamp(0)?, "1970-01-01T00:00:00Z");
        assert_eq!(created_timestamp(1_700_000_000)?, "2023-11-14T22:13:20Z");
        Ok(())
    }
}
