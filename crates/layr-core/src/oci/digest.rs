use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::info;

use super::{blobs_dir, link_blob, write_metadata, Descriptor, LAYER_MEDIA_TYPE};

/// How a layer archive was stored; compression itself happens elsewhere.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LayerFormat {
    #[default]
    Tar,
    Gzip,
    Zstd,
}

impl LayerFormat {
    pub const ALL: [Self; 3] = [Self::Tar, Self::Gzip, Self::Zstd];

    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Tar => "layer.tar",
            Self::Gzip => "layer.tar.gz",
            Self::Zstd => "layer.tar.zst",
        }
    }

    #[must_use]
    pub fn media_type(self) -> String {
        let suffix = match self {
            Self::Tar => "",
            Self::Gzip => "+gzip",
            Self::Zstd => "+zstd",
        };
        format!("{LAYER_MEDIA_TYPE}{suffix}")
    }
}

impl FromStr for LayerFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "" | "tar" => Ok(Self::Tar),
            "gzip" => Ok(Self::Gzip),
            "zstd" => Ok(Self::Zstd),
            other => Err(format!(
                "unknown layer format '{other}' (expected tar, gzip or zstd)"
            )),
        }
    }
}

impl fmt::Display for LayerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tar => "tar",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
        })
    }
}

/// Digests the layer archive in `dir` and records it for later aggregation.
pub fn hash_layer(dir: &Path, format: LayerFormat) -> Result<Descriptor> {
    let archive = dir.join(format.file_name());
    let mut file =
        File::open(&archive).with_context(|| format!("opening {}", archive.display()))?;
    let mut hasher = Sha256::new();
    let mut size = 0u64;
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .with_context(|| format!("reading {}", archive.display()))?;
        if read == 0 {
            break;
        }
        size = size.saturating_add(read as u64);
        hasher.update(&buffer[..read]);
    }
    let hex = format!("{:x}", hasher.finalize());
    let descriptor = Descriptor {
        media_type: format.media_type(),
        size,
        digest: format!("sha256:{hex}"),
        platform: None,
        annotations: Default::default(),
    };

    write_metadata(dir, &descriptor)?;
    link_blob(&blobs_dir(dir), &hex, &archive)?;
    info!(layer = %archive.display(), digest = %descriptor.digest, "layer hashed");
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::read_metadata;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn formats_parse_case_insensitively() {
        assert_eq!("TAR".parse::<LayerFormat>(), Ok(LayerFormat::Tar));
        assert_eq!("gzip".parse::<LayerFormat>(), Ok(LayerFormat::Gzip));
        assert_eq!("Zstd".parse::<LayerFormat>(), Ok(LayerFormat::Zstd));
        assert!("xz".parse::<LayerFormat>().is_err());
        assert_eq!(
            LayerFormat::Zstd.media_type(),
            "application/vnd.oci.image.layer.v1.tar+zstd"
        );
        assert_eq!(LayerFormat::Gzip.file_name(), "layer.tar.gz");
    }

    #[test]
    fn hashing_writes_metadata_and_blob_link() -> Result<()> {
        let temp = tempdir()?;
        fs::write(temp.path().join("layer.tar.gz"), b"hello")?;
        let descriptor = hash_layer(temp.path(), LayerFormat::Gzip)?;
        assert_eq!(
            descriptor.digest,
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(descriptor.size, 5);
        assert_eq!(
            descriptor.media_type,
            "application/vnd.oci.image.layer.v1.tar+gzip"
        );
        assert_eq!(read_metadata(temp.path())?, descriptor);
        let blob = blobs_dir(temp.path()).join(descriptor.hex());
        assert!(fs::symlink_metadata(&blob)?.file_type().is_symlink());
        assert_eq!(fs::read(blob)?, b"hello");
        Ok(())
    }

    #[test]
    fn missing_archives_are_errors() {
        let temp = tempdir().unwrap();
        assert!(hash_layer(temp.path(), LayerFormat::Tar).is_err());
    }
}
