//! Loading the entry document and the include/exclude path lists.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use layr_domain::{
    parse_entry_document, CanonicalPath, DirectoryEntry, DirectorySource, EntrySpec, FileContent,
    FileEntry, LayerError, LinkEntry, ModeSpec,
};
use tracing::info;

use crate::config::LayerConfig;
use crate::layer::{LayerBuilder, LayerSummary};

/// Everything one `layer` invocation reads.
#[derive(Clone, Debug)]
pub struct LayerRequest {
    pub entries: Option<PathBuf>,
    pub includes: Option<PathBuf>,
    pub excludes: Option<PathBuf>,
    pub config: LayerConfig,
}

/// Reads the JSON entry document at `path`, sorted by canonical path.
pub fn load_entries(path: &Path, umask: u32) -> Result<Vec<(CanonicalPath, EntrySpec)>> {
    let document =
        fs::read_to_string(path).with_context(|| format!("reading entries {}", path.display()))?;
    let entries = parse_entry_document(&document, umask)
        .with_context(|| format!("invalid entries in {}", path.display()))?;
    Ok(entries)
}

/// Turns the include list, minus exact exclude lines, into entries keyed by
/// their own host path.
pub fn load_additional(
    includes: Option<&Path>,
    excludes: Option<&Path>,
) -> Result<Vec<(CanonicalPath, EntrySpec)>> {
    let mut paths = match includes {
        Some(path) => read_path_list(path)?,
        None => return Ok(Vec::new()),
    };
    if let Some(path) = excludes {
        for excluded in read_path_list(path)? {
            paths.remove(&excluded);
        }
    }
    let mut entries = paths
        .iter()
        .map(|raw| {
            let host = Path::new(raw);
            let spec = additional_entry(host)?;
            Ok((CanonicalPath::from_host_path(host)?, spec))
        })
        .collect::<Result<Vec<_>, LayerError>>()?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

/// Infers an entry from what is on disk at `path`, without following links.
pub fn additional_entry(path: &Path) -> Result<EntrySpec, LayerError> {
    let metadata =
        fs::symlink_metadata(path).map_err(|err| LayerError::missing_source(path, err))?;
    let file_type = metadata.file_type();
    if file_type.is_dir() {
        Ok(EntrySpec::Directory(DirectoryEntry {
            mode: ModeSpec::default(),
            uid: Some(0),
            gid: Some(0),
            sources: vec![DirectorySource {
                path: path.to_path_buf(),
                uid: None,
                gid: None,
                mode: ModeSpec::default(),
            }],
        }))
    } else if file_type.is_symlink() {
        let target = fs::read_link(path).map_err(|err| LayerError::missing_source(path, err))?;
        let target = target
            .into_os_string()
            .into_string()
            .map_err(|raw| LayerError::InvalidPath {
                path: raw.to_string_lossy().into_owned(),
            })?;
        Ok(EntrySpec::Link(LinkEntry {
            target,
            uid: Some(0),
            gid: Some(0),
        }))
    } else if file_type.is_file() {
        Ok(EntrySpec::File(FileEntry {
            content: FileContent::Source(path.to_path_buf()),
            mode: ModeSpec::default(),
            uid: Some(0),
            gid: Some(0),
        }))
    } else {
        Err(LayerError::UnsupportedFilesystemObject {
            path: path.to_path_buf(),
        })
    }
}

/// Builds the layer described by `request`.
///
/// Explicit entries come first and additional paths after them, so the
/// explicit declaration wins any collision. An archive already at the
/// output is extended, and its members win over both. Returns `None` without
/// touching the output when there is nothing to add.
pub fn build_layer(request: &LayerRequest) -> Result<Option<LayerSummary>> {
    let mut entries = match &request.entries {
        Some(path) => load_entries(path, request.config.umask)?,
        None => Vec::new(),
    };
    entries.extend(load_additional(
        request.includes.as_deref(),
        request.excludes.as_deref(),
    )?);
    if entries.is_empty() {
        info!("no entries, skipping layer");
        return Ok(None);
    }

    let mut builder = LayerBuilder::open(request.config.clone())?;
    for (path, spec) in entries {
        info!(path = %path, kind = spec.kind(), "adding to layer");
        builder.add_entry(path, spec)?;
    }
    let summary = builder.close()?;
    Ok(Some(summary))
}

fn read_path_list(path: &Path) -> Result<BTreeSet<String>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading path list {}", path.display()))?;
    Ok(contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect())
}
