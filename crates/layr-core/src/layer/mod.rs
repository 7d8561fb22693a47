//! Layer assembly.
//!
//! Building happens in two phases. While the builder is open, declared
//! entries and their synthesized parents are staged in insertion order and
//! directory merges are queued. `close` then writes the staged entries, runs
//! the queued merges against the now complete set of recorded paths and
//! persists the archive.
//!
//! A builder created with [`LayerBuilder::open`] appends to an archive that
//! already exists at the output path. Its members count as recorded before
//! anything is staged.
//!
//! - deterministic tar writing: `layer/archive.rs`
//! - appending to an existing archive: `layer/existing.rs`
//! - host tree merging: `layer/merge.rs`

mod archive;
mod existing;
mod merge;


use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use layr_domain::{
    CanonicalPath, DirectoryEntry, EntrySpec, FileContent, FileEntry, LayerError, LinkEntry,
};
use serde::Serialize;
use tar::EntryType;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::LayerConfig;

use archive::{ArchiveWriter, EntryMeta, HashingWriter};
use merge::MergeJob;

const LINK_MODE: u32 = 0o777;

/// What happened to an entry handed to [`LayerBuilder::add_entry`].
#[derive(Debug)]
pub enum Insertion {
    Added,
    /// A synthesized parent directory took the declared attributes.
    Completed,
    /// The directory was already declared; only its sources were queued.
    Kept,
    /// The path was already recorded and the entry was dropped.
    Duplicate(LayerError),
}

/// Result of a finished layer build.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LayerSummary {
    pub path: PathBuf,
    pub size: u64,
    /// `sha256:<hex>` of the archive bytes.
    pub digest: String,
    pub entries: usize,
    pub duplicates: usize,
}

#[derive(Debug)]
enum StagedEntry {
    Directory {
        meta: EntryMeta,
        synthesized: bool,
    },
    File {
        meta: EntryMeta,
        content: StagedContent,
    },
    Symlink {
        meta: EntryMeta,
        target: String,
    },
}

#[derive(Debug)]
enum StagedContent {
    Host(PathBuf),
    Inline(Vec<u8>),
}

/// Everything one build owns; nothing here is shared between builders.
#[derive(Debug)]
struct LayerState {
    /// Members of the archive being appended to.
    existing: HashMap<CanonicalPath, EntryType>,
    staged: IndexMap<CanonicalPath, StagedEntry>,
    merges: Vec<MergeJob>,
    duplicates: usize,
    file_mode: u32,
    dir_mode: u32,
}

#[derive(Debug)]
pub struct LayerBuilder {
    config: LayerConfig,
    state: LayerState,
}

impl LayerBuilder {
    /// Starts an empty layer; `close` replaces whatever is at the output.
    #[must_use]
    pub fn new(config: LayerConfig) -> Self {
        let state = LayerState {
            existing: HashMap::new(),
            staged: IndexMap::new(),
            merges: Vec::new(),
            duplicates: 0,
            file_mode: config.file_mode(),
            dir_mode: config.dir_mode(),
        };
        Self { config, state }
    }

    /// Starts a layer that extends the archive at the output path, if any.
    ///
    /// Entries already in that archive take precedence over everything
    /// added afterwards.
    pub fn open(config: LayerConfig) -> Result<Self, LayerError> {
        let existing = existing::recorded_members(&config.output)?;
        let mut builder = Self::new(config);
        builder.state.existing = existing;
        Ok(builder)
    }

    #[must_use]
    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    /// Stages one entry, synthesizing any missing parent directories first.
    pub fn add_entry(
        &mut self,
        path: CanonicalPath,
        spec: EntrySpec,
    ) -> Result<Insertion, LayerError> {
        self.ensure_parent(&path);

        if let Some(kind) = self.state.existing.get(&path).copied() {
            return Ok(match spec {
                EntrySpec::Directory(directory) if kind.is_dir() => {
                    self.queue_merge(&path, &directory);
                    Insertion::Kept
                }
                _ => skip_duplicate(&mut self.state.duplicates, &path),
            });
        }

        if let Some(existing) = self.state.staged.get_mut(&path) {
            return Ok(match (existing, spec) {
                (
                    StagedEntry::Directory { meta, synthesized },
                    EntrySpec::Directory(directory),
                ) => {
                    let resolved = resolve_directory(&directory, self.state.dir_mode);
                    let outcome = if *synthesized {
                        debug!(path = %path, "completing synthesized directory");
                        *meta = resolved;
                        *synthesized = false;
                        Insertion::Completed
                    } else {
                        Insertion::Kept
                    };
                    self.queue_merge(&path, &directory);
                    outcome
                }
                _ => skip_duplicate(&mut self.state.duplicates, &path),
            });
        }

        let staged = match spec {
            EntrySpec::File(file) => self.stage_file(file)?,
            EntrySpec::Link(link) => stage_link(link),
            EntrySpec::Directory(directory) => {
                self.queue_merge(&path, &directory);
                StagedEntry::Directory {
                    meta: resolve_directory(&directory, self.state.dir_mode),
                    synthesized: false,
                }
            }
        };
        self.state.staged.insert(path, staged);
        Ok(Insertion::Added)
    }

    /// Writes staged entries, runs queued merges and persists the archive.
    pub fn close(self) -> Result<LayerSummary, LayerError> {
        let Self { config, state } = self;
        let output = config.output.as_path();
        let parent = output
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|err| LayerError::archive(parent, err))?;
        let temp = NamedTempFile::new_in(parent).map_err(|err| LayerError::archive(output, err))?;
        let mut archive = ArchiveWriter::new(
            HashingWriter::new(BufWriter::new(temp)),
            config.mtime,
            output,
        );

        let mut ledger: HashSet<CanonicalPath> = HashSet::with_capacity(state.staged.len());
        if !state.existing.is_empty() {
            let copied = existing::copy_members(output, &mut archive)?;
            debug!(entries = copied, "copied existing members");
            ledger.extend(state.existing.into_keys());
        }
        for (path, entry) in state.staged {
            write_staged(&mut archive, &path, entry)?;
            ledger.insert(path);
        }
        for job in &state.merges {
            let written = job.run(&mut archive, &mut ledger)?;
            debug!(entries = written, "merge finished");
        }

        let (buffer, digest, size) = archive.finish()?.into_parts();
        let mut temp = buffer
            .into_inner()
            .map_err(|err| LayerError::archive(output, err.into_error()))?;
        temp.flush().map_err(|err| LayerError::archive(output, err))?;
        temp.persist(output)
            .map_err(|err| LayerError::archive(output, err.error))?;

        let summary = LayerSummary {
            path: output.to_path_buf(),
            size,
            digest: format!("sha256:{digest}"),
            entries: ledger.len(),
            duplicates: state.duplicates,
        };
        info!(
            path = %summary.path.display(),
            entries = summary.entries,
            digest = %summary.digest,
            "layer written"
        );
        Ok(summary)
    }

    fn ensure_parent(&mut self, path: &CanonicalPath) {
        let Some(parent) = path.parent() else {
            return;
        };
        if self.state.staged.contains_key(&parent)
            || self.state.existing.contains_key(&parent)
        {
            return;
        }
        self.ensure_parent(&parent);
        debug!(path = %parent, "synthesizing parent directory");
        let meta = EntryMeta {
            mode: self.state.dir_mode,
            uid: 0,
            gid: 0,
        };
        self.state.staged.insert(
            parent,
            StagedEntry::Directory {
                meta,
                synthesized: true,
            },
        );
    }

    fn stage_file(&self, file: FileEntry) -> Result<StagedEntry, LayerError> {
        let (base, content) = match file.content {
            FileContent::Source(path) => {
                let metadata =
                    fs::metadata(&path).map_err(|err| LayerError::missing_source(&path, err))?;
                if !metadata.is_file() {
                    return Err(LayerError::UnsupportedFilesystemObject { path });
                }
                let base = metadata.permissions().mode() & 0o7777;
                (base, StagedContent::Host(path))
            }
            FileContent::Text(text) => (self.state.file_mode, StagedContent::Inline(text.into_bytes())),
        };
        let meta = EntryMeta {
            mode: file.mode.apply(base, false),
            uid: file.uid.unwrap_or(0),
            gid: file.gid.unwrap_or(0),
        };
        Ok(StagedEntry::File { meta, content })
    }

    fn queue_merge(&mut self, path: &CanonicalPath, directory: &DirectoryEntry) {
        if directory.sources.is_empty() {
            return;
        }
        debug!(path = %path, sources = directory.sources.len(), "queueing directory merge");
        self.state.merges.push(MergeJob::new(
            path.clone(),
            directory.uid.unwrap_or(0),
            directory.gid.unwrap_or(0),
            directory.sources.clone(),
        ));
    }
}

fn skip_duplicate(duplicates: &mut usize, path: &CanonicalPath) -> Insertion {
    warn!("{path} already exists, skipping");
    *duplicates += 1;
    Insertion::Duplicate(LayerError::DuplicateEntry {
        path: path.to_string(),
    })
}

fn resolve_directory(directory: &DirectoryEntry, dir_mode: u32) -> EntryMeta {
    EntryMeta {
        mode: directory.mode.apply(dir_mode, true),
        uid: directory.uid.unwrap_or(0),
        gid: directory.gid.unwrap_or(0),
    }
}

fn stage_link(link: LinkEntry) -> StagedEntry {
    StagedEntry::Symlink {
        meta: EntryMeta {
            mode: LINK_MODE,
            uid: link.uid.unwrap_or(0),
            gid: link.gid.unwrap_or(0),
        },
        target: link.target,
    }
}

fn write_staged<W: Write>(
    archive: &mut ArchiveWriter<W>,
    path: &CanonicalPath,
    entry: StagedEntry,
) -> Result<(), LayerError> {
    match entry {
        StagedEntry::Directory { meta, .. } => archive.append_directory(path, meta),
        StagedEntry::Symlink { meta, target } => {
            archive.append_symlink(path, meta, target.as_bytes())
        }
        StagedEntry::File {
            meta,
            content: StagedContent::Inline(bytes),
        } => archive.append_file(path, meta, bytes.len() as u64, bytes.as_slice()),
        StagedEntry::File {
            meta,
            content: StagedContent::Host(source),
        } => {
            let file = File::open(&source).map_err(|err| LayerError::missing_source(&source, err))?;
            let size = file
                .metadata()
                .map_err(|err| LayerError::missing_source(&source, err))?
                .len();
            archive.append_file(path, meta, size, file)
        }
    }
}
