use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use layr_domain::{CanonicalPath, DirectorySource, LayerError, ModeSpec};
use tracing::debug;
use walkdir::WalkDir;

use super::archive::{ArchiveWriter, EntryMeta};

/// Deferred copy of host trees into a declared directory.
#[derive(Debug)]
pub(crate) struct MergeJob {
    target: CanonicalPath,
    uid: u64,
    gid: u64,
    sources: Vec<DirectorySource>,
}

/// Overrides applied to every object copied from one source.
struct MergeContext<'a> {
    target: &'a CanonicalPath,
    uid: u64,
    gid: u64,
    mode: &'a ModeSpec,
}

impl MergeJob {
    pub(crate) fn new(
        target: CanonicalPath,
        uid: u64,
        gid: u64,
        sources: Vec<DirectorySource>,
    ) -> Self {
        Self {
            target,
            uid,
            gid,
            sources,
        }
    }

    /// Copies every source, last-declared first, skipping recorded paths.
    ///
    /// Returns the number of entries written.
    pub(crate) fn run<W: Write>(
        &self,
        archive: &mut ArchiveWriter<W>,
        ledger: &mut HashSet<CanonicalPath>,
    ) -> Result<usize, LayerError> {
        let mut written = 0;
        for source in self.sources.iter().rev() {
            let context = MergeContext {
                target: &self.target,
                uid: source.uid.unwrap_or(self.uid),
                gid: source.gid.unwrap_or(self.gid),
                mode: &source.mode,
            };
            debug!(
                directory = %self.target,
                source = %source.path.display(),
                uid = context.uid,
                gid = context.gid,
                "merging source tree"
            );
            written += copy_tree(&source.path, &context, archive, ledger)?;
        }
        Ok(written)
    }
}

fn copy_tree<W: Write>(
    root: &Path,
    context: &MergeContext<'_>,
    archive: &mut ArchiveWriter<W>,
    ledger: &mut HashSet<CanonicalPath>,
) -> Result<usize, LayerError> {
    let mut written = 0;
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(root).to_path_buf();
            LayerError::missing_source(path, err.into())
        })?;
        let host_path = entry.path();
        let relative = host_path
            .strip_prefix(root)
            .ok()
            .and_then(Path::to_str)
            .ok_or_else(|| LayerError::InvalidPath {
                path: host_path.display().to_string(),
            })?;
        let dest = context.target.join(relative)?;
        if ledger.contains(&dest) {
            continue;
        }

        let metadata = entry
            .metadata()
            .map_err(|err| LayerError::missing_source(host_path, err.into()))?;
        let file_type = metadata.file_type();
        let base = metadata.permissions().mode() & 0o7777;
        let meta = EntryMeta {
            mode: context.mode.apply(base, file_type.is_dir()),
            uid: context.uid,
            gid: context.gid,
        };

        if file_type.is_dir() {
            archive.append_directory(&dest, meta)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(host_path)
                .map_err(|err| LayerError::missing_source(host_path, err))?;
            archive.append_symlink(&dest, meta, target.as_os_str().as_bytes())?;
        } else if file_type.is_file() {
            let file =
                File::open(host_path).map_err(|err| LayerError::missing_source(host_path, err))?;
            let size = file
                .metadata()
                .map_err(|err| LayerError::missing_source(host_path, err))?
                .len();
            archive.append_file(&dest, meta, size, file)?;
        } else {
            return Err(LayerError::UnsupportedFilesystemObject {
                path: host_path.to_path_buf(),
            });
        }
        debug!(path = %dest, mode = meta.mode, "merged");
        ledger.insert(dest);
        written += 1;
    }
    Ok(written)
}
