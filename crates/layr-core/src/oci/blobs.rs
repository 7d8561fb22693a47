use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

#[must_use]
pub fn blobs_dir(root: &Path) -> PathBuf {
    root.join("blobs").join("sha256")
}

/// Points `blobs/<hex>` at `target`, replacing a stale entry.
pub fn link_blob(blobs: &Path, hex: &str, target: &Path) -> Result<()> {
    fs::create_dir_all(blobs).with_context(|| format!("creating {}", blobs.display()))?;
    let target = fs::canonicalize(target)
        .with_context(|| format!("resolving blob {}", target.display()))?;
    let dest = blobs.join(hex);
    if fs::symlink_metadata(&dest).is_ok() {
        fs::remove_file(&dest).with_context(|| format!("replacing {}", dest.display()))?;
    }
    symlink(&target, &dest)
        .with_context(|| format!("linking {} to {}", dest.display(), target.display()))
}

/// Copies the blob entries of `source_root` into `blobs`.
///
/// Symlinked blobs stay symlinks and digests already present are left alone.
/// Returns the number of entries added.
pub fn consolidate(source_root: &Path, blobs: &Path) -> Result<usize> {
    let source_blobs = blobs_dir(source_root);
    fs::create_dir_all(blobs).with_context(|| format!("creating {}", blobs.display()))?;
    let mut names = fs::read_dir(&source_blobs)
        .with_context(|| format!("listing {}", source_blobs.display()))?
        .map(|entry| entry.map(|entry| entry.file_name()))
        .collect::<io::Result<Vec<_>>>()
        .with_context(|| format!("listing {}", source_blobs.display()))?;
    names.sort();

    let mut added = 0;
    for name in names {
        let from = source_blobs.join(&name);
        let to = blobs.join(&name);
        if fs::symlink_metadata(&to).is_ok() {
            continue;
        }
        copy_blob(&source_blobs, &from, &to)
            .with_context(|| format!("copying {} to {}", from.display(), to.display()))?;
        debug!(blob = %to.display(), "consolidated");
        added += 1;
    }
    Ok(added)
}

fn copy_blob(source_blobs: &Path, from: &Path, to: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(from)?;
    if metadata.file_type().is_symlink() {
        let target = fs::read_link(from)?;
        let target = if target.is_absolute() {
            target
        } else {
            source_blobs.join(target)
        };
        return symlink(target, to);
    }
    match fs::hard_link(from, to) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(_) => fs::copy(from, to).map(|_| ()),
    }
}
