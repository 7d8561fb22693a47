//! Archives already present at the output path.
//!
//! A build appends to such an archive: its members are recorded up front so
//! that new entries at the same paths are skipped, and they are copied ahead
//! of the staged entries when the layer is written.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;

use layr_domain::{CanonicalPath, LayerError};
use tar::{Archive, EntryType};
use tracing::debug;

use super::archive::ArchiveWriter;

/// Members of the archive at `output`, keyed by canonical path.
///
/// A missing file yields no members; anything that is not a tar archive is
/// fatal.
pub(crate) fn recorded_members(
    output: &Path,
) -> Result<HashMap<CanonicalPath, EntryType>, LayerError> {
    let Some(mut archive) = open(output)? else {
        return Ok(HashMap::new());
    };
    let mut members = HashMap::new();
    let entries = archive
        .entries()
        .map_err(|err| not_an_archive(output, err))?;
    for entry in entries {
        let entry = entry.map_err(|err| not_an_archive(output, err))?;
        let kind = entry.header().entry_type();
        if is_extension(kind) {
            continue;
        }
        let raw = entry.path_bytes();
        let name = std::str::from_utf8(&raw).map_err(|_| LayerError::InvalidPath {
            path: String::from_utf8_lossy(&raw).into_owned(),
        })?;
        members.insert(CanonicalPath::normalize(name)?, kind);
    }
    debug!(
        path = %output.display(),
        entries = members.len(),
        "appending to existing layer"
    );
    Ok(members)
}

/// Copies every member of the archive at `output` into `archive`.
pub(crate) fn copy_members<W: Write>(
    output: &Path,
    archive: &mut ArchiveWriter<W>,
) -> Result<usize, LayerError> {
    let Some(mut existing) = open(output)? else {
        return Ok(0);
    };
    let mut copied = 0;
    let entries = existing
        .entries()
        .map_err(|err| not_an_archive(output, err))?;
    for entry in entries {
        let mut entry = entry.map_err(|err| not_an_archive(output, err))?;
        if is_extension(entry.header().entry_type()) {
            continue;
        }
        archive.copy_entry(&mut entry)?;
        copied += 1;
    }
    Ok(copied)
}

fn open(output: &Path) -> Result<Option<Archive<BufReader<File>>>, LayerError> {
    let file = match File::open(output) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(LayerError::archive(output, err)),
    };
    let metadata = file
        .metadata()
        .map_err(|err| LayerError::archive(output, err))?;
    if metadata.len() == 0 {
        let err = io::Error::new(io::ErrorKind::InvalidData, "empty file");
        return Err(not_an_archive(output, err));
    }
    Ok(Some(Archive::new(BufReader::new(file))))
}

fn is_extension(kind: EntryType) -> bool {
    matches!(
        kind,
        EntryType::XHeader
            | EntryType::XGlobalHeader
            | EntryType::GNULongName
            | EntryType::GNULongLink
    )
}

fn not_an_archive(output: &Path, source: io::Error) -> LayerError {
    LayerError::NotAnArchive {
        path: output.to_path_buf(),
        source,
    }
}
