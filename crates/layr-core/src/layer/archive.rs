//! Deterministic tar writing.
//!
//! Entry names are stored exactly as their canonical form (`./a/b`), which
//! `Header::set_path` would rewrite, so the name fields are filled directly
//! and overlong values go through GNU `././@LongLink` records.

use std::borrow::Cow;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use layr_domain::{CanonicalPath, LayerError};
use sha2::{Digest, Sha256};
use tar::{Builder, Entry, EntryType, Header};

const NAME_FIELD_LEN: usize = 100;
const LONG_LINK_NAME: &[u8] = b"././@LongLink";

/// Mode and ownership stored with an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct EntryMeta {
    pub(crate) mode: u32,
    pub(crate) uid: u64,
    pub(crate) gid: u64,
}

pub(crate) struct ArchiveWriter<W: Write> {
    builder: Builder<W>,
    mtime: u64,
    output: PathBuf,
}

impl<W: Write> ArchiveWriter<W> {
    pub(crate) fn new(inner: W, mtime: u64, output: &Path) -> Self {
        Self {
            builder: Builder::new(inner),
            mtime,
            output: output.to_path_buf(),
        }
    }

    pub(crate) fn append_directory(
        &mut self,
        name: &CanonicalPath,
        meta: EntryMeta,
    ) -> Result<(), LayerError> {
        let header = self.header(EntryType::Directory, meta, 0);
        self.append(header, name.as_str().as_bytes(), None, io::empty())
    }

    pub(crate) fn append_file<R: Read>(
        &mut self,
        name: &CanonicalPath,
        meta: EntryMeta,
        size: u64,
        data: R,
    ) -> Result<(), LayerError> {
        let header = self.header(EntryType::Regular, meta, size);
        let mut data = CountingReader::new(data.take(size));
        self.append(header, name.as_str().as_bytes(), None, &mut data)?;
        if data.read == size {
            return Ok(());
        }
        let err = io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("{name} ended after {} of {size} bytes", data.read),
        );
        Err(LayerError::archive(&self.output, err))
    }

    /// Re-appends an entry read from another archive, keeping its name and
    /// metadata as stored.
    pub(crate) fn copy_entry<R: Read>(
        &mut self,
        entry: &mut Entry<'_, R>,
    ) -> Result<(), LayerError> {
        let header = copy_header(entry.header(), entry.size())
            .map_err(|err| LayerError::archive(&self.output, err))?;
        let name = entry.path_bytes().into_owned();
        let link = entry.link_name_bytes().map(Cow::into_owned);
        self.append(header, &name, link.as_deref(), entry)
    }

    pub(crate) fn append_symlink(
        &mut self,
        name: &CanonicalPath,
        meta: EntryMeta,
        target: &[u8],
    ) -> Result<(), LayerError> {
        let header = self.header(EntryType::Symlink, meta, 0);
        self.append(header, name.as_str().as_bytes(), Some(target), io::empty())
    }

    /// Writes the end-of-archive marker and hands back the sink.
    pub(crate) fn finish(self) -> Result<W, LayerError> {
        let output = self.output;
        self.builder
            .into_inner()
            .map_err(|err| LayerError::archive(output, err))
    }

    fn header(&self, kind: EntryType, meta: EntryMeta, size: u64) -> Header {
        let mut header = Header::new_gnu();
        header.set_entry_type(kind);
        header.set_mode(meta.mode & 0o7777);
        header.set_uid(meta.uid);
        header.set_gid(meta.gid);
        header.set_mtime(self.mtime);
        header.set_size(size);
        header
    }

    fn append<R: Read>(
        &mut self,
        mut header: Header,
        name: &[u8],
        link: Option<&[u8]>,
        data: R,
    ) -> Result<(), LayerError> {
        let result = (|| {
            if name.len() > NAME_FIELD_LEN {
                self.append_long_record(EntryType::GNULongName, name)?;
            }
            fill_field(&mut header.as_old_mut().name, name);
            if let Some(link) = link {
                if link.len() > NAME_FIELD_LEN {
                    self.append_long_record(EntryType::GNULongLink, link)?;
                }
                fill_field(&mut header.as_old_mut().linkname, link);
            }
            header.set_cksum();
            self.builder.append(&header, data)
        })();
        result.map_err(|err| LayerError::archive(&self.output, err))
    }

    fn append_long_record(&mut self, kind: EntryType, value: &[u8]) -> io::Result<()> {
        let mut header = Header::new_gnu();
        fill_field(&mut header.as_old_mut().name, LONG_LINK_NAME);
        header.set_entry_type(kind);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        let mut data = Vec::with_capacity(value.len() + 1);
        data.extend_from_slice(value);
        data.push(0);
        header.set_size(data.len() as u64);
        header.set_cksum();
        self.builder.append(&header, data.as_slice())
    }
}

fn copy_header(source: &Header, size: u64) -> io::Result<Header> {
    let kind = source.entry_type();
    let mut header = Header::new_gnu();
    header.set_entry_type(kind);
    header.set_mode(source.mode()?);
    header.set_uid(source.uid()?);
    header.set_gid(source.gid()?);
    header.set_mtime(source.mtime()?);
    header.set_size(size);
    if matches!(kind, EntryType::Char | EntryType::Block) {
        if let (Some(major), Some(minor)) = (source.device_major()?, source.device_minor()?) {
            header.set_device_major(major)?;
            header.set_device_minor(minor)?;
        }
    }
    Ok(header)
}

fn fill_field(field: &mut [u8; NAME_FIELD_LEN], value: &[u8]) {
    field.fill(0);
    let len = value.len().min(NAME_FIELD_LEN);
    field[..len].copy_from_slice(&value[..len]);
}

struct CountingReader<R> {
    inner: R,
    read: u64,
}

impl<R> CountingReader<R> {
    fn new(inner: R) -> Self {
        Self { inner, read: 0 }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.read += read as u64;
        Ok(read)
    }
}

/// Counts and hashes everything written through it.
pub(crate) struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    bytes_written: u64,
}

impl<W> HashingWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes_written: 0,
        }
    }

    /// Returns the sink, the hex sha256 and the byte count.
    pub(crate) fn into_parts(self) -> (W, String, u64) {
        let digest = hex::encode(self.hasher.finalize());
        (self.inner, digest, self.bytes_written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.bytes_written = self
            .bytes_written
            .saturating_add(written.try_into().unwrap_or(u64::MAX));
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
