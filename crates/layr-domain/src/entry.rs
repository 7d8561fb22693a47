//! Declarative layer entries.
//!
//! The entry document is a JSON object mapping raw paths to descriptors. Each
//! descriptor is first read into a loose [`EntryDescriptor`] and then
//! validated into the strict [`EntrySpec`] union, so that malformed input is
//! rejected before anything is written.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use crate::error::LayerError;
use crate::mode::ModeSpec;
use crate::path::CanonicalPath;

/// Raw descriptor exactly as it appears in the entry document.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntryDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub source: Option<PathBuf>,
    pub text: Option<String>,
    pub target: Option<String>,
    pub sources: Option<Vec<SourceDescriptor>>,
    pub uid: Option<u64>,
    pub gid: Option<u64>,
    pub mode: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceDescriptor {
    pub path: PathBuf,
    pub uid: Option<u64>,
    pub gid: Option<u64>,
    pub mode: Option<String>,
}

/// One validated filesystem node to place in the layer.
#[derive(Clone, Debug, PartialEq)]
pub enum EntrySpec {
    File(FileEntry),
    Link(LinkEntry),
    Directory(DirectoryEntry),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileContent {
    /// Copy bytes and base permissions from a host file.
    Source(PathBuf),
    /// Literal UTF-8 text, based on the default file mode.
    Text(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FileEntry {
    pub content: FileContent,
    pub mode: ModeSpec,
    pub uid: Option<u64>,
    pub gid: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkEntry {
    pub target: String,
    pub uid: Option<u64>,
    pub gid: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DirectoryEntry {
    pub mode: ModeSpec,
    pub uid: Option<u64>,
    pub gid: Option<u64>,
    /// Host trees merged below this directory; later sources take priority.
    pub sources: Vec<DirectorySource>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DirectorySource {
    pub path: PathBuf,
    pub uid: Option<u64>,
    pub gid: Option<u64>,
    pub mode: ModeSpec,
}

impl EntrySpec {
    #[must_use]
    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory(_))
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Link(_) => "link",
            Self::Directory(_) => "directory",
        }
    }
}

impl DirectorySource {
    pub fn from_descriptor(descriptor: SourceDescriptor, umask: u32) -> Result<Self, LayerError> {
        Ok(Self {
            mode: ModeSpec::parse(descriptor.mode.as_deref(), umask)?,
            path: descriptor.path,
            uid: descriptor.uid,
            gid: descriptor.gid,
        })
    }
}

impl EntryDescriptor {
    /// Validates the descriptor for `path`, parsing modes against `umask`.
    pub fn into_spec(self, path: &CanonicalPath, umask: u32) -> Result<EntrySpec, LayerError> {
        let invalid = |reason: &str| LayerError::InvalidEntry {
            path: path.to_string(),
            reason: reason.to_string(),
        };
        match self.kind.as_str() {
            "file" => {
                if self.target.is_some() || self.sources.is_some() {
                    return Err(invalid("files accept only 'source' or 'text'"));
                }
                let content = match (self.source, self.text) {
                    (Some(source), None) => FileContent::Source(source),
                    (None, Some(text)) => FileContent::Text(text),
                    (Some(_), Some(_)) => {
                        return Err(invalid("'source' and 'text' are mutually exclusive"))
                    }
                    (None, None) => return Err(invalid("files need a 'source' or 'text'")),
                };
                Ok(EntrySpec::File(FileEntry {
                    content,
                    mode: ModeSpec::parse(self.mode.as_deref(), umask)?,
                    uid: self.uid,
                    gid: self.gid,
                }))
            }
            "link" => {
                if self.source.is_some() || self.text.is_some() || self.sources.is_some() {
                    return Err(invalid("links accept only 'target'"));
                }
                if self.mode.is_some() {
                    return Err(invalid("links always have mode 0777"));
                }
                let target = self.target.ok_or_else(|| invalid("links need a 'target'"))?;
                Ok(EntrySpec::Link(LinkEntry {
                    target,
                    uid: self.uid,
                    gid: self.gid,
                }))
            }
            "directory" => {
                if self.source.is_some() || self.text.is_some() || self.target.is_some() {
                    return Err(invalid("directories accept only 'sources'"));
                }
                let sources = self
                    .sources
                    .unwrap_or_default()
                    .into_iter()
                    .map(|source| DirectorySource::from_descriptor(source, umask))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(EntrySpec::Directory(DirectoryEntry {
                    mode: ModeSpec::parse(self.mode.as_deref(), umask)?,
                    uid: self.uid,
                    gid: self.gid,
                    sources,
                }))
            }
            other => Err(LayerError::UnsupportedEntryType {
                path: path.to_string(),
                kind: other.to_string(),
            }),
        }
    }
}

/// Parses an entry document into `(path, spec)` pairs sorted by path.
///
/// Keys that normalize to the same path keep their document order, so the
/// first declaration is the one that lands in the layer.
pub fn parse_entry_document(
    document: &str,
    umask: u32,
) -> Result<Vec<(CanonicalPath, EntrySpec)>, LayerError> {
    let raw: IndexMap<String, Value> =
        serde_json::from_str(document).map_err(|err| LayerError::MalformedEntries {
            reason: err.to_string(),
        })?;
    let mut entries = Vec::with_capacity(raw.len());
    for (key, value) in raw {
        let path = CanonicalPath::normalize(&key)?;
        let descriptor: EntryDescriptor =
            serde_json::from_value(value).map_err(|err| LayerError::InvalidEntry {
                path: path.to_string(),
                reason: err.to_string(),
            })?;
        let spec = descriptor.into_spec(&path, umask)?;
        entries.push((path, spec));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const UMASK: u32 = 0o022;

    #[test]
    fn document_is_sorted_and_validated() {
        let document = r#"{
            "/usr/bin/tool": {"type": "file", "source": "/tmp/tool", "mode": "0755"},
            "/etc/motd": {"type": "file", "text": "hello\n", "uid": 1000, "gid": 100},
            "/bin": {"type": "link", "target": "usr/bin"},
            "/srv": {"type": "directory", "sources": [{"path": "/tmp/a"}, {"path": "/tmp/b", "mode": "u+w"}]}
        }"#;
        let entries = parse_entry_document(document, UMASK).unwrap();
        let paths: Vec<_> = entries.iter().map(|(path, _)| path.as_str()).collect();
        assert_eq!(paths, vec!["./bin", "./etc/motd", "./srv", "./usr/bin/tool"]);

        let (_, motd) = &entries[1];
        assert_eq!(
            motd,
            &EntrySpec::File(FileEntry {
                content: FileContent::Text("hello\n".into()),
                mode: ModeSpec::Absolute(None),
                uid: Some(1000),
                gid: Some(100),
            })
        );

        let EntrySpec::Directory(srv) = &entries[2].1 else {
            panic!("expected directory");
        };
        assert_eq!(srv.sources.len(), 2);
        assert_eq!(srv.sources[1].path, PathBuf::from("/tmp/b"));
        assert!(matches!(srv.sources[1].mode, ModeSpec::Symbolic(_)));
    }

    #[test]
    fn colliding_keys_keep_document_order() {
        let document = r#"{
            "/etc/hosts": {"type": "file", "text": "first"},
            "etc/hosts": {"type": "file", "text": "second"}
        }"#;
        let entries = parse_entry_document(document, UMASK).unwrap();
        assert_eq!(entries.len(), 2);
        let EntrySpec::File(first) = &entries[0].1 else {
            panic!("expected file");
        };
        assert_eq!(first.content, FileContent::Text("first".into()));
    }

    #[test]
    fn unknown_types_are_rejected() {
        let document = r#"{"/dev/null": {"type": "device"}}"#;
        let err = parse_entry_document(document, UMASK).unwrap_err();
        assert!(matches!(
            err,
            LayerError::UnsupportedEntryType { ref kind, .. } if kind == "device"
        ));
    }

    #[test]
    fn files_need_exactly_one_content_source() {
        for document in [
            r#"{"/a": {"type": "file"}}"#,
            r#"{"/a": {"type": "file", "source": "/x", "text": "y"}}"#,
        ] {
            let err = parse_entry_document(document, UMASK).unwrap_err();
            assert!(matches!(err, LayerError::InvalidEntry { .. }), "{err:?}");
        }
    }

    #[test]
    fn links_do_not_take_a_mode() {
        let document = r#"{"/a": {"type": "link", "target": "b", "mode": "0644"}}"#;
        let err = parse_entry_document(document, UMASK).unwrap_err();
        assert!(matches!(err, LayerError::InvalidEntry { .. }));
    }

    #[test]
    fn unknown_fields_and_bad_owners_are_rejected() {
        for document in [
            r#"{"/a": {"type": "file", "text": "x", "owner": "root"}}"#,
            r#"{"/a": {"type": "file", "text": "x", "uid": "0"}}"#,
        ] {
            let err = parse_entry_document(document, UMASK).unwrap_err();
            assert!(matches!(err, LayerError::InvalidEntry { .. }), "{err:?}");
        }
    }

    #[test]
    fn bad_modes_surface_from_parsing() {
        let document = r#"{"/a": {"type": "directory", "mode": "755"}}"#;
        let err = parse_entry_document(document, UMASK).unwrap_err();
        assert!(matches!(err, LayerError::InvalidNumericMode { .. }));
    }

    #[test]
    fn non_object_documents_are_malformed() {
        let err = parse_entry_document("[1, 2]", UMASK).unwrap_err();
        assert!(matches!(err, LayerError::MalformedEntries { .. }));
    }
}
