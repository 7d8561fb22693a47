#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod entry;
pub mod error;
pub mod mode;
pub mod path;

pub use entry::{
    parse_entry_document, DirectoryEntry, DirectorySource, EntryDescriptor, EntrySpec,
    FileContent, FileEntry, LinkEntry, SourceDescriptor,
};
pub use error::LayerError;
pub use mode::{ModeSpec, SymbolicMode};
pub use path::CanonicalPath;
