#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

mod config;
mod inputs;
mod layer;
pub mod oci;

pub use config::{parse_umask, LayerConfig, DEFAULT_UMASK};
pub use inputs::{additional_entry, build_layer, load_additional, load_entries, LayerRequest};
pub use layer::{Insertion, LayerBuilder, LayerSummary};
pub use layr_domain::{CanonicalPath, EntrySpec, LayerError, ModeSpec};
