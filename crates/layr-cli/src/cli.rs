use std::path::PathBuf;

use clap::{value_parser, ArgAction, Args, Parser, Subcommand};
use layr_core::oci::LayerFormat;
use layr_core::DEFAULT_UMASK;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Deterministic OCI layer, manifest and index assembly",
    disable_help_subcommand = true
)]
pub struct LayrCli {
    #[arg(
        short,
        long,
        help = "Only log warnings and errors (results still print to stdout)",
        global = true
    )]
    pub quiet: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)", global = true)]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[command(subcommand)]
    pub command: CommandCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandCli {
    #[command(
        about = "Build one deterministic layer archive from entries and include lists.",
        override_usage = "layr layer --out FILE [--entries FILE] [--includes FILE] [--excludes FILE]"
    )]
    Layer(LayerArgs),
    #[command(about = "Digest a layer archive and write its metadata.json and blob link.")]
    Hash(HashArgs),
    #[command(
        about = "Aggregate hashed layers and a container config into an image manifest.",
        override_usage = "layr manifest <LAYER_DIR>... --config FILE --architecture ARCH --os OS --out DIR"
    )]
    Manifest(ManifestArgs),
    #[command(about = "Aggregate per-platform images into an image index.")]
    Index(IndexArgs),
}

#[derive(Args, Debug)]
pub struct LayerArgs {
    #[arg(long, value_parser = value_parser!(PathBuf), help = "Archive to write")]
    pub out: PathBuf,
    #[arg(long, help = "JSON object mapping layer paths to entry descriptors")]
    pub entries: Option<PathBuf>,
    #[arg(long, help = "Newline-separated host paths to add as they are")]
    pub includes: Option<PathBuf>,
    #[arg(long, help = "Newline-separated host paths removed from --includes")]
    pub excludes: Option<PathBuf>,
    #[arg(
        long,
        env = "SOURCE_DATE_EPOCH",
        default_value_t = 0,
        help = "Modification time stamped on every entry (epoch seconds)"
    )]
    pub mtime: u64,
    #[arg(
        long,
        default_value = DEFAULT_UMASK,
        help = "Umask bounding default and unscoped symbolic modes"
    )]
    pub umask: String,
}

#[derive(Args, Debug)]
pub struct HashArgs {
    #[arg(value_name = "DIR", help = "Layer directory holding the archive")]
    pub dir: PathBuf,
    #[arg(long, default_value_t = LayerFormat::Tar, help = "Archive format: tar, gzip or zstd")]
    pub format: LayerFormat,
}

#[derive(Args, Debug)]
pub struct ManifestArgs {
    #[arg(value_name = "LAYER_DIR", required = true, help = "Hashed layer directories, bottom first")]
    pub layers: Vec<PathBuf>,
    #[arg(long, help = "Container config JSON embedded in the image config")]
    pub config: PathBuf,
    #[arg(long)]
    pub architecture: String,
    #[arg(long)]
    pub os: String,
    #[arg(long, help = "Output directory")]
    pub out: PathBuf,
    #[arg(long, help = "Reference name annotation; empty means none")]
    pub tag: Option<String>,
    #[arg(
        long,
        env = "SOURCE_DATE_EPOCH",
        default_value_t = 0,
        help = "Image creation time (epoch seconds)"
    )]
    pub created: u64,
}

#[derive(Args, Debug)]
pub struct IndexArgs {
    #[arg(value_name = "IMAGE_DIR", required = true, help = "Image directories built by `layr manifest`")]
    pub images: Vec<PathBuf>,
    #[arg(long, help = "Output directory")]
    pub out: PathBuf,
}
