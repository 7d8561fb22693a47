use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use layr_core::oci::{build_index, build_manifest, hash_layer, ManifestRequest};
use layr_core::{build_layer, LayerConfig, LayerRequest};
use serde::Serialize;

mod cli;

use cli::{CommandCli, HashArgs, IndexArgs, LayerArgs, LayrCli, ManifestArgs};

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = LayrCli::parse();
    init_tracing(cli.trace, cli.verbose, cli.quiet);

    match cli.command {
        CommandCli::Layer(args) => run_layer(args),
        CommandCli::Hash(args) => run_hash(&args),
        CommandCli::Manifest(args) => run_manifest(args),
        CommandCli::Index(args) => run_index(&args),
    }
}

fn init_tracing(trace: bool, verbose: u8, quiet: bool) {
    let level = if trace {
        "trace"
    } else if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("layr_cli={level},layr_core={level},layr_domain={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn run_layer(args: LayerArgs) -> Result<()> {
    let config = LayerConfig::new(args.out)
        .with_mtime(args.mtime)
        .with_umask(&args.umask)?;
    let request = LayerRequest {
        entries: args.entries,
        includes: args.includes,
        excludes: args.excludes,
        config,
    };
    let summary = build_layer(&request).map_err(|err| eyre!("{err:?}"))?;
    emit(&summary)
}

fn run_hash(args: &HashArgs) -> Result<()> {
    let descriptor = hash_layer(&args.dir, args.format).map_err(|err| eyre!("{err:?}"))?;
    emit(&descriptor)
}

fn run_manifest(args: ManifestArgs) -> Result<()> {
    let request = ManifestRequest {
        layers: args.layers,
        config: args.config,
        architecture: args.architecture,
        os: args.os,
        tag: args.tag,
        created: args.created,
        out: args.out,
    };
    let descriptor = build_manifest(&request).map_err(|err| eyre!("{err:?}"))?;
    emit(&descriptor)
}

fn run_index(args: &IndexArgs) -> Result<()> {
    let descriptor = build_index(&args.images, &args.out).map_err(|err| eyre!("{err:?}"))?;
    emit(&descriptor)
}

fn emit<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
