use clap::{Parser, Subcommand};
use cli::RunConfig;
use color_eyre::eyre::{eyre, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{self, EnvFilter};

use blocks::store::fs::FsStore;
use blocks::{BlockSpec, Chain, ChainStatus, NoopKeepAlive};
use chain_kit_common::ImageRef;

#[derive(Parser)]
#[command(version, about = "Launch image-processing chains against a store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a chain described by a configuration file
    Run {
        /// Path to the TOML or JSON configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print the JSON schema for block specifications
    Schema,
    /// List the available block types
    ListBlocks,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { config } => run_chain(config)?,
        Commands::Schema => {
            println!("{}", serde_json::to_string_pretty(&BlockSpec::schema())?);
        }
        Commands::ListBlocks => {
            for name in BlockSpec::names() {
                println!("{name}");
            }
        }
    }

    Ok(())
}

fn run_chain(config_path: &Path) -> Result<()> {
    let config = RunConfig::from_file(config_path)?;
    info!("Store root: {}", config.store_root);

    let store = FsStore::open(&config.store_root)?;

    let origin = match (&config.origin, &config.import) {
        (Some(origin), _) => ImageRef::new(origin.clone()),
        (None, Some(path)) => {
            let reference = store.import(path)?;
            info!("Imported {} as {}", path, reference);
            reference
        }
        // Unreachable: RunConfig::validate rejects this shape.
        (None, None) => return Err(eyre!("configuration names no origin image")),
    };

    let mut builder = Chain::builder();
    for spec in config.blocks {
        info!("Adding block: {}", spec.description());
        builder = builder.add_block(spec.into_block()?);
    }
    let mut chain = builder.build()?;

    info!(
        "Launching chain of {} member(s) on {}",
        chain.len(),
        origin
    );
    let result = chain.launch(&store, &origin, &NoopKeepAlive);

    for warning in &result.warnings {
        warn!("{warning}");
    }
    println!("{}", serde_json::to_string_pretty(&result)?);

    match result.status {
        ChainStatus::Succeeded => {
            info!(
                "Chain finished; final image: {}",
                result
                    .final_ref
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "<origin>".into())
            );
            Ok(())
        }
        ChainStatus::Failed {
            position,
            identity,
            kind,
        } => Err(eyre!(
            "chain failed at member {position} ({identity}): {kind}"
        )),
    }
}
