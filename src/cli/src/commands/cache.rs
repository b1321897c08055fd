//! `stratum cache` commands.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use stratum_core::Stratumfile;
use stratum_runtime::{BuildCache, LayerSpecs};

use crate::output;

use super::{blocking, Context};

#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Subcommand)]
pub enum CacheCommand {
    /// List persisted cache entries
    List,
    /// Report which layers of a stratumfile would be served from the cache
    Check {
        /// Stratumfile to check against
        #[arg(short = 'f', long, default_value = "stratumfile.yaml")]
        file: PathBuf,

        /// Layers to check (default: all)
        layers: Vec<String>,
    },
}

pub async fn execute(args: CacheArgs, ctx: Context) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        CacheCommand::List => list(ctx).await,
        CacheCommand::Check { file, layers } => check(ctx, file, layers).await,
    }
}

async fn list(ctx: Context) -> Result<(), Box<dyn std::error::Error>> {
    let entries = blocking(move || {
        let layout = ctx.open_layout()?;
        let cache = BuildCache::open(&ctx.config, &layout, LayerSpecs::default())?;
        let entries = cache.entries().clone();
        layout.close();
        Ok(entries)
    })
    .await?;

    let mut table = output::new_table(&["LAYER", "SPEC HASH", "OUTPUT", "CACHED"]);
    for (name, entry) in &entries {
        let output_col = match &entry.descriptor {
            Some(desc) => output::short_digest(&desc.digest.to_string()),
            None => "build-only".to_string(),
        };
        table.add_row(vec![
            name.clone(),
            output::short_digest(&entry.spec_hash),
            output_col,
            output::format_ago(entry.cached_at),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn check(
    ctx: Context,
    file: PathBuf,
    layers: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let results = blocking(move || {
        let stratumfile = Stratumfile::from_path(&file)?;
        let names: Vec<String> = if layers.is_empty() {
            stratumfile.layers.keys().cloned().collect()
        } else {
            layers
        };

        let layout = ctx.open_layout()?;
        let cache = BuildCache::open(
            &ctx.config,
            &layout,
            LayerSpecs::from_stratumfile(&stratumfile),
        )?;
        let mut results = Vec::with_capacity(names.len());
        for name in names {
            let hit = cache.lookup(&name)?.is_some();
            results.push((name, hit));
        }
        layout.close();
        Ok(results)
    })
    .await?;

    let mut table = output::new_table(&["LAYER", "STATUS"]);
    for (name, hit) in results {
        table.add_row(vec![name, if hit { "cached" } else { "stale" }.to_string()]);
    }
    println!("{table}");
    Ok(())
}
