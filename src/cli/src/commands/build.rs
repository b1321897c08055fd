//! `stratum build` command: build layers from a stratumfile.

use std::path::PathBuf;

use clap::Args;
use stratum_core::Stratumfile;
use stratum_runtime::{
    BuildCache, BuildDriver, BuildOutcome, CachedOutput, ChrootRuntime, ImageLayout,
    LayerCompression, LayerSpecs, MapOptions,
};

use crate::output;

use super::{blocking, Context};

#[derive(Args)]
pub struct BuildArgs {
    /// Stratumfile to build
    #[arg(short = 'f', long, default_value = "stratumfile.yaml")]
    pub file: PathBuf,

    /// Layers to build (default: all)
    pub layers: Vec<String>,

    /// Store layers as uncompressed tar
    #[arg(long)]
    pub no_compress: bool,

    /// Apply base image ownership when unpacking (requires root)
    #[arg(long)]
    pub preserve_owners: bool,
}

pub async fn execute(args: BuildArgs, ctx: Context) -> Result<(), Box<dyn std::error::Error>> {
    let results = blocking(move || {
        let stratumfile = Stratumfile::from_path(&args.file)?;
        let names: Vec<String> = if args.layers.is_empty() {
            stratumfile.layers.keys().cloned().collect()
        } else {
            args.layers.clone()
        };

        let layout = match ctx.open_layout() {
            Ok(layout) => layout,
            Err(e) if e.is_not_found() => {
                ImageLayout::create_with_cancellation(&ctx.config.oci_dir, ctx.cancel.clone())?
            }
            Err(e) => return Err(e),
        };
        let mut cache = BuildCache::open(
            &ctx.config,
            &layout,
            LayerSpecs::from_stratumfile(&stratumfile),
        )?;
        let runtime = ChrootRuntime::new();

        let compression = if args.no_compress {
            LayerCompression::None
        } else {
            LayerCompression::Gzip
        };
        let map_options = if args.preserve_owners {
            MapOptions::default()
        } else {
            MapOptions::rootless()
        };

        let results = BuildDriver::new(&ctx.config, &layout, &mut cache, &runtime)
            .with_compression(compression)
            .with_map_options(map_options)
            .build_all(&names);
        layout.close();
        results
    })
    .await?;

    let mut table = output::new_table(&["LAYER", "RESULT", "OUTPUT"]);
    for (name, outcome) in &results {
        let result = match outcome {
            BuildOutcome::Built(_) => "built",
            BuildOutcome::Cached(_) => "cached",
        };
        let output_col = match outcome.output() {
            CachedOutput::Blob(desc) => output::short_digest(&desc.digest.to_string()),
            CachedOutput::BuildOnly => "build-only".to_string(),
        };
        table.add_row(vec![name.clone(), result.to_string(), output_col]);
    }
    println!("{table}");
    Ok(())
}
