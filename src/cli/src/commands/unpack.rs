//! `stratum unpack` command.

use std::path::PathBuf;

use clap::Args;
use stratum_runtime::MapOptions;

use super::{blocking, Context};

#[derive(Args)]
pub struct UnpackArgs {
    /// Tag to extract
    pub tag: String,

    /// Destination directory
    pub dest: PathBuf,

    /// Keep extracted files owned by the current user
    #[arg(long)]
    pub rootless: bool,
}

pub async fn execute(args: UnpackArgs, ctx: Context) -> Result<(), Box<dyn std::error::Error>> {
    let options = if args.rootless {
        MapOptions::rootless()
    } else {
        MapOptions::default()
    };
    let dest = args.dest.clone();

    blocking(move || {
        let layout = ctx.open_layout()?;
        let result = layout.unpack(&args.tag, &args.dest, &options);
        layout.close();
        result
    })
    .await?;

    println!("Unpacked to {}", dest.display());
    Ok(())
}
