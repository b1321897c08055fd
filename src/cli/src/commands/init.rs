//! `stratum init` command.

use clap::Args;
use stratum_runtime::ImageLayout;

use super::{blocking, Context};

#[derive(Args)]
pub struct InitArgs {}

pub async fn execute(_args: InitArgs, ctx: Context) -> Result<(), Box<dyn std::error::Error>> {
    let path = ctx.config.oci_dir.clone();
    let cancel = ctx.cancel.clone();
    let created = path.clone();

    blocking(move || {
        let layout = ImageLayout::create_with_cancellation(&path, cancel)?;
        layout.close();
        Ok(())
    })
    .await?;

    println!("Initialized image layout in {}", created.display());
    Ok(())
}
