//! `stratum tag` command: create a tag that refers to an existing image.

use clap::Args;

use super::{blocking, Context};

#[derive(Args)]
pub struct TagArgs {
    /// Existing tag
    pub source: String,

    /// New tag
    pub target: String,
}

pub async fn execute(args: TagArgs, ctx: Context) -> Result<(), Box<dyn std::error::Error>> {
    let target = args.target.clone();
    blocking(move || {
        let layout = ctx.open_layout()?;
        layout.tag(&args.source, &args.target)?;
        layout.close();
        Ok(())
    })
    .await?;

    println!("{target}");
    Ok(())
}
