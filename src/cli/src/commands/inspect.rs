//! `stratum inspect` command: display an image's manifest and configuration as JSON.

use clap::Args;

use super::{blocking, Context};

#[derive(Args)]
pub struct InspectArgs {
    /// Tag to inspect
    pub tag: String,
}

pub async fn execute(args: InspectArgs, ctx: Context) -> Result<(), Box<dyn std::error::Error>> {
    let output = blocking(move || {
        let layout = ctx.open_layout()?;
        let desc = layout.resolve(&args.tag)?;
        let manifest = layout.lookup_manifest(&args.tag)?;
        let config = layout.config_for_tag(&args.tag)?;
        layout.close();

        Ok(serde_json::json!({
            "Tag": args.tag,
            "Digest": desc.digest.to_string(),
            "Size": desc.size,
            "MediaType": desc.media_type,
            "Layers": serde_json::to_value(&manifest.layers)?,
            "Config": serde_json::to_value(&config)?,
        }))
    })
    .await?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
