//! `stratum untag` command.

use clap::Args;

use super::{blocking, Context};

#[derive(Args)]
pub struct UntagArgs {
    /// Tags to remove
    #[arg(required = true)]
    pub tags: Vec<String>,
}

pub async fn execute(args: UntagArgs, ctx: Context) -> Result<(), Box<dyn std::error::Error>> {
    let results = blocking(move || {
        let layout = ctx.open_layout()?;
        let mut results = Vec::new();
        for tag in args.tags {
            let existed = layout.untag(&tag)?;
            results.push((tag, existed));
        }
        layout.close();
        Ok(results)
    })
    .await?;

    let mut missing = Vec::new();
    for (tag, existed) in results {
        if existed {
            println!("Untagged: {tag}");
        } else {
            missing.push(tag);
        }
    }
    if !missing.is_empty() {
        return Err(format!("No such tag: {}", missing.join(", ")).into());
    }
    Ok(())
}
