//! `stratum tags` command.

use clap::Args;

use crate::output;

use super::{blocking, Context};

#[derive(Args)]
pub struct TagsArgs {
    /// Only show tag names (one per line)
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: TagsArgs, ctx: Context) -> Result<(), Box<dyn std::error::Error>> {
    let rows = blocking(move || {
        let layout = ctx.open_layout()?;
        let mut rows = Vec::new();
        for tag in layout.list_tags()? {
            let desc = layout.resolve(&tag)?;
            rows.push((tag, desc.digest.to_string(), desc.size));
        }
        layout.close();
        Ok(rows)
    })
    .await?;

    if args.quiet {
        for (tag, _, _) in &rows {
            println!("{tag}");
        }
        return Ok(());
    }

    let mut table = output::new_table(&["TAG", "DIGEST", "SIZE"]);
    for (tag, digest, size) in &rows {
        table.add_row(vec![
            tag.clone(),
            output::short_digest(digest),
            output::format_bytes((*size).max(0) as u64),
        ]);
    }
    println!("{table}");
    Ok(())
}
