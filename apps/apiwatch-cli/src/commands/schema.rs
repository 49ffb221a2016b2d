use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

#[derive(Args)]
pub struct SchemaArgs {
    /// Write the schema to this file instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub fn run(args: SchemaArgs) -> Result<()> {
    match args.out {
        Some(path) => {
            let target = path.display().to_string();
            apiwatch_core::config::write_schema_file(&target)
                .with_context(|| format!("writing schema to {target}"))?;
            eprintln!("wrote {target}");
        }
        None => {
            let schema = apiwatch_core::config_schema_json();
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
    }
    Ok(())
}
