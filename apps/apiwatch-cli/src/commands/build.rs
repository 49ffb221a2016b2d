use anyhow::Result;
use apiwatch_core::RequestBuilder;
use clap::Args;

use super::TargetArgs;

#[derive(Args)]
pub struct BuildArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Pretty-print JSON
    #[arg(long)]
    pub pretty: bool,
}

/// Print the request batch for an operation without sending anything.
pub fn run(args: BuildArgs) -> Result<()> {
    let config = args.target.config()?;
    let builder = RequestBuilder::new(args.target.document()?, config.token.clone());
    let requests = builder.requests(args.target.method, &args.target.path, &args.target.bundle())?;
    let out = if args.pretty {
        serde_json::to_string_pretty(&requests)?
    } else {
        serde_json::to_string(&requests)?
    };
    println!("{out}");
    Ok(())
}
