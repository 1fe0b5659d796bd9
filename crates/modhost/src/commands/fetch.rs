//! Fetch command - download modules and check their metadata.

use anyhow::{Result, bail};
use clap::Args;
use modhost_module::ModulePipeline;

use super::Context;

/// Arguments for the fetch command.
#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Delete and re-fetch modules that are already present
    #[arg(long)]
    pub force: bool,
}

/// Run the fetch command.
pub async fn run(args: FetchArgs, ctx: &Context) -> Result<()> {
    let config = &ctx.config;
    let pipeline =
        ModulePipeline::from_config(config).with_force_refresh(config.always_download || args.force);
    let report = pipeline.prepare().await;

    for module in &report.prepared {
        println!(
            "ok      {} {} ({}) - {}",
            module.metadata.name,
            module.metadata.version,
            module.fetch,
            module.descriptor.git_url
        );
        if ctx.verbose {
            println!("        path: {}", module.location.module_dir().display());
        }
    }
    for skipped in &report.skipped {
        println!(
            "failed  {} [{}] {}",
            skipped.source,
            skipped.error.stage(),
            skipped.error
        );
    }
    println!(
        "{} module(s) ready, {} failed",
        report.prepared.len(),
        report.skipped.len()
    );

    if !report.skipped.is_empty() {
        bail!("{} module(s) could not be fetched", report.skipped.len());
    }
    Ok(())
}
