//! Check-config command - show the resolved configuration.

use anyhow::Result;
use clap::Args;
use modhost_module::storage;

use super::Context;

/// Arguments for the check-config command.
#[derive(Args, Debug)]
pub struct CheckConfigArgs {}

/// Run the check-config command. Loading already validated the file, so
/// reaching this point means it is usable.
pub async fn run(_args: CheckConfigArgs, ctx: &Context) -> Result<()> {
    let config = &ctx.config;

    match &ctx.source {
        Some(path) => println!("config:     {}", path.display()),
        None => println!("config:     (defaults)"),
    }
    println!("storage:    {}", config.storage.display());
    println!("engine:     {}", config.engine.listen);
    println!("task queue: {}", config.engine.task_queue);
    println!("worker:     {}", config.engine.worker_name);
    println!("modules:    {}", config.modules.len());

    for descriptor in &config.modules {
        let location = storage::resolve(descriptor, &config.storage)?;
        let branch = descriptor.branch.as_deref().unwrap_or("(default)");
        println!(
            "  {} @ {} -> {}",
            descriptor.git_url,
            branch,
            location.module_dir().display()
        );
        if ctx.verbose && descriptor.git.as_ref().is_some_and(|g| g.is_set()) {
            println!("    (module-specific credentials)");
        }
    }
    println!("configuration OK");
    Ok(())
}
