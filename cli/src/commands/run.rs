use anyhow::Context;
use muzzle::{Command, Environment, Sandbox, Supervisor, resolve};

use crate::config::MergedConfig;
use crate::error::CliResult;

pub async fn execute(positional: Vec<String>, config: MergedConfig) -> CliResult<()> {
    let command = Command::for_agent(&config.agent, positional);
    let cwd = std::env::current_dir().context("failed to determine working directory")?;
    let env = Environment::inherit().ensure_shell();

    let outcome = if config.sandboxed {
        let policy = resolve(&config.allow_domains, config.restrict_fs, &cwd);
        tracing::info!(
            domains = ?policy.allowed_domains(),
            restrict_fs = policy.restrict_filesystem(),
            working_dir = %cwd.display(),
            "running {command} under sandbox policy"
        );

        let sandbox = Sandbox::configure(policy);
        Supervisor::new(env).sandbox(&sandbox).run(&command).await
    } else {
        tracing::warn!("running {command} without a sandbox");
        Supervisor::new(env).passthrough().run(&command).await
    };

    tracing::debug!(outcome = %outcome, "finished");
    std::process::exit(outcome.code());
}
