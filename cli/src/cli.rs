use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "muzzle")]
#[command(version)]
#[command(about = "Run a CLI agent under a policy-enforcing native sandbox")]
pub struct Cli {
    /// Domain the agent may reach (repeatable, supports wildcards like *.example.com)
    #[arg(long = "allow-domain", value_name = "DOMAIN")]
    pub allow_domains: Vec<String>,

    /// Limit filesystem visibility to the working directory and system paths
    #[arg(long)]
    pub restrict_fs: bool,

    /// Path to config file (TOML)
    #[arg(short, long, env = "MUZZLE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Supervise the command without any sandbox
    #[arg(long)]
    pub no_sandbox: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to run; the agent name is prepended unless already first
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_command_keeps_hyphens() {
        let cli = Cli::try_parse_from([
            "muzzle",
            "--allow-domain",
            "api.github.com",
            "--restrict-fs",
            "explain",
            "--model",
            "pro",
        ])
        .unwrap();

        assert_eq!(cli.allow_domains, vec!["api.github.com"]);
        assert!(cli.restrict_fs);
        assert_eq!(cli.command, vec!["explain", "--model", "pro"]);
    }

    #[test]
    fn test_no_arguments() {
        let cli = Cli::try_parse_from(["muzzle"]).unwrap();
        assert!(cli.command.is_empty());
        assert!(!cli.no_sandbox);
    }
}
