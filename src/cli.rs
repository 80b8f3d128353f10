use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "edgekit")]
#[command(version)]
#[command(about = "Run bring-up specs across the nodes of an edge cluster", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a spec file against the nodes in the parameter file
    Run(RunArgs),

    /// Show the nodes and roles declared in the parameter file
    Nodes {
        /// Global parameter file (YAML)
        #[arg(short, long)]
        params: PathBuf,
    },

    /// Manage the trusted spec manifest
    #[command(subcommand)]
    Trust(TrustCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args)]
pub struct RunArgs {
    /// Spec file to run
    pub spec: PathBuf,

    /// Global parameter file (YAML)
    #[arg(short, long)]
    pub params: PathBuf,

    /// Ad-hoc template data: inline JSON or @file
    #[arg(long)]
    pub value: Option<String>,

    /// Validate and render every command without touching any node
    #[arg(long)]
    pub dry_run: bool,

    /// Refuse specs that have no entry in the trust manifest
    #[arg(long)]
    pub strict: bool,
}

#[derive(Subcommand)]
pub enum TrustCommand {
    /// Record the current hash of a spec file
    Add {
        /// Spec file
        spec: PathBuf,
    },

    /// Remove a spec from the manifest
    Rm {
        /// Spec file
        spec: PathBuf,
    },

    /// List trusted specs
    List,

    /// Check a spec file against its recorded hash
    Verify {
        /// Spec file
        spec: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from([
            "edgekit", "-vv", "run", "deploy.yaml", "-p", "params.yaml", "--dry-run",
        ]);
        assert_eq!(cli.verbose, 2);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.spec, PathBuf::from("deploy.yaml"));
        assert!(args.dry_run);
        assert!(!args.strict);
        assert!(args.value.is_none());
    }

    #[test]
    fn test_run_requires_params() {
        assert!(Cli::try_parse_from(["edgekit", "run", "deploy.yaml"]).is_err());
    }
}
