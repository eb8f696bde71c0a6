// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "skala")]
#[command(about = "Atomic release deployment for git-based applications")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new skala.yml configuration file
    Init {
        /// Application name
        #[arg(short, long)]
        app: Option<String>,

        /// Git repository URL
        #[arg(short, long)]
        repository: Option<String>,

        /// Overwrite an existing configuration file
        #[arg(short, long)]
        force: bool,
    },

    /// Deploy the application to its configured host
    Deploy {
        /// Deploy a specific commit instead of the branch head
        #[arg(short, long)]
        commit: Option<String>,
    },

    /// Roll back to a previously deployed release
    Rollback {
        /// Roll back to a specific deployment id instead of the previous one
        #[arg(short, long)]
        to: Option<String>,
    },

    /// List deployments and their releases
    Releases,

    /// Print the persisted log of a deployment
    Log {
        /// Deployment id
        deployment: String,
    },
}
