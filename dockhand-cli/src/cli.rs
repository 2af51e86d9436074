use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dockhand")]
#[command(about = "Lifecycle and status of Docker Compose projects", long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Read configuration from this file instead of the user config directory
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Which project a command acts on.
#[derive(Args, Debug, Clone)]
pub struct Target {
    /// Project name, as known to the container runtime
    #[arg(short = 'p', long = "project")]
    pub project: Option<String>,

    /// Project directory, used when no project name is given
    #[arg(short = 'C', long = "dir", default_value = ".")]
    pub dir: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Find compose projects on disk
    Scan {
        /// Directories to search (default: configured roots, or the current directory)
        roots: Vec<PathBuf>,
        /// Maximum directory depth
        #[arg(long)]
        depth: Option<usize>,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// List projects known to the container runtime
    Projects {
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the services of a project
    Ps {
        #[command(flatten)]
        target: Target,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Create and start containers
    Up {
        #[command(flatten)]
        target: Target,
        services: Vec<String>,
        /// Run containers in the background
        #[arg(short, long)]
        detach: bool,
        /// Build images before starting containers
        #[arg(long)]
        build: bool,
        /// Recreate containers even if their configuration is unchanged
        #[arg(long)]
        force_recreate: bool,
        /// Remove containers for services not defined in the compose file
        #[arg(long)]
        remove_orphans: bool,
        /// Print output while the operation runs
        #[arg(long)]
        stream: bool,
    },
    /// Stop and remove containers and networks
    Down {
        #[command(flatten)]
        target: Target,
        /// Remove named and anonymous volumes
        #[arg(long)]
        volumes: bool,
        /// Remove containers for services not defined in the compose file
        #[arg(long)]
        remove_orphans: bool,
        /// Remove images used by services
        #[arg(long, value_enum)]
        rmi: Option<Rmi>,
    },
    /// Start existing containers
    Start {
        #[command(flatten)]
        target: Target,
        services: Vec<String>,
    },
    /// Stop running containers
    Stop {
        #[command(flatten)]
        target: Target,
        services: Vec<String>,
        /// Shutdown timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Restart containers
    Restart {
        #[command(flatten)]
        target: Target,
        services: Vec<String>,
        /// Shutdown timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Pause running containers
    Pause {
        #[command(flatten)]
        target: Target,
        services: Vec<String>,
    },
    /// Unpause paused containers
    Unpause {
        #[command(flatten)]
        target: Target,
        services: Vec<String>,
    },
    /// Build service images
    Build {
        #[command(flatten)]
        target: Target,
        services: Vec<String>,
        /// Do not use the layer cache
        #[arg(long)]
        no_cache: bool,
        /// Always pull newer base images
        #[arg(long)]
        pull: bool,
        /// Print output while the operation runs
        #[arg(long)]
        stream: bool,
    },
    /// Pull service images
    Pull {
        #[command(flatten)]
        target: Target,
        services: Vec<String>,
        /// Keep going when an image fails to pull
        #[arg(long)]
        ignore_pull_failures: bool,
        /// Report aggregate layer progress while pulling
        #[arg(long)]
        progress: bool,
    },
    /// Show container logs
    Logs {
        #[command(flatten)]
        target: Target,
        services: Vec<String>,
        /// Follow log output
        #[arg(short, long)]
        follow: bool,
        /// Show timestamps
        #[arg(short, long)]
        timestamps: bool,
        /// Number of lines from the end of the logs
        #[arg(short = 'n', long)]
        tail: Option<String>,
        /// Show logs since a timestamp or relative duration
        #[arg(long)]
        since: Option<String>,
    },
    /// Print the merged compose configuration
    Config {
        #[command(flatten)]
        target: Target,
    },
    /// Print container lifecycle events of a project as JSON lines
    Events {
        /// Project name
        project: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum Rmi {
    All,
    Local,
}
