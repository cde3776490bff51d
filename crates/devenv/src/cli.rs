//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use devenv_core::ConfigOverrides;

pub use crate::commands::backup::BackupArgs;
pub use crate::commands::list_backups::ListBackupsArgs;
pub use crate::commands::manifest::ManifestArgs;
pub use crate::commands::restore::RestoreArgs;

/// devenv - back up and restore jj workspaces across machines
#[derive(Parser, Debug)]
#[command(name = "devenv")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to devenv.yaml config file
    #[arg(short, long, global = true)]
    pub config: Option<Utf8PathBuf>,

    /// Overall timeout in seconds for the whole command [default: 120]
    #[arg(long, global = true, env = "DEVENV_TIMEOUT")]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the manifest of every repository and workspace under the root
    Manifest(ManifestArgs),

    /// Capture the manifest, files and sessions into object storage
    Backup(BackupArgs),

    /// Restore repositories, workspaces, files and sessions from a backup
    Restore(RestoreArgs),

    /// List backups stored for a machine, most recent first
    ListBackups(ListBackupsArgs),
}

impl Cli {
    /// Flag and environment values that take precedence over devenv.yaml
    pub fn overrides(&self) -> ConfigOverrides {
        let mut overrides = match &self.command {
            Commands::Manifest(args) => ConfigOverrides {
                root_dir: args.root.clone(),
                ..Default::default()
            },
            Commands::Backup(args) => {
                let mut overrides = args.target.overrides();
                overrides.root_dir = args.root.clone();
                args.sessions.apply(&mut overrides);
                overrides
            }
            Commands::Restore(args) => {
                let mut overrides = args.target.overrides();
                overrides.root_dir = args.root.clone();
                args.sessions.apply(&mut overrides);
                overrides
            }
            Commands::ListBackups(args) => args.target.overrides(),
        };
        overrides.timeout_secs = self.timeout;
        overrides
    }
}

/// Where backups live and whose they are
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Backup base URI (s3://bucket/prefix/ or file:///dir)
    #[arg(long, env = "DEVENV_BASE")]
    pub base: Option<String>,

    /// Machine identifier [default: sanitized hostname]
    #[arg(long, env = "DEVENV_MACHINE")]
    pub machine: Option<String>,

    /// Extra path segment after the base prefix
    #[arg(long, env = "DEVENV_USER")]
    pub user: Option<String>,
}

impl TargetArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            base: self.base.clone(),
            machine: self.machine.clone(),
            user: self.user.clone(),
            ..Default::default()
        }
    }
}

/// Local agent session directories
#[derive(Args, Debug, Clone, Default)]
pub struct SessionDirArgs {
    /// Claude Code directory [default: ~/.dotfiles/.claude]
    #[arg(long)]
    pub claude_dir: Option<Utf8PathBuf>,

    /// OpenCode storage directory [default: ~/.local/share/opencode/storage]
    #[arg(long)]
    pub opencode_dir: Option<Utf8PathBuf>,
}

impl SessionDirArgs {
    fn apply(&self, overrides: &mut ConfigOverrides) {
        overrides.claude_dir = self.claude_dir.clone();
        overrides.opencode_dir = self.opencode_dir.clone();
    }
}
