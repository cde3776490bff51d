//! List-backups command

use anyhow::Result;
use clap::Args;
use devenv_backup::BackupSummary;

use super::Context;
use crate::cli::TargetArgs;
use crate::output;

#[derive(Args, Debug)]
pub struct ListBackupsArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

pub async fn run(_args: ListBackupsArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.sync_engine().await?;
    let spinner = output::spinner("Listing backups...");
    let result = engine.list_backups().await;
    spinner.finish_and_clear();

    print_backups(&ctx.config.machine, &result?);
    Ok(())
}

/// Names on stdout, most recent first; everything else on stderr
pub(super) fn print_backups(machine: &str, backups: &[BackupSummary]) {
    if backups.is_empty() {
        output::info(&format!("No backups found for {}", machine));
        return;
    }

    output::info(&format!("Available backups for {}:", machine));
    for backup in backups {
        println!("{}", backup.name);
        if !backup.complete {
            output::warning(&format!(
                "{} is incomplete (no manifest); it cannot be restored",
                backup.name
            ));
        }
    }
}
