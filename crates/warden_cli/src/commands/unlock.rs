//! Unlock command - Inspect or remove a stale build lock.

use anyhow::Result;
use clap::Args;

use warden_core::LockManager;

use super::TargetArgs;

#[derive(Args)]
pub struct UnlockArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Only show the current holder
    #[arg(long)]
    pub show: bool,
}

pub async fn execute(args: UnlockArgs) -> Result<()> {
    let config = args.target.load_config()?;
    let locks = LockManager::new(config.lock_path());

    if !locks.is_locked() {
        println!("🔓 No build lock on {}", config.target_dir.display());
        return Ok(());
    }

    match locks.inspect() {
        Some(record) => println!(
            "🔒 Locked by PID {} since {} ({})",
            record.pid,
            record.acquired_at.to_rfc3339(),
            record.holder_id
        ),
        None => println!("🔒 Locked (holder record unreadable)"),
    }

    if args.show {
        return Ok(());
    }

    locks.force_release()?;
    println!("   ✅ Lock removed");
    Ok(())
}
