use anyhow::{Result, bail};
use tracing::info;

use crate::cli::SetupDbArgs;
use crate::db::{DbConfig, wait_for_database};

mod migrations;

pub use migrations::apply_pending;

pub fn run(db: &DbConfig, args: SetupDbArgs) -> Result<()> {
    info!(
        db_path = %db.path().display(),
        migrations_dir = %args.migrations_dir.display(),
        "setting up database"
    );

    let policy = args.wait_policy();
    if !wait_for_database(db, policy) {
        bail!(
            "database did not become available after {} attempts",
            policy.max_attempts
        );
    }

    let mut connection = db.connect()?;
    let run = apply_pending(&mut connection, &args.migrations_dir)?;

    info!(
        applied = run.applied.len(),
        skipped = run.skipped.len(),
        "database setup completed"
    );

    Ok(())
}
