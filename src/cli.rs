use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::db::{DbConfig, WaitPolicy};
use crate::model::ImportMode;

#[derive(Parser, Debug)]
#[command(
    name = "lmia-stats",
    version,
    about = "Load TFWP labour-market releases into a local database"
)]
pub struct Cli {
    #[command(flatten)]
    pub db: DbArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Import every new source file of a dataset
    ExtractData(ExtractDataArgs),
    /// Wait for the database and apply pending migrations
    SetupDb(SetupDbArgs),
    /// Summarize migrations, ledger entries and loaded rows
    Status,
}

#[derive(Args, Debug, Clone)]
pub struct DbArgs {
    #[arg(long, env = "DB_PATH", default_value = "lmia_stats.sqlite", global = true)]
    pub db_path: PathBuf,
}

impl DbArgs {
    pub fn to_config(&self) -> DbConfig {
        DbConfig::new(self.db_path.clone())
    }
}

#[derive(Args, Debug, Clone)]
pub struct ExtractDataArgs {
    pub dataset_name: String,

    #[arg(long, env = "DATA_ROOT", default_value = "data")]
    pub data_root: PathBuf,

    /// Record the ledger entry and the rows in one transaction
    #[arg(long, default_value_t = false)]
    pub atomic: bool,

    #[arg(long)]
    pub report_path: Option<PathBuf>,
}

impl ExtractDataArgs {
    pub fn import_mode(&self) -> ImportMode {
        if self.atomic {
            ImportMode::Atomic
        } else {
            ImportMode::LedgerFirst
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SetupDbArgs {
    #[arg(long, env = "MIGRATIONS_DIR", default_value = "migrations")]
    pub migrations_dir: PathBuf,

    #[arg(long, env = "DB_WAIT_ATTEMPTS", default_value_t = 30)]
    pub wait_attempts: u32,

    #[arg(long, env = "DB_WAIT_DELAY_MS", default_value_t = 2000)]
    pub wait_delay_ms: u64,
}

impl SetupDbArgs {
    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            max_attempts: self.wait_attempts,
            delay: Duration::from_millis(self.wait_delay_ms),
        }
    }
}
