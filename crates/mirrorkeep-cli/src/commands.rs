use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "mirrorkeep")]
#[command(about = "Backup verification and mirror reconciliation daemon", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start scanning the configured mirror sets (runs in the foreground)
    Start {
        /// Path to the configuration file
        config: String,
    },
    /// Load and validate a configuration file, then print it
    CheckConfig {
        /// Path to the configuration file
        config: String,
    },
    /// Delete every record in the metadata store
    DropDb {
        /// Path to the configuration file
        config: String,
    },
}
