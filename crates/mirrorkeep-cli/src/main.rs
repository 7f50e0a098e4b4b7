mod commands;
mod logging;

use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use mirrorkeep_core::checksum::Crc32;
use mirrorkeep_core::config::{load_configuration, AppConfig};
use mirrorkeep_core::reconciler::Reconciler;
use mirrorkeep_core::schedule::Scheduler;
use mirrorkeep_core::storage::MetadataStore;
use mirrorkeep_core::task::MirrorTask;
use mirrorkeep_core::transfer::ByteCopier;
use tracing::{error, info};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let args = Cli::parse();

    match args.command {
        Some(Commands::Start { config }) => {
            let config = load_config_or_exit(&config);
            let _guard = logging::init_logger(&config.log.path, &config.log.level);
            if let Err(err) = run_start(&config) {
                error!("Error: {}", err);
                process::exit(1);
            }
        }
        Some(Commands::CheckConfig { config }) => {
            let config = load_config_or_exit(&config);
            println!("{}", "Configuration is valid".green());
            println!("{:#?}", config);
        }
        Some(Commands::DropDb { config }) => {
            let config = load_config_or_exit(&config);
            match prompt_confirm(
                "Are you SURE you want to COMPLETELY DELETE the metadata store?",
                Some(false),
            ) {
                Ok(true) => match MetadataStore::open(&config.database.path) {
                    Ok(store) => {
                        if let Err(e) = store.drop_all() {
                            eprintln!("Error truncating store: {}", e);
                        } else {
                            println!("All tables truncated");
                        }
                    }
                    Err(e) => eprintln!("Error opening store: {}", e),
                },
                _ => {
                    process::exit(0);
                }
            }
        }
        None => {
            let _ = Cli::command().print_long_help();
        }
    }

    Ok(())
}

/// Load and validate configuration; any failure is fatal before a single
/// task is scheduled.
fn load_config_or_exit(path: &str) -> AppConfig {
    let config = match load_configuration(path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };
    if let Err(err) = config.validate() {
        eprintln!("Invalid configuration: {}", err);
        process::exit(1);
    }
    config
}

/// Build one mirror task per configured set and drive them until every
/// task shuts down (run_stop sets) or the process is terminated.
fn run_start(config: &AppConfig) -> Result<(), mirrorkeep_core::Error> {
    let tick = Duration::from_secs(config.scheduler.tick_secs);
    let mut scheduler = Scheduler::new(tick);

    for set in &config.mirror_sets {
        let policy = set.run_policy()?;
        let store = MetadataStore::open(&config.database.path)?;
        let reconciler = Reconciler::new(set.name.clone(), store, Box::new(ByteCopier));
        let mounts: Vec<PathBuf> = set.mounts.iter().map(PathBuf::from).collect();

        let task = Arc::new(MirrorTask::new(
            set.name.clone(),
            mounts,
            Arc::new(Crc32),
            reconciler,
        ));
        scheduler.add(set.name.clone(), policy, task);
    }

    info!(
        "Scheduled {} mirror set(s); tick interval {}s",
        config.mirror_sets.len(),
        config.scheduler.tick_secs
    );

    scheduler.start();
    scheduler.join();

    info!("All tasks finished; exiting");
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
