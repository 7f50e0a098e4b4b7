use config::{Config, ConfigError, File as ConfigFile};
use serde::Deserialize;

use crate::error::Error;
use crate::schedule::{parse_delay, parse_hhmm, RunPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(rename = "mirror_set")]
    pub mirror_sets: Vec<MirrorSetConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_path")]
    pub path: String,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            path: default_log_path(),
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            tick_secs: default_tick_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MirrorSetConfig {
    pub name: String,
    pub mounts: Vec<String>,
    pub policy: String,
    pub wait_delay: Option<String>,
    pub window_start: Option<String>,
    pub window_stop: Option<String>,
}

fn default_log_path() -> String {
    "./logs/mirrorkeep.log".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_tick_secs() -> u64 {
    5
}

pub fn load_configuration(path: &str) -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name(path))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

impl AppConfig {
    /// Startup validation; any failure here is fatal before a single task
    /// is scheduled.
    pub fn validate(&self) -> Result<(), Error> {
        if self.mirror_sets.is_empty() {
            return Err(Error::Other("no mirror sets configured".to_string()));
        }
        for set in &self.mirror_sets {
            set.run_policy()?;
            if set.mounts.len() < 2 {
                return Err(Error::Other(format!(
                    "mirror set '{}' needs at least two mounts",
                    set.name
                )));
            }
        }
        Ok(())
    }
}

impl MirrorSetConfig {
    /// Parse and validate this set's scheduling policy.
    pub fn run_policy(&self) -> Result<RunPolicy, Error> {
        match self.policy.as_str() {
            "run_always" => Ok(RunPolicy::RunAlways),
            "run_stop" => Ok(RunPolicy::RunStop),
            "run_wait" => {
                let delay = self.wait_delay.as_deref().ok_or_else(|| {
                    Error::Policy(format!(
                        "mirror set '{}': run_wait requires wait_delay",
                        self.name
                    ))
                })?;
                Ok(RunPolicy::RunWait(parse_delay(delay)?))
            }
            "window" => {
                let (start, stop) = match (&self.window_start, &self.window_stop) {
                    (Some(start), Some(stop)) => (parse_hhmm(start)?, parse_hhmm(stop)?),
                    _ => {
                        return Err(Error::Policy(format!(
                            "mirror set '{}': window requires window_start and window_stop",
                            self.name
                        )))
                    }
                };
                if stop <= start {
                    return Err(Error::Policy(format!(
                        "mirror set '{}': window_stop must be after window_start",
                        self.name
                    )));
                }
                Ok(RunPolicy::Window { start, stop })
            }
            other => Err(Error::Policy(format!(
                "mirror set '{}': unknown policy '{}'",
                self.name, other
            ))),
        }
    }
}
