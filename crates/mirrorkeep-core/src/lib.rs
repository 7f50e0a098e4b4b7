pub mod checksum;
pub mod config;
pub mod crawler;
pub mod error;
pub mod model;
pub mod reconciler;
pub mod schedule;
pub mod storage;
pub mod task;
pub mod transfer;

pub use config::AppConfig;
pub use error::Error;
pub use reconciler::{Reconciler, StepOutcome, StepReport};
pub use schedule::{CancelToken, RunPolicy, Schedulable, Scheduler, TaskState};
pub use task::MirrorTask;
