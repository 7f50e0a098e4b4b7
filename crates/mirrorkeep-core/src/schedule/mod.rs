mod policy;
mod schedulable;
mod scheduler;

pub use policy::{parse_delay, parse_hhmm, RunPolicy};
pub use schedulable::{Schedulable, StateCell, TaskState};
pub use scheduler::{CancelToken, Scheduler};
