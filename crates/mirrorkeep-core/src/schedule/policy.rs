use std::time::Duration;

use chrono::NaiveTime;

use crate::error::Error;
use crate::schedule::schedulable::TaskState;

/// When a task is allowed to run. Configured once, immutable for the
/// task's lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunPolicy {
    /// Cycle Init -> Run -> (exhaustion -> Wait) -> Init, forever.
    RunAlways,
    /// One full pass, then Shutdown.
    RunStop,
    /// One full pass, then at least `delay` in Wait before restarting.
    RunWait(Duration),
    /// Run only while the wall-clock time-of-day is inside [start, stop).
    /// Re-entering the window starts a fresh pass.
    Window { start: NaiveTime, stop: NaiveTime },
}

impl RunPolicy {
    /// Target state for a task, given its current lifecycle view and the
    /// current wall-clock time-of-day. Pure: all inputs are explicit so
    /// the decision table is directly testable.
    pub fn next_state(
        &self,
        state: TaskState,
        prev_state: TaskState,
        waited: Option<Duration>,
        now: NaiveTime,
    ) -> TaskState {
        if state == TaskState::Shutdown {
            return TaskState::Shutdown;
        }

        match *self {
            RunPolicy::RunAlways => match state {
                TaskState::Init => TaskState::Run,
                TaskState::Run => TaskState::Run,
                // Pass finished; start over.
                TaskState::Wait => TaskState::Init,
                TaskState::Shutdown => TaskState::Shutdown,
            },

            RunPolicy::RunStop => match state {
                TaskState::Init => TaskState::Run,
                TaskState::Run => TaskState::Run,
                TaskState::Wait => {
                    if prev_state == TaskState::Run {
                        TaskState::Shutdown
                    } else {
                        TaskState::Run
                    }
                }
                TaskState::Shutdown => TaskState::Shutdown,
            },

            RunPolicy::RunWait(delay) => match state {
                TaskState::Init => TaskState::Run,
                TaskState::Run => TaskState::Run,
                TaskState::Wait => match waited {
                    Some(waited) if waited >= delay => TaskState::Init,
                    _ => TaskState::Wait,
                },
                TaskState::Shutdown => TaskState::Shutdown,
            },

            RunPolicy::Window { start, stop } => {
                if !in_window(now, start, stop) {
                    return TaskState::Wait;
                }
                match state {
                    TaskState::Init => TaskState::Run,
                    TaskState::Run => TaskState::Run,
                    // Back inside the window: fresh pass, not mid-pass resume.
                    TaskState::Wait => TaskState::Init,
                    TaskState::Shutdown => TaskState::Shutdown,
                }
            }
        }
    }
}

/// Hour:minute containment check; no date rollover handling. Windows with
/// stop <= start are rejected at configuration time.
fn in_window(now: NaiveTime, start: NaiveTime, stop: NaiveTime) -> bool {
    now >= start && now < stop
}

/// Parse "HH:MM" into a time-of-day.
pub fn parse_hhmm(value: &str) -> Result<NaiveTime, Error> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| Error::Policy(format!("expected HH:MM, got '{}'", value)))
}

/// Parse "HH:MM" into a wait duration.
pub fn parse_delay(value: &str) -> Result<Duration, Error> {
    let (hours, minutes) = value
        .split_once(':')
        .ok_or_else(|| Error::Policy(format!("expected HH:MM, got '{}'", value)))?;

    let hours: u64 = hours
        .parse()
        .map_err(|_| Error::Policy(format!("expected HH:MM, got '{}'", value)))?;
    let minutes: u64 = minutes
        .parse()
        .map_err(|_| Error::Policy(format!("expected HH:MM, got '{}'", value)))?;

    if minutes >= 60 {
        return Err(Error::Policy(format!("minutes out of range in '{}'", value)));
    }

    Ok(Duration::from_secs(hours * 3600 + minutes * 60))
}
