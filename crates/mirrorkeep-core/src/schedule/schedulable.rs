use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Lifecycle state of a schedulable task. Shutdown is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Init,
    Run,
    Wait,
    Shutdown,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Init => "INIT",
            TaskState::Run => "RUN",
            TaskState::Wait => "WAIT",
            TaskState::Shutdown => "SHUTDOWN",
        };
        f.write_str(s)
    }
}

/// A long-running stateful worker the Scheduler can drive through its
/// lifecycle. The Scheduler holds these behind dynamic dispatch and never
/// sees the concrete type.
pub trait Schedulable: Send + Sync {
    /// (Re)build worker state for a fresh pass. Called synchronously by
    /// `Scheduler::add` and again whenever a policy restarts the task.
    fn init(&self);
    /// Start (or resume) performing work.
    fn run(&self);
    /// Stop performing work but keep position; resumable.
    fn wait(&self);
    /// Terminal, advisory: in-flight work finishes first.
    fn shutdown(&self);

    fn state(&self) -> TaskState;
    /// State held immediately before entering Wait.
    fn prev_state(&self) -> TaskState;
    /// How long the task has been in Wait, if it is.
    fn waited(&self) -> Option<Duration>;
}

struct CellInner {
    state: TaskState,
    prev_state: TaskState,
    wait_since: Option<Instant>,
}

/// Owned, single-writer state value behind one exclusive (non-recursive)
/// lock, so the Scheduler's control thread and the task's own worker
/// thread never observe a torn state.
pub struct StateCell {
    inner: Mutex<CellInner>,
}

impl StateCell {
    pub fn new() -> Self {
        StateCell {
            inner: Mutex::new(CellInner {
                state: TaskState::Init,
                prev_state: TaskState::Init,
                wait_since: None,
            }),
        }
    }

    /// Transition to `next`. Refused unconditionally once the cell is in
    /// Shutdown. prev_state is only advanced when the current state is not
    /// Wait, so entering Wait never overwrites the pre-wait context.
    /// Returns whether the transition was applied.
    pub fn set(&self, next: TaskState) -> bool {
        let mut inner = self.inner.lock().expect("state lock poisoned");

        if inner.state == TaskState::Shutdown {
            return false;
        }

        if inner.state != TaskState::Wait {
            inner.prev_state = inner.state;
        }

        if next == TaskState::Wait {
            if inner.state != TaskState::Wait {
                inner.wait_since = Some(Instant::now());
            }
        } else {
            inner.wait_since = None;
        }

        inner.state = next;
        true
    }

    pub fn state(&self) -> TaskState {
        self.inner.lock().expect("state lock poisoned").state
    }

    pub fn prev_state(&self) -> TaskState {
        self.inner.lock().expect("state lock poisoned").prev_state
    }

    pub fn waited(&self) -> Option<Duration> {
        self.inner
            .lock()
            .expect("state lock poisoned")
            .wait_since
            .map(|t| t.elapsed())
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
