use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Local;
use tracing::{debug, error, info};

use crate::schedule::policy::RunPolicy;
use crate::schedule::schedulable::{Schedulable, TaskState};

const SHUTDOWN_RETRIES: u32 = 30;
const SHUTDOWN_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Cooperative cancellation for the control loop. The OS-signal boundary
/// (outside this crate) is expected to be a thin adapter that calls
/// `cancel()`.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

struct Entry {
    task: Arc<dyn Schedulable>,
    policy: RunPolicy,
}

/// Owns a named set of schedulable tasks and drives each toward its
/// policy-determined state on a fixed-period control loop. The control
/// thread never performs task work itself; it only reads states and
/// invokes lifecycle transitions.
pub struct Scheduler {
    tasks: Arc<Mutex<HashMap<String, Entry>>>,
    tick: Duration,
    cancel: CancelToken,
    control: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(tick: Duration) -> Self {
        Scheduler {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            tick,
            cancel: CancelToken::new(),
            control: None,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Register a task under `name`. `init()` is called synchronously
    /// before registration so the control loop never observes an
    /// unconfigured task.
    pub fn add(&self, name: impl Into<String>, policy: RunPolicy, task: Arc<dyn Schedulable>) {
        let name = name.into();
        task.init();
        let mut tasks = self.tasks.lock().expect("task map lock poisoned");
        info!("Scheduling task '{}' with policy {:?}", name, policy);
        tasks.insert(name, Entry { task, policy });
    }

    /// Shut a task down and drop it from the active set. Blocks for a
    /// bounded number of retries waiting for the task to reach Shutdown;
    /// a task that never gets there is force-dropped with an error log,
    /// not treated as fatal.
    pub fn remove(&self, name: &str) {
        let entry = {
            let mut tasks = self.tasks.lock().expect("task map lock poisoned");
            tasks.remove(name)
        };

        let Some(entry) = entry else {
            return;
        };

        entry.task.shutdown();

        let mut retries = 0;
        while entry.task.state() != TaskState::Shutdown && retries < SHUTDOWN_RETRIES {
            thread::sleep(SHUTDOWN_RETRY_INTERVAL);
            retries += 1;
        }

        if entry.task.state() != TaskState::Shutdown {
            error!(
                "Task '{}' did not reach SHUTDOWN within the retry budget; force-dropping",
                name
            );
        } else {
            debug!("Task '{}' shut down and removed", name);
        }
    }

    /// Spawn the control thread. The loop evaluates every task each tick
    /// and exits when cancelled or when the task set drains (every task
    /// reached Shutdown and was removed).
    pub fn start(&mut self) {
        if self.control.is_some() {
            return;
        }

        let tasks = Arc::clone(&self.tasks);
        let tick = self.tick;
        let cancel = self.cancel.clone();

        self.control = Some(thread::spawn(move || {
            info!("Scheduler control loop started (tick {:?})", tick);
            loop {
                if cancel.is_cancelled() {
                    break;
                }

                let drained = {
                    let mut tasks = tasks.lock().expect("task map lock poisoned");
                    tick_once(&mut tasks);
                    tasks.is_empty()
                };

                if drained {
                    info!("All tasks shut down; scheduler control loop exiting");
                    break;
                }

                thread::sleep(tick);
            }

            // Cancelled (or drained): shut down whatever is left.
            let mut tasks = tasks.lock().expect("task map lock poisoned");
            for (name, entry) in tasks.drain() {
                debug!("Shutting down task '{}'", name);
                entry.task.shutdown();
            }
            info!("Scheduler control loop stopped");
        }));
    }

    /// Request cancellation and join the control thread.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        self.join();
    }

    /// Block until the control loop exits (cancellation or drained task set).
    pub fn join(&mut self) {
        if let Some(handle) = self.control.take() {
            let _ = handle.join();
        }
    }

    #[cfg(test)]
    fn task_state(&self, name: &str) -> Option<TaskState> {
        let tasks = self.tasks.lock().unwrap();
        tasks.get(name).map(|e| e.task.state())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One control-loop evaluation: compute each task's policy target and, if
/// it differs from the current state, invoke the matching transition.
/// Tasks that reached Shutdown are dropped from the set.
fn tick_once(tasks: &mut HashMap<String, Entry>) {
    let now = Local::now().time();
    let mut finished: Vec<String> = Vec::new();

    for (name, entry) in tasks.iter() {
        let current = entry.task.state();
        let target = entry
            .policy
            .next_state(current, entry.task.prev_state(), entry.task.waited(), now);

        if target != current {
            debug!("Task '{}': {} -> {}", name, current, target);
            match target {
                TaskState::Init => entry.task.init(),
                TaskState::Run => entry.task.run(),
                TaskState::Wait => entry.task.wait(),
                TaskState::Shutdown => entry.task.shutdown(),
            }
        }

        if entry.task.state() == TaskState::Shutdown {
            finished.push(name.clone());
        }
    }

    for name in finished {
        info!("Task '{}' reached SHUTDOWN; removing from active set", name);
        tasks.remove(&name);
    }
}
