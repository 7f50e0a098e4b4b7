use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::checksum::Checksum;
use crate::crawler::Disk;
use crate::model::Directory;
use crate::reconciler::{Reconciler, StepOutcome};
use crate::schedule::{Schedulable, StateCell, TaskState};

struct Pass {
    disks: Vec<Disk>,
    started_at: i64,
    /// Directory batches reconciled so far in this pass.
    steps: usize,
}

struct Inner {
    name: String,
    mounts: Vec<PathBuf>,
    checksum: Arc<dyn Checksum>,
    state: StateCell,
    pass: Mutex<Pass>,
}

/// The mirror-set worker: one Schedulable task per group of mirrored
/// mounts. A single long-lived worker thread performs crawl/reconcile
/// steps; lifecycle methods only flip state and wake it through a channel,
/// so no thread is respawned across transitions.
pub struct MirrorTask {
    inner: Arc<Inner>,
    wake_tx: Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MirrorTask {
    pub fn new(
        name: impl Into<String>,
        mounts: Vec<PathBuf>,
        checksum: Arc<dyn Checksum>,
        reconciler: Reconciler,
    ) -> Self {
        let inner = Arc::new(Inner {
            name: name.into(),
            mounts,
            checksum,
            state: StateCell::new(),
            pass: Mutex::new(Pass {
                disks: Vec::new(),
                started_at: 0,
                steps: 0,
            }),
        });

        let (wake_tx, wake_rx) = crossbeam_channel::unbounded();

        let worker = {
            let inner = Arc::clone(&inner);
            thread::Builder::new()
                .name(format!("mirror-{}", inner.name))
                .spawn(move || worker_loop(inner, reconciler, wake_rx))
                .expect("failed to spawn mirror worker")
        };

        MirrorTask {
            inner,
            wake_tx,
            worker: Mutex::new(Some(worker)),
        }
    }
}

impl Schedulable for MirrorTask {
    /// Rebuild the disk set for a fresh pass. Safe against the worker: it
    /// only touches pass state while in Run, and the scheduler only calls
    /// init() from Init/Wait.
    fn init(&self) {
        let mut pass = self.inner.pass.lock().expect("pass lock poisoned");
        pass.disks = self
            .inner
            .mounts
            .iter()
            .map(|m| Disk::new(m.clone(), Arc::clone(&self.inner.checksum)))
            .collect();
        pass.started_at = chrono::Utc::now().timestamp();
        pass.steps = 0;
        drop(pass);

        self.inner.state.set(TaskState::Init);
        debug!("Task '{}' initialized for a new pass", self.inner.name);
    }

    fn run(&self) {
        if self.inner.state.set(TaskState::Run) {
            let _ = self.wake_tx.send(());
        }
    }

    fn wait(&self) {
        self.inner.state.set(TaskState::Wait);
    }

    /// Advisory: the worker finishes its in-flight step, then parks and
    /// exits. The state flips immediately so the scheduler can observe it.
    fn shutdown(&self) {
        self.inner.state.set(TaskState::Shutdown);
        let _ = self.wake_tx.send(());
    }

    fn state(&self) -> TaskState {
        self.inner.state.state()
    }

    fn prev_state(&self) -> TaskState {
        self.inner.state.prev_state()
    }

    fn waited(&self) -> Option<Duration> {
        self.inner.state.waited()
    }
}

impl Drop for MirrorTask {
    fn drop(&mut self) {
        self.inner.state.set(TaskState::Shutdown);
        let _ = self.wake_tx.send(());
        if let Some(handle) = self.worker.lock().expect("worker lock poisoned").take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(inner: Arc<Inner>, reconciler: Reconciler, wake_rx: Receiver<()>) {
    debug!("Worker for '{}' started", inner.name);

    loop {
        if wake_rx.recv().is_err() {
            break;
        }
        if inner.state.state() == TaskState::Shutdown {
            break;
        }

        while inner.state.state() == TaskState::Run {
            if run_step(&inner, &reconciler) {
                let (started_at, steps) = {
                    let pass = inner.pass.lock().expect("pass lock poisoned");
                    (pass.started_at, pass.steps)
                };
                // A pass that reconciled nothing is indistinguishable from
                // an unmounted or unreadable mirror set; pruning on it
                // would wipe the last-known-good records.
                if steps > 0 {
                    reconciler.finish_pass(started_at);
                    info!("Task '{}' finished a full pass", inner.name);
                } else {
                    warn!(
                        "Task '{}' reconciled no directories; skipping store prune",
                        inner.name
                    );
                }
                // Exhausted: ask to wait instead of looping Run forever.
                inner.state.set(TaskState::Wait);
            }
        }

        if inner.state.state() == TaskState::Shutdown {
            break;
        }
    }

    debug!("Worker for '{}' exiting", inner.name);
}

/// One unit of work: advance every crawler by one directory (lockstep) and
/// reconcile the batch. Returns true when the pass completed.
fn run_step(inner: &Inner, reconciler: &Reconciler) -> bool {
    let mut pass = inner.pass.lock().expect("pass lock poisoned");
    let mut batch: Vec<Option<Directory>> = pass
        .disks
        .iter_mut()
        .map(|disk| disk.next_directory())
        .collect();
    drop(pass);

    let now = chrono::Utc::now().timestamp();
    match reconciler.reconcile_step(&mut batch, now) {
        StepOutcome::PassComplete => true,
        StepOutcome::Progress(report) => {
            inner.pass.lock().expect("pass lock poisoned").steps += 1;
            if report.copies > 0 || report.copy_failures > 0 || report.flagged > 0 {
                info!(
                    "Task '{}' step: {} copies, {} failures, {} flagged",
                    inner.name, report.copies, report.copy_failures, report.flagged
                );
            }
            false
        }
    }
}
