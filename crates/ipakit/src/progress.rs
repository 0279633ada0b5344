//! Progress coordination.
//!
//! Every long-running job reports through a [`ProgressHandle`]. Handles send
//! events to a single coordinator thread that owns all progress state, so
//! workers never contend on a lock and observers see one ordered stream of
//! [`ProgressSnapshot`]s.
//!
//! Each job moves through the same small state machine:
//!
//! ```text
//! Hidden --show--> Visible(name, 0) --update--> Visible(name, x) --complete--> Visible(name, 1)
//!                                                                   (after the hide delay) --> Hidden
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Identifies one job within a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Visible progress of one job.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ProgressState {
    #[default]
    Hidden,
    Visible { name: String, fraction: f64 },
}

impl ProgressState {
    pub fn is_visible(&self) -> bool {
        matches!(self, Self::Visible { .. })
    }

    pub fn fraction(&self) -> Option<f64> {
        match self {
            Self::Visible { fraction, .. } => Some(*fraction),
            Self::Hidden => None,
        }
    }

    /// Start a new episode at zero.
    pub fn show(&mut self, name: impl Into<String>) {
        *self = Self::Visible {
            name: name.into(),
            fraction: 0.0,
        };
    }

    /// Raise the fraction to `value` clamped to `[0, 1]`.
    ///
    /// Returns whether the state changed. Ignored while hidden, for NaN,
    /// and for values below the current fraction.
    pub fn update(&mut self, value: f64) -> bool {
        let Self::Visible { fraction, .. } = self else {
            return false;
        };
        if value.is_nan() {
            return false;
        }
        let next = value.clamp(0.0, 1.0);
        if next <= *fraction {
            return false;
        }
        *fraction = next;
        true
    }

    /// Jump to one. The caller schedules the hide.
    pub fn complete(&mut self) -> bool {
        match self {
            Self::Visible { fraction, .. } => {
                let changed = *fraction < 1.0;
                *fraction = 1.0;
                changed
            }
            Self::Hidden => false,
        }
    }
}

/// A state change of one job, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub job: JobId,
    pub state: ProgressState,
}

#[derive(Debug)]
enum ProgressEvent {
    Show { job: JobId, name: String },
    Update { job: JobId, fraction: f64 },
    Complete { job: JobId },
    Query { job: JobId, reply: mpsc::Sender<ProgressState> },
    Subscribe(mpsc::Sender<ProgressSnapshot>),
    Shutdown,
}

/// Owner of the coordinator thread.
///
/// Dropping the coordinator stops the thread; handles that outlive it
/// become inert.
pub struct ProgressCoordinator {
    sender: mpsc::Sender<ProgressEvent>,
    next_job: AtomicU64,
    _handle: thread::JoinHandle<()>,
}

impl ProgressCoordinator {
    /// Spawn the coordinator thread. Completed jobs hide after `hide_delay`.
    pub fn spawn(hide_delay: Duration) -> Self {
        let (sender, receiver) = mpsc::channel();

        let handle = thread::spawn(move || {
            run_event_loop(receiver, hide_delay);
        });

        Self {
            sender,
            next_job: AtomicU64::new(1),
            _handle: handle,
        }
    }

    /// A handle for a new job, not yet shown.
    pub fn handle(&self) -> ProgressHandle {
        let job = JobId(self.next_job.fetch_add(1, Ordering::Relaxed));
        ProgressHandle {
            inner: Arc::new(HandleInner {
                job,
                sender: self.sender.clone(),
                open: AtomicBool::new(false),
            }),
        }
    }

    /// A handle for a new job, already shown under `name`.
    pub fn begin(&self, name: impl Into<String>) -> ProgressHandle {
        let handle = self.handle();
        handle.show(name);
        handle
    }

    /// Receive every state change from now on.
    pub fn subscribe(&self) -> mpsc::Receiver<ProgressSnapshot> {
        let (tx, rx) = mpsc::channel();
        let _ = self.sender.send(ProgressEvent::Subscribe(tx));
        rx
    }

    /// Current state of `job`. Unknown jobs are hidden.
    ///
    /// Events sent before this call are applied first.
    pub fn state(&self, job: JobId) -> ProgressState {
        let (reply, rx) = mpsc::channel();
        if self.sender.send(ProgressEvent::Query { job, reply }).is_err() {
            return ProgressState::Hidden;
        }
        rx.recv().unwrap_or_default()
    }
}

impl Drop for ProgressCoordinator {
    fn drop(&mut self) {
        let _ = self.sender.send(ProgressEvent::Shutdown);
    }
}

impl std::fmt::Debug for ProgressCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressCoordinator")
            .field("next_job", &self.next_job)
            .finish_non_exhaustive()
    }
}

/// Reporting side of one job. Clones report for the same job.
///
/// When the last clone is dropped while the job is still shown, the job is
/// completed, so an early return never leaves progress visible.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    inner: Arc<HandleInner>,
}

#[derive(Debug)]
struct HandleInner {
    job: JobId,
    sender: mpsc::Sender<ProgressEvent>,
    open: AtomicBool,
}

impl ProgressHandle {
    pub fn job(&self) -> JobId {
        self.inner.job
    }

    pub fn show(&self, name: impl Into<String>) {
        self.inner.open.store(true, Ordering::Release);
        self.inner.send(ProgressEvent::Show {
            job: self.inner.job,
            name: name.into(),
        });
    }

    pub fn update(&self, fraction: f64) {
        self.inner.send(ProgressEvent::Update {
            job: self.inner.job,
            fraction,
        });
    }

    pub fn complete(&self) {
        self.inner.open.store(false, Ordering::Release);
        self.inner.send(ProgressEvent::Complete { job: self.inner.job });
    }
}

impl HandleInner {
    fn send(&self, event: ProgressEvent) {
        // The coordinator may already be gone
        let _ = self.sender.send(event);
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if self.open.load(Ordering::Acquire) {
            debug!("job {} dropped while visible, completing", self.job.0);
            self.send(ProgressEvent::Complete { job: self.job });
        }
    }
}

#[derive(Debug, Default)]
struct JobSlot {
    state: ProgressState,
    hide_at: Option<Instant>,
}

struct Coordinator {
    jobs: HashMap<JobId, JobSlot>,
    subscribers: Vec<mpsc::Sender<ProgressSnapshot>>,
    hide_delay: Duration,
}

impl Coordinator {
    fn publish(&mut self, job: JobId, state: &ProgressState) {
        trace!("job {} -> {:?}", job.0, state);
        self.subscribers.retain(|tx| {
            tx.send(ProgressSnapshot {
                job,
                state: state.clone(),
            })
            .is_ok()
        });
    }

    fn show(&mut self, job: JobId, name: String) {
        let slot = self.jobs.entry(job).or_default();
        slot.state.show(name);
        slot.hide_at = None;
        let state = slot.state.clone();
        self.publish(job, &state);
    }

    fn update(&mut self, job: JobId, fraction: f64) {
        let Some(slot) = self.jobs.get_mut(&job) else {
            return;
        };
        if slot.state.update(fraction) {
            let state = slot.state.clone();
            self.publish(job, &state);
        }
    }

    fn complete(&mut self, job: JobId) {
        let Some(slot) = self.jobs.get_mut(&job) else {
            return;
        };
        if !slot.state.is_visible() {
            return;
        }
        let changed = slot.state.complete();
        slot.hide_at = Some(Instant::now() + self.hide_delay);
        if changed {
            let state = slot.state.clone();
            self.publish(job, &state);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.jobs.values().filter_map(|slot| slot.hide_at).min()
    }

    fn hide_due(&mut self, now: Instant) {
        let due: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|(_, slot)| slot.hide_at.is_some_and(|at| at <= now))
            .map(|(job, _)| *job)
            .collect();

        for job in due {
            self.jobs.remove(&job);
            self.publish(job, &ProgressState::Hidden);
        }
    }

    fn state(&self, job: JobId) -> ProgressState {
        self.jobs
            .get(&job)
            .map(|slot| slot.state.clone())
            .unwrap_or_default()
    }
}

fn run_event_loop(receiver: mpsc::Receiver<ProgressEvent>, hide_delay: Duration) {
    let mut coordinator = Coordinator {
        jobs: HashMap::new(),
        subscribers: Vec::new(),
        hide_delay,
    };

    loop {
        let event = match coordinator.next_deadline() {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                match receiver.recv_timeout(timeout) {
                    Ok(event) => Some(event),
                    Err(mpsc::RecvTimeoutError::Timeout) => None,
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match receiver.recv() {
                Ok(event) => Some(event),
                Err(_) => break,
            },
        };

        match event {
            Some(ProgressEvent::Show { job, name }) => coordinator.show(job, name),
            Some(ProgressEvent::Update { job, fraction }) => coordinator.update(job, fraction),
            Some(ProgressEvent::Complete { job }) => coordinator.complete(job),
            Some(ProgressEvent::Query { job, reply }) => {
                let _ = reply.send(coordinator.state(job));
            }
            Some(ProgressEvent::Subscribe(tx)) => coordinator.subscribers.push(tx),
            Some(ProgressEvent::Shutdown) => break,
            None => {}
        }

        coordinator.hide_due(Instant::now());
    }

    debug!("progress coordinator stopped");
}
