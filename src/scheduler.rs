//! The scheduler loop: one dedicated worker thread ticking through the task
//! roster.
//!
//! Single-writer by construction — the worker thread is the only thing that
//! writes to the alert store, which is what makes the check-then-insert dedup
//! in [`crate::alerts`] safe without row locks. Within a tick, tasks run in
//! the fixed [`ALL_TASKS`] order; a task failure or panic is logged and never
//! takes the loop down. Process-level liveness is an external watchdog's
//! concern, surfaced through [`SchedulerStatus`].

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::{Condvar, Mutex};

use crate::analysis::CompletionProvider;
use crate::config::Config;
use crate::db::{AlertDb, DbError};
use crate::push::PushTransport;
use crate::tasks::{self, TaskContext};
use crate::timing;
use crate::types::{SchedulerStatus, TaskName, ALL_TASKS};

/// State shared between the control surface and the worker thread.
struct Shared {
    config: Config,
    tz: Tz,
    /// Requested-running: the control surface's intent.
    running: AtomicBool,
    /// Actually-running: flipped off by the worker on exit.
    alive: AtomicBool,
    /// Wakes the worker out of its tick sleep for forced runs and shutdown.
    wake: Condvar,
    /// Tasks queued by `force_run`, drained at the top of each tick.
    forced: Mutex<Vec<TaskName>>,
    /// Last successful completion per task. Failures and panics do not
    /// advance these, so gated tasks retry on the next tick.
    last_run: Mutex<HashMap<TaskName, DateTime<Utc>>>,
    provider: Box<dyn CompletionProvider>,
    push: Box<dyn PushTransport>,
}

pub struct Scheduler {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        config: Config,
        provider: Box<dyn CompletionProvider>,
        push: Box<dyn PushTransport>,
    ) -> Self {
        // Config is validated at startup; an unparseable timezone cannot
        // reach this point through Config::load.
        let tz = config.tz().unwrap_or(chrono_tz::UTC);
        Self {
            shared: Arc::new(Shared {
                config,
                tz,
                running: AtomicBool::new(false),
                alive: AtomicBool::new(false),
                wake: Condvar::new(),
                forced: Mutex::new(Vec::new()),
                last_run: Mutex::new(HashMap::new()),
                provider,
                push,
            }),
            handle: Mutex::new(None),
        }
    }

    /// Start the worker thread. Idempotent — calling on a running scheduler
    /// is a logged no-op.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            log::warn!("Scheduler already running; start ignored");
            return;
        }
        self.shared.alive.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("beacon-scheduler".to_string())
            .spawn(move || run_loop(shared))
            .expect("failed to spawn scheduler thread");
        *self.handle.lock() = Some(handle);
        log::info!(
            "Scheduler started (tick every {}s, timezone {})",
            self.shared.config.tick_interval_secs,
            self.shared.tz
        );
    }

    /// Request shutdown and wait up to `timeout` for the worker to finish
    /// its current tick. A worker stuck in a slow generator call is detached
    /// rather than blocked on.
    pub fn stop(&self, timeout: Duration) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        // Notify under the forced lock: the worker re-checks `running` while
        // holding it before sleeping, so this cannot race into a lost wakeup
        // that leaves the worker sleeping out a full tick.
        {
            let _guard = self.shared.forced.lock();
            self.shared.wake.notify_all();
        }

        let deadline = Instant::now() + timeout;
        while self.shared.alive.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if self.shared.alive.load(Ordering::SeqCst) {
                log::warn!(
                    "Scheduler thread still busy after {:?}; detaching",
                    timeout
                );
            } else if handle.join().is_err() {
                log::error!("Scheduler thread panicked during shutdown");
            } else {
                log::info!("Scheduler stopped");
            }
        }
    }

    /// Queue a task to run on the next tick regardless of its cadence gate,
    /// and wake the worker immediately.
    pub fn force_run(&self, task: TaskName) {
        let mut forced = self.shared.forced.lock();
        forced.push(task);
        self.shared.wake.notify_all();
        drop(forced);
        log::info!("Task {} queued for forced run", task);
    }

    /// Liveness and cadence snapshot for the external watchdog.
    pub fn status(&self) -> SchedulerStatus {
        let last_run = self
            .shared
            .last_run
            .lock()
            .iter()
            .map(|(task, ts)| (task.as_str().to_string(), *ts))
            .collect();
        SchedulerStatus {
            running: self.shared.running.load(Ordering::SeqCst),
            alive: self.shared.alive.load(Ordering::SeqCst),
            tick_interval_secs: self.shared.config.tick_interval_secs,
            last_run,
        }
    }
}

fn open_db(config: &Config) -> Result<AlertDb, DbError> {
    match config.database_path {
        Some(ref path) => AlertDb::open_at(PathBuf::from(path)),
        None => AlertDb::open(),
    }
}

fn run_loop(shared: Arc<Shared>) {
    log::info!("Scheduler loop entered");

    while shared.running.load(Ordering::SeqCst) {
        let forced: Vec<TaskName> = std::mem::take(&mut *shared.forced.lock());

        match open_db(&shared.config) {
            Ok(db) => run_tick(&shared, &db, &forced),
            // The store being briefly unavailable (backup tooling, disk
            // pressure) is retryable; keep ticking.
            Err(e) => log::error!("Cannot open alert store: {}; retrying next tick", e),
        }

        let mut forced_guard = shared.forced.lock();
        if shared.running.load(Ordering::SeqCst) && forced_guard.is_empty() {
            shared.wake.wait_for(
                &mut forced_guard,
                Duration::from_secs(shared.config.tick_interval_secs),
            );
        }
    }

    shared.alive.store(false, Ordering::SeqCst);
    log::info!("Scheduler loop exited");
}

fn run_tick(shared: &Shared, db: &AlertDb, forced: &[TaskName]) {
    let now = Utc::now();
    let local_now = now.with_timezone(&shared.tz);

    for &task in ALL_TASKS {
        let is_forced = forced.contains(&task);
        if !is_forced && !is_due(shared, task, now, &local_now) {
            continue;
        }

        let ctx = TaskContext {
            db,
            provider: shared.provider.as_ref(),
            push: shared.push.as_ref(),
            config: &shared.config,
            tz: shared.tz,
        };

        match panic::catch_unwind(AssertUnwindSafe(|| tasks::run_task(task, &ctx))) {
            Ok(Ok(count)) => {
                if count > 0 {
                    log::info!("Task {} processed {} item(s)", task, count);
                }
                shared.last_run.lock().insert(task, now);
            }
            Ok(Err(e)) => {
                if e.is_retryable() {
                    log::warn!("Task {} failed: {}; will retry", task, e);
                } else {
                    log::error!("Task {} failed: {}", task, e);
                }
            }
            Err(_) => log::error!("Task {} panicked; continuing with next task", task),
        }
    }
}

/// Cadence gate per task. Scan tasks run every tick; analysis and
/// recommendations are periodic; digest and cleanup fire once inside their
/// local-time window per day.
fn is_due(
    shared: &Shared,
    task: TaskName,
    now: DateTime<Utc>,
    local_now: &DateTime<Tz>,
) -> bool {
    let config = &shared.config;
    let last = shared.last_run.lock().get(&task).copied();
    match task {
        TaskName::DueAlerts | TaskName::UpcomingEvents | TaskName::EventConflicts => true,
        TaskName::OverdueEvents => {
            timing::hourly_gate(last, now, chrono::Duration::minutes(60))
        }
        TaskName::ActivityAnalysis => timing::hourly_gate(
            last,
            now,
            chrono::Duration::minutes(config.analysis_period_minutes),
        ),
        TaskName::Recommendations => timing::hourly_gate(
            last,
            now,
            chrono::Duration::minutes(config.recommendation_period_minutes),
        ),
        TaskName::DailyDigest => daily_due(
            config.digest_hour,
            config.digest_minute_window,
            last,
            local_now,
            shared.tz,
        ),
        TaskName::Cleanup => daily_due(
            config.cleanup_hour,
            config.cleanup_minute_window,
            last,
            local_now,
            shared.tz,
        ),
    }
}

/// Once-per-day gate: inside the local wall-clock window AND not already run
/// on this local calendar day. Both halves matter — the window alone would
/// fire on every tick inside it.
fn daily_due(
    hour: u32,
    minute_window: u32,
    last: Option<DateTime<Utc>>,
    local_now: &DateTime<Tz>,
    tz: Tz,
) -> bool {
    timing::gated_daily(hour, minute_window, local_now) && !ran_today(last, local_now, tz)
}

/// Whether the last successful run fell on the same local calendar day.
fn ran_today(last: Option<DateTime<Utc>>, local_now: &DateTime<Tz>, tz: Tz) -> bool {
    match last {
        None => false,
        Some(last) => last.with_timezone(&tz).date_naive() == local_now.date_naive(),
    }
}
