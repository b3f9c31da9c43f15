use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};
use notify_rust::{Notification, Timeout};

use crate::database::{Database, Store};
use crate::error::{Error, Result};
use crate::reminder::{Notice, ReminderEvaluator};

/// Supplies the current medications and slots for one tick.
pub trait ScheduleSource {
    fn snapshot(&self) -> Result<Database>;
}

impl ScheduleSource for Store {
    fn snapshot(&self) -> Result<Database> {
        self.load()
    }
}

/// Delivers a reminder to the user.
pub trait Notifier {
    fn notify(&self, notice: &Notice) -> Result<()>;
}

/// OS desktop notifications.
pub struct DesktopNotifier {
    timeout_ms: u32,
}

impl DesktopNotifier {
    pub fn new(timeout_ms: u32) -> Self {
        DesktopNotifier { timeout_ms }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, notice: &Notice) -> Result<()> {
        let timeout = match self.timeout_ms {
            0 => Timeout::Never,
            ms => Timeout::Milliseconds(ms),
        };

        let mut notification = Notification::new();
        notification
            .appname("medibuddy")
            .summary(&notice.title)
            .body(&notice.body)
            .icon("medication")
            .timeout(timeout);

        // Freedesktop servers carry the notice data as custom hints
        #[cfg(all(unix, not(target_os = "macos")))]
        for (key, value) in &notice.data {
            notification.hint(notify_rust::Hint::Custom(key.clone(), value.clone()));
        }

        notification
            .show()
            .map(|_| ())
            .map_err(|e| Error::Notify(e.to_string()))
    }
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Drives a [`ReminderEvaluator`] from a periodic, strictly serial loop.
///
/// The daemon owns the fired-set; it lives exactly as long as the daemon.
pub struct ReminderDaemon<S, N> {
    source: S,
    notifier: N,
    evaluator: ReminderEvaluator,
    clock: fn() -> NaiveDateTime,
}

impl<S: ScheduleSource, N: Notifier> ReminderDaemon<S, N> {
    pub fn new(source: S, notifier: N) -> Self {
        ReminderDaemon {
            source,
            notifier,
            evaluator: ReminderEvaluator::new(),
            clock: local_now,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> NaiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    pub fn evaluator(&self) -> &ReminderEvaluator {
        &self.evaluator
    }

    /// One tick: snapshot, evaluate, dispatch. Returns the notices delivered.
    ///
    /// A failed snapshot skips the tick. A failed dispatch is logged and
    /// stays fired.
    pub fn run_tick(&mut self, now: NaiveDateTime) -> usize {
        let db = match self.source.snapshot() {
            Ok(db) => db,
            Err(e) => {
                log::error!("Could not load schedule, skipping tick: {}", e);
                return 0;
            }
        };

        let targets = db.reminder_targets();
        let notices = self.evaluator.tick(now, &targets, &db.slots);

        let mut delivered = 0;
        for notice in &notices {
            match self.notifier.notify(notice) {
                Ok(()) => {
                    delivered += 1;
                    log::info!(
                        "[{}] Reminder sent: {} ({})",
                        now.format("%H:%M:%S"),
                        notice.title,
                        notice.key.lead
                    );
                }
                Err(e) => log::error!(
                    "[{}] Failed to send reminder '{}': {}",
                    now.format("%H:%M:%S"),
                    notice.title,
                    e
                ),
            }
        }
        delivered
    }

    /// Ticks every `interval` until a message arrives on `stop` or its
    /// sender is dropped. A tick that overruns delays the next one.
    pub fn run_until(&mut self, interval: Duration, stop: Receiver<()>) {
        loop {
            let started = Instant::now();
            let now = (self.clock)();
            self.run_tick(now);

            let elapsed = started.elapsed();
            if elapsed > interval {
                log::warn!("Reminder tick took {:?}, longer than {:?}", elapsed, interval);
            }

            match stop.recv_timeout(interval.saturating_sub(elapsed)) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::info!("Reminder daemon stopped");
    }
}

impl<S, N> ReminderDaemon<S, N>
where
    S: ScheduleSource + Send + 'static,
    N: Notifier + Send + 'static,
{
    /// Starts the loop on a dedicated thread.
    pub fn spawn(mut self, interval: Duration) -> DaemonHandle {
        let (stop_tx, stop_rx) = mpsc::channel();
        let join = thread::spawn(move || self.run_until(interval, stop_rx));
        DaemonHandle {
            stop: Some(stop_tx),
            join: Some(join),
        }
    }
}

/// Stops the daemon thread when told to, or when dropped.
pub struct DaemonHandle {
    stop: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl DaemonHandle {
    /// Returns once the loop has exited; no tick runs after this.
    pub fn stop(mut self) {
        self.shutdown();
    }

    /// Blocks for as long as the loop runs, which is until the process exits.
    pub fn wait(mut self) {
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("Reminder daemon thread panicked");
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("Reminder daemon thread panicked");
            }
        }
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
