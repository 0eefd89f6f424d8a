//! Poll scheduling
//!
//! [`PollScheduler`] drives the request/response loop: send the active
//! definition's request frame, decode the reply, publish the sample, wait the
//! poll interval, repeat. A transport failure ends the loop; nothing retries
//! automatically.
//!
//! Engine state (counters, latest sample, session log, recent diagnostics)
//! lives in one shared struct. The loop is its only writer; readers go through
//! a cloneable [`PollHandle`].

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::datalog::SessionLogger;
use crate::decode::{decode, TelemetrySample};
use crate::definition::Definition;
use crate::protocol::{Connection, TransportError};

/// Default pause between polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(120);

/// Number of diagnostic messages kept
const DIAGNOSTIC_CAPACITY: usize = 20;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Pause after each completed exchange
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollState {
    /// Not polling
    Idle,
    /// Loop running
    Polling,
}

/// How a call to [`PollScheduler::start`] ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing to do: no open connection, no active definition, or already polling
    NotStarted,
    /// Stopped on request
    Stopped,
    /// An exchange failed; polling must be restarted by hand
    Failed(TransportError),
}

/// Exchange counters
#[derive(Debug, Default)]
pub struct LinkStats {
    tx: AtomicU64,
    rx: AtomicU64,
}

impl LinkStats {
    /// Requests that completed an exchange
    pub fn tx(&self) -> u64 {
        self.tx.load(Ordering::Acquire)
    }

    /// Responses decoded and published
    pub fn rx(&self) -> u64 {
        self.rx.load(Ordering::Acquire)
    }

    /// (tx, rx)
    pub fn snapshot(&self) -> (u64, u64) {
        (self.tx(), self.rx())
    }

    /// Zero both counters. Called when a run starts.
    pub fn reset(&self) {
        self.tx.store(0, Ordering::Release);
        self.rx.store(0, Ordering::Release);
    }
}

struct EngineState {
    /// Id of the running loop, 0 when idle
    current_run: AtomicU64,
    next_run: AtomicU64,
    stats: LinkStats,
    latest: watch::Sender<Option<Arc<TelemetrySample>>>,
    logger: Mutex<SessionLogger>,
    diagnostics: Mutex<VecDeque<String>>,
}

impl EngineState {
    fn new() -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            current_run: AtomicU64::new(0),
            next_run: AtomicU64::new(1),
            stats: LinkStats::default(),
            latest,
            logger: Mutex::new(SessionLogger::new()),
            diagnostics: Mutex::new(VecDeque::with_capacity(DIAGNOSTIC_CAPACITY)),
        }
    }

    fn is_current(&self, run: u64) -> bool {
        self.current_run.load(Ordering::Acquire) == run
    }

    fn logger(&self) -> MutexGuard<'_, SessionLogger> {
        self.logger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn note(&self, message: String) {
        let mut diagnostics = self
            .diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        diagnostics.push_front(message);
        diagnostics.truncate(DIAGNOSTIC_CAPACITY);
    }
}

/// Cloneable control and observation surface of a scheduler
#[derive(Clone)]
pub struct PollHandle {
    state: Arc<EngineState>,
}

impl PollHandle {
    /// Request the loop to stop. The exchange in flight, if any, completes first.
    pub fn stop(&self) {
        let previous = self.state.current_run.swap(0, Ordering::AcqRel);
        if previous != 0 {
            info!("polling stop requested");
            self.state.note("Polling stopped.".to_string());
        }
    }

    /// Current state
    pub fn state(&self) -> PollState {
        if self.is_polling() {
            PollState::Polling
        } else {
            PollState::Idle
        }
    }

    /// Whether a loop is running and has not been asked to stop
    pub fn is_polling(&self) -> bool {
        self.state.current_run.load(Ordering::Acquire) != 0
    }

    /// Exchange counters
    pub fn stats(&self) -> &LinkStats {
        &self.state.stats
    }

    /// Watch published samples
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<TelemetrySample>>> {
        self.state.latest.subscribe()
    }

    /// Most recently published sample
    pub fn latest(&self) -> Option<Arc<TelemetrySample>> {
        self.state.latest.borrow().clone()
    }

    /// Session logger. Do not hold the guard across an await.
    pub fn logger(&self) -> MutexGuard<'_, SessionLogger> {
        self.state.logger()
    }

    /// Recent diagnostic messages, newest first
    pub fn diagnostics(&self) -> Vec<String> {
        self.state
            .diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

/// Request/response poll loop
#[derive(Clone)]
pub struct PollScheduler {
    config: PollConfig,
    state: Arc<EngineState>,
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new(PollConfig::default())
    }
}

impl PollScheduler {
    /// Create an idle scheduler
    pub fn new(config: PollConfig) -> Self {
        Self {
            config,
            state: Arc::new(EngineState::new()),
        }
    }

    /// Control handle sharing this scheduler's state
    pub fn handle(&self) -> PollHandle {
        PollHandle {
            state: self.state.clone(),
        }
    }

    /// Scheduler configuration
    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Poll until stopped or until an exchange fails.
    ///
    /// Returns [`PollOutcome::NotStarted`] right away when `connection` is not
    /// open, `definition` is `None`, or another loop is running.
    pub async fn start(
        &self,
        connection: &mut Connection,
        definition: Option<&Definition>,
    ) -> PollOutcome {
        let Some(definition) = definition else {
            debug!("start ignored: no active definition");
            return PollOutcome::NotStarted;
        };
        if !connection.is_open() {
            debug!("start ignored: not connected");
            return PollOutcome::NotStarted;
        }

        let run = self.state.next_run.fetch_add(1, Ordering::AcqRel);
        if self
            .state
            .current_run
            .compare_exchange(0, run, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("start ignored: already polling");
            return PollOutcome::NotStarted;
        }

        // Counters describe the current run only
        self.state.stats.reset();
        info!(definition = %definition.name, interval_ms = self.config.interval.as_millis() as u64, "polling started");
        self.state.note(format!("Polling {}.", definition.name));

        loop {
            if !self.state.is_current(run) {
                info!("polling stopped");
                return PollOutcome::Stopped;
            }

            let packet = match connection.exchange(&definition.request_command) {
                Ok(packet) => packet,
                Err(e) => {
                    error!("exchange failed: {e}");
                    self.state.note(e.to_string());
                    // Only clear the run if a stop or restart has not already cleared or replaced it
                    let _ = self.state.current_run.compare_exchange(
                        run,
                        0,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    return PollOutcome::Failed(e);
                }
            };
            self.state.stats.tx.fetch_add(1, Ordering::AcqRel);

            let sample = Arc::new(decode(definition, &packet));
            debug!(bytes = packet.len(), fields = sample.len(), "packet decoded");
            self.state.latest.send_replace(Some(sample.clone()));
            self.state.logger().record(sample);
            self.state.stats.rx.fetch_add(1, Ordering::AcqRel);

            tokio::time::sleep(self.config.interval).await;
        }
    }

    /// Run [`start`](Self::start) on a tokio task that owns the connection.
    ///
    /// The task hands the connection back together with the outcome.
    pub fn spawn(
        &self,
        mut connection: Connection,
        definition: Definition,
    ) -> JoinHandle<(Connection, PollOutcome)> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let outcome = scheduler.start(&mut connection, Some(&definition)).await;
            (connection, outcome)
        })
    }
}
