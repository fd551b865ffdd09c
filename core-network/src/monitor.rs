//! # Network State Machine
//!
//! ```text
//!            disconnect signal / failed probe
//!   ONLINE ──────────────────────────────────> OFFLINE
//!     ^                                         │   ^
//!     │ probe ok                reconnect due / │   │ probe failed,
//!     │                         manual trigger  v   │ next attempt scheduled
//!     └──────────────────────────────────── RECONNECTING
//! ```
//!
//! Probes never overlap: `check_now` and `reconnect` serialize on one lock,
//! and `check_now` skips the probe entirely when the last one finished inside
//! the debounce window. The failed-attempt counter only resets on reaching
//! ONLINE.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let monitor = Arc::new(NetworkMonitor::new(probe, event_bus, &config).with_signal(signal));
//! monitor.start()?;
//!
//! if monitor.state().is_online() { /* ... */ }
//!
//! monitor.shutdown().await;
//! ```

use bridge_traits::network::{ConnectivitySignal, NetworkChangeStream, NetworkInfo, NetworkStatus};
use core_runtime::events::{CoreEvent, EventBus, NetworkEvent, NetworkState};
use core_runtime::EngineConfig;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::backoff::ReconnectSchedule;
use crate::error::{NetworkError, Result};
use crate::probe::ReachabilityProbe;

struct Machine {
    state: NetworkState,
    schedule: ReconnectSchedule,
    last_probe_at: Option<Instant>,
}

enum Step {
    Stop,
    Reschedule,
    AttemptDue,
    Signal(Option<NetworkInfo>),
}

/// Connectivity state machine with debounced probing and scheduled reconnects.
pub struct NetworkMonitor {
    probe: Arc<dyn ReachabilityProbe>,
    signal: Option<Arc<dyn ConnectivitySignal>>,
    event_bus: EventBus,
    probe_timeout: Duration,
    debounce: Duration,
    machine: Mutex<Machine>,
    state_tx: watch::Sender<NetworkState>,
    probe_lock: tokio::sync::Mutex<()>,
    wake: Notify,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkMonitor {
    /// Create a monitor in the ONLINE state.
    pub fn new(probe: Arc<dyn ReachabilityProbe>, event_bus: EventBus, config: &EngineConfig) -> Self {
        let (state_tx, _) = watch::channel(NetworkState::Online);
        Self {
            probe,
            signal: None,
            event_bus,
            probe_timeout: config.probe_timeout(),
            debounce: config.probe_debounce(),
            machine: Mutex::new(Machine {
                state: NetworkState::Online,
                schedule: ReconnectSchedule::from_config(config),
                last_probe_at: None,
            }),
            state_tx,
            probe_lock: tokio::sync::Mutex::new(()),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
            driver: Mutex::new(None),
        }
    }

    /// Listen to the host's passive connectivity signal as well.
    pub fn with_signal(mut self, signal: Arc<dyn ConnectivitySignal>) -> Self {
        self.signal = Some(signal);
        self
    }

    fn machine(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock()
    }

    pub fn state(&self) -> NetworkState {
        self.machine().state
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    /// Failed reconnect attempts since the monitor was last ONLINE.
    pub fn attempts(&self) -> u32 {
        self.machine().schedule.attempts()
    }

    pub fn next_attempt_at(&self) -> Option<Instant> {
        self.machine().schedule.next_attempt_at()
    }

    /// Backoff delay the next failure would schedule.
    pub fn next_delay(&self) -> Duration {
        self.machine().schedule.next_delay()
    }

    /// Watch channel that always holds the current state.
    pub fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.state_tx.subscribe()
    }

    fn transition(&self, machine: &mut Machine, to: NetworkState) {
        let from = machine.state;
        if from == to {
            return;
        }
        machine.state = to;
        self.state_tx.send_replace(to);

        let attempts = machine.schedule.attempts();
        info!(%from, %to, attempts, "Network state changed");
        self.event_bus
            .emit(CoreEvent::Network(NetworkEvent::StateChanged { from, to, attempts }))
            .ok();
    }

    fn go_offline(&self, machine: &mut Machine) {
        self.transition(machine, NetworkState::Offline);
        let (attempt, delay) = machine.schedule.schedule_next(Instant::now());
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
        self.event_bus
            .emit(CoreEvent::Network(NetworkEvent::ReconnectScheduled {
                attempt,
                delay_ms: delay.as_millis() as u64,
            }))
            .ok();
        self.wake.notify_one();
    }

    async fn run_probe(&self) -> bool {
        let outcome = tokio::time::timeout(self.probe_timeout, self.probe.probe()).await;
        self.machine().last_probe_at = Some(Instant::now());
        match outcome {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(error = %e, "Reachability probe failed");
                false
            }
            Err(_) => {
                debug!(timeout_ms = self.probe_timeout.as_millis() as u64, "Reachability probe timed out");
                false
            }
        }
    }

    fn apply_probe(&self, reachable: bool) -> NetworkState {
        let mut machine = self.machine();
        if reachable {
            machine.schedule.reset();
            self.transition(&mut machine, NetworkState::Online);
        } else {
            self.go_offline(&mut machine);
        }
        machine.state
    }

    fn within_debounce(&self) -> bool {
        let machine = self.machine();
        machine
            .last_probe_at
            .is_some_and(|at| at.elapsed() < self.debounce)
    }

    /// Confirm the current state with a probe.
    ///
    /// Returns the current state untouched when a probe finished within the
    /// debounce window. From OFFLINE this counts as a reconnect attempt.
    #[instrument(skip(self))]
    pub async fn check_now(&self) -> NetworkState {
        let _probe = self.probe_lock.lock().await;
        if self.within_debounce() {
            return self.state();
        }
        self.attempt().await
    }

    /// Probe immediately, ignoring both the schedule and the debounce window.
    ///
    /// From ONLINE this re-confirms reachability and drops to OFFLINE on
    /// failure.
    #[instrument(skip(self))]
    pub async fn reconnect(&self) -> NetworkState {
        let _probe = self.probe_lock.lock().await;
        self.attempt().await
    }

    /// Probe and apply the result. Caller holds `probe_lock`.
    async fn attempt(&self) -> NetworkState {
        {
            let mut machine = self.machine();
            if machine.state != NetworkState::Online {
                machine.schedule.take_due();
                self.transition(&mut machine, NetworkState::Reconnecting);
            }
        }
        let reachable = self.run_probe().await;
        self.apply_probe(reachable)
    }

    /// Feed a passive connectivity report into the state machine.
    pub async fn handle_signal(&self, info: NetworkInfo) -> NetworkState {
        match info.status {
            NetworkStatus::Disconnected => {
                let mut machine = self.machine();
                if machine.state != NetworkState::Offline {
                    self.go_offline(&mut machine);
                }
                machine.state
            }
            NetworkStatus::Connected => {
                if self.is_online() {
                    self.state()
                } else {
                    self.check_now().await
                }
            }
            NetworkStatus::Indeterminate => self.state(),
        }
    }

    async fn attempt_if_due(&self) {
        let due = {
            let machine = self.machine();
            machine.state != NetworkState::Online && machine.schedule.is_due(Instant::now())
        };
        if due {
            self.reconnect().await;
        }
    }

    /// Spawn the driver task: an initial probe, the reconnect timer and the
    /// passive signal listener.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut driver = self.driver.lock();
        if driver.is_some() {
            return Err(NetworkError::AlreadyStarted);
        }
        let monitor = Arc::clone(self);
        *driver = Some(tokio::spawn(async move { monitor.run().await }));
        info!("Network monitor started");
        Ok(())
    }

    async fn run(self: Arc<Self>) {
        let mut changes: Option<Box<dyn NetworkChangeStream>> = match &self.signal {
            Some(signal) => match signal.subscribe_changes().await {
                Ok(stream) => Some(stream),
                Err(e) => {
                    warn!(error = %e, "Connectivity signal unavailable; relying on probes");
                    None
                }
            },
            None => None,
        };

        self.check_now().await;

        loop {
            let next = self.next_attempt_at();
            let step = tokio::select! {
                _ = self.cancel.cancelled() => Step::Stop,
                _ = self.wake.notified() => Step::Reschedule,
                _ = sleep_until_opt(next) => Step::AttemptDue,
                info = next_change(&mut changes) => Step::Signal(info),
            };

            match step {
                Step::Stop => break,
                Step::Reschedule => continue,
                Step::AttemptDue => self.attempt_if_due().await,
                Step::Signal(Some(info)) => {
                    debug!(status = ?info.status, "Connectivity signal changed");
                    self.handle_signal(info).await;
                }
                Step::Signal(None) => {
                    debug!("Connectivity signal stream ended");
                    changes = None;
                }
            }
        }
        debug!("Network monitor driver stopped");
    }

    /// Cancel the driver task and wait for it to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Network monitor driver ended abnormally");
            }
        }
        info!("Network monitor stopped");
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn next_change(changes: &mut Option<Box<dyn NetworkChangeStream>>) -> Option<NetworkInfo> {
    match changes {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
