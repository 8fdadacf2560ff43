//! Background driver running the generator on two independent cadences.
//!
//! Both timers live on one thread and are multiplexed with
//! `crossbeam_channel::select!`, so a tick on one cadence never waits for
//! the other. Each tick's events travel as a single [`TickBatch`]; shutdown
//! is only observed between ticks, so a partial batch is never emitted.

use crate::config::SimulationConfig;
use crate::telemetry::generator::SyntheticGenerator;
use crate::telemetry::types::FeatureEvent;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which timer produced a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// The driver's start-up announcement of every entity
    Initial,
    /// Mobile-unit tick
    Fast,
    /// Station tick
    Slow,
}

/// All events emitted by one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickBatch {
    pub cadence: Cadence,
    pub at: DateTime<Utc>,
    pub events: Vec<FeatureEvent>,
}

/// Driver settings.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub fast_tick: Duration,
    pub slow_tick: Duration,
    /// Number of batches that may queue before ticks are dropped
    pub queue_capacity: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            fast_tick: Duration::from_secs(1),
            slow_tick: Duration::from_secs(5),
            queue_capacity: 1_024,
        }
    }
}

impl From<&SimulationConfig> for DriverConfig {
    fn from(config: &SimulationConfig) -> Self {
        Self {
            fast_tick: config.fast_tick,
            slow_tick: config.slow_tick,
            ..Self::default()
        }
    }
}

/// Errors raised by the driver.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Driver is already running")]
    AlreadyRunning,
    #[error("Driver thread panicked")]
    ThreadPanicked,
}

/// Owns the generator and runs it on a background thread.
pub struct SimulationDriver {
    config: DriverConfig,
    generator: Option<SyntheticGenerator>,
    sender: Sender<TickBatch>,
    receiver: Receiver<TickBatch>,
    running: Arc<AtomicBool>,
    dropped_ticks: Arc<AtomicU64>,
    shutdown: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<SyntheticGenerator>>,
}

impl SimulationDriver {
    pub fn new(generator: SyntheticGenerator, config: DriverConfig) -> Self {
        let (sender, receiver) = bounded(config.queue_capacity);
        Self {
            config,
            generator: Some(generator),
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            dropped_ticks: Arc::new(AtomicU64::new(0)),
            shutdown: None,
            thread_handle: None,
        }
    }

    /// Start ticking in a background thread.
    ///
    /// The first batch on the channel is the [`Cadence::Initial`]
    /// announcement of every entity.
    pub fn start(&mut self) -> Result<(), DriverError> {
        let mut generator = match self.generator.take() {
            Some(generator) if !self.running.load(Ordering::SeqCst) => generator,
            other => {
                self.generator = other;
                return Err(DriverError::AlreadyRunning);
            }
        };

        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let sender = self.sender.clone();
        let running = self.running.clone();
        let dropped = self.dropped_ticks.clone();
        let fast = tick(self.config.fast_tick);
        let slow = tick(self.config.slow_tick);

        running.store(true, Ordering::SeqCst);
        info!(
            fast_ms = self.config.fast_tick.as_millis() as u64,
            slow_ms = self.config.slow_tick.as_millis() as u64,
            units = generator.units().len(),
            stations = generator.stations().len(),
            "Simulation driver started"
        );

        let handle = thread::spawn(move || {
            let now = Utc::now();
            let initial = TickBatch {
                cadence: Cadence::Initial,
                at: now,
                events: generator.initial_events(now),
            };
            publish(&sender, initial, &dropped);

            loop {
                select! {
                    recv(shutdown_rx) -> _ => break,
                    recv(fast) -> _ => {
                        let at = Utc::now();
                        let events = generator.tick_units(at);
                        if !events.is_empty() {
                            let batch = TickBatch { cadence: Cadence::Fast, at, events };
                            publish(&sender, batch, &dropped);
                        }
                    }
                    recv(slow) -> _ => {
                        let at = Utc::now();
                        let events = generator.tick_stations(at);
                        if !events.is_empty() {
                            let batch = TickBatch { cadence: Cadence::Slow, at, events };
                            publish(&sender, batch, &dropped);
                        }
                    }
                }
            }

            running.store(false, Ordering::SeqCst);
            debug!("Simulation driver loop exited");
            generator
        });

        self.shutdown = Some(shutdown_tx);
        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop ticking. Pending ticks are cancelled; the generator is kept so
    /// the driver can be restarted where it left off.
    pub fn stop(&mut self) -> Result<(), DriverError> {
        // Dropping the sender disconnects the shutdown channel.
        self.shutdown.take();
        if let Some(handle) = self.thread_handle.take() {
            let generator = handle.join().map_err(|_| DriverError::ThreadPanicked)?;
            self.generator = Some(generator);
            info!("Simulation driver stopped");
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the receiver for tick batches.
    pub fn receiver(&self) -> &Receiver<TickBatch> {
        &self.receiver
    }

    /// Try to receive a batch without blocking.
    pub fn try_recv(&self) -> Option<TickBatch> {
        self.receiver.try_recv().ok()
    }

    /// Number of ticks dropped because the queue was full.
    pub fn dropped_ticks(&self) -> u64 {
        self.dropped_ticks.load(Ordering::Relaxed)
    }

    /// The generator, when the driver is stopped.
    pub fn generator(&self) -> Option<&SyntheticGenerator> {
        self.generator.as_ref()
    }
}

impl Drop for SimulationDriver {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Simulation driver did not stop cleanly: {e}");
        }
    }
}

/// Send a batch without blocking the timers. A full queue drops the whole
/// tick; a tick failure never stops the driver.
fn publish(sender: &Sender<TickBatch>, batch: TickBatch, dropped: &AtomicU64) {
    let cadence = batch.cadence;
    match sender.try_send(batch) {
        Ok(()) => {}
        Err(TrySendError::Full(batch)) => {
            dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                ?cadence,
                events = batch.events.len(),
                "Tick queue full, dropping tick"
            );
        }
        Err(TrySendError::Disconnected(_)) => {
            dropped.fetch_add(1, Ordering::Relaxed);
            debug!(?cadence, "Tick receiver gone, dropping tick");
        }
    }
}
