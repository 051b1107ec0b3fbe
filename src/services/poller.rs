use log::{error, info, warn};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::devices::{PowerMeter, PowerReading};
use crate::modbus::client::ModbusMasterTrait;
use crate::utils::error::ModbusError;

const EVENT_QUEUE_DEPTH: usize = 32;

type SharedMaster = Box<dyn ModbusMasterTrait + Send>;

#[derive(Debug, Clone)]
pub enum PollEvent {
    Reading(PowerReading),
    Failed {
        error: String,
        consecutive_failures: u32,
        /// Live values after the failure, zeroed once the meter is considered lost.
        latest: PowerReading,
    },
}

/// Polls the meter on a fixed interval. Each transaction runs on the blocking
/// pool so the receive loop never stalls the async runtime.
pub struct PollingService {
    meter: PowerMeter,
    master: SharedMaster,
    interval: Duration,
}

pub struct PollHandle {
    events: mpsc::Receiver<PollEvent>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<Result<PowerMeter, ModbusError>>>,
}

impl PollingService {
    pub fn new(meter: PowerMeter, master: SharedMaster, interval: Duration) -> Self {
        Self { meter, master, interval }
    }

    /// Spawns the polling task. Must be called from within a tokio runtime.
    pub fn start(self) -> PollHandle {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        info!("🚀 Starting meter polling every {:?}", self.interval);
        let worker = tokio::spawn(self.run(tx, shutdown_rx));

        PollHandle {
            events: rx,
            shutdown_tx: Some(shutdown_tx),
            worker: Some(worker),
        }
    }

    async fn run(
        self,
        tx: mpsc::Sender<PollEvent>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<PowerMeter, ModbusError> {
        let Self {
            mut meter,
            mut master,
            interval: period,
        } = self;

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // A dropped handle closes the channel, which also ends the loop
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    let (returned_meter, returned_master, event) =
                        tokio::task::spawn_blocking(move || {
                            let event = poll_once(&mut meter, master.as_mut());
                            (meter, master, event)
                        })
                        .await
                        .map_err(|e| {
                            error!("❌ Meter poll panicked: {}", e);
                            ModbusError::CommunicationError(format!("poll task failed: {}", e))
                        })?;
                    meter = returned_meter;
                    master = returned_master;

                    if tx.send(event).await.is_err() {
                        warn!("Poll event receiver dropped, stopping poller");
                        break;
                    }
                }
            }
        }

        info!("🛑 Meter polling stopped");
        Ok(meter)
    }
}

fn poll_once(meter: &mut PowerMeter, master: &mut dyn ModbusMasterTrait) -> PollEvent {
    match meter.poll(master) {
        Ok(reading) => PollEvent::Reading(reading),
        Err(e) => PollEvent::Failed {
            error: e.to_string(),
            consecutive_failures: meter.consecutive_failures(),
            latest: meter.latest().clone(),
        },
    }
}

impl PollHandle {
    pub async fn next_event(&mut self) -> Option<PollEvent> {
        self.events.recv().await
    }

    /// Stops the task and hands the meter back with its failure state.
    ///
    /// A poll already on the bus finishes first.
    pub async fn stop(mut self) -> Result<PowerMeter, ModbusError> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            // Full or closed both mean the task is already on its way out
            let _ = shutdown_tx.try_send(());
        }
        // Unblock a task waiting on a full queue
        self.events.close();

        match self.worker.take() {
            Some(worker) => worker.await.map_err(|e| {
                error!("❌ Meter poller failed: {}", e);
                ModbusError::CommunicationError(format!("poller task failed: {}", e))
            })?,
            None => Err(ModbusError::CommunicationError("poller already stopped".to_string())),
        }
    }
}
