//! Command handling against the cycle engine

use crate::cancellation::CancellationToken;
use crate::engine::{CycleEngine, RunExit};
use sorter_core::{ControlCommand, EngineState, NamedPosition, Result, SorterError, SorterEvent, StatusClass};
use sorter_hal::BackendProvider;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<RunExit>,
}

/// Translates commands into engine runs, cancellation and manual actuation.
///
/// Every command takes the same async lock, so a manual command can never
/// interleave with a start, and hardware has exactly one owner at a time.
/// Status queries read `running` instead, so they never wait behind a stop
/// that is draining an in-flight cycle.
pub struct ControlSurface {
    engine: Arc<CycleEngine>,
    provider: Arc<dyn BackendProvider>,
    slot: Mutex<Option<RunningLoop>>,
    running: Arc<AtomicBool>,
}

impl ControlSurface {
    pub fn new(engine: Arc<CycleEngine>, provider: Arc<dyn BackendProvider>) -> Self {
        Self {
            engine,
            provider,
            slot: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn engine(&self) -> &Arc<CycleEngine> {
        &self.engine
    }

    /// True from a successful start until the run task returns
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn handle(&self, command: ControlCommand) -> Result<()> {
        info!(action = command.action(), "Command received");
        let result = match command {
            ControlCommand::Start => self.start().await,
            ControlCommand::Stop => self.stop().await,
            ControlCommand::ManualConveyorNudge => self.manual_conveyor().await,
            ControlCommand::ManualArmHome => self.manual_arm_home().await,
            ControlCommand::Reset => self.reset().await,
        };
        if let Err(e) = &result {
            warn!(action = command.action(), "Command rejected: {}", e);
            self.engine
                .events()
                .log(format!("Command '{}' rejected: {}", command.action(), e));
        }
        result
    }

    async fn start(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        if self.engine.state() == EngineState::Faulted {
            return Err(SorterError::Faulted("reset required before start".to_string()));
        }
        if slot.as_ref().is_some_and(|running| !running.handle.is_finished()) {
            info!("Sorting loop already running");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let engine = self.engine.clone();
        let token = cancel.clone();
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(async move {
            let exit = engine.run(token).await;
            running.store(false, Ordering::SeqCst);
            exit
        });
        *slot = Some(RunningLoop { cancel, handle });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        let parked = match slot.take() {
            Some(running) => {
                running.cancel.cancel();
                match running.handle.await {
                    Ok(exit) => {
                        info!("Sorting loop exited: {:?}", exit);
                        exit.parked()
                    }
                    Err(e) => {
                        error!("Sorting loop task failed: {}", e);
                        false
                    }
                }
            }
            None => false,
        };

        let park_result = if parked {
            Ok(())
        } else {
            let hw = self.engine.hardware();
            self.engine.park(&*hw).await
        };

        let class = match self.engine.state() {
            EngineState::Faulted => StatusClass::Fault,
            _ => StatusClass::Stopped,
        };
        self.engine
            .events()
            .publish(SorterEvent::status(self.engine.state().to_string(), class));
        park_result
    }

    /// Manual actuation is only allowed with the engine idle and no loop.
    fn ensure_manual_allowed(&self, slot: &Option<RunningLoop>) -> Result<()> {
        let loop_alive = slot.as_ref().is_some_and(|running| !running.handle.is_finished());
        let state = self.engine.state();
        if loop_alive || state != EngineState::Idle {
            return Err(SorterError::Busy(format!(
                "manual commands need an idle engine (state {})",
                state
            )));
        }
        Ok(())
    }

    async fn manual_conveyor(&self) -> Result<()> {
        let slot = self.slot.lock().await;
        self.ensure_manual_allowed(&slot)?;

        let conveyor = &self.engine.config().conveyor;
        let (distance, speed) = (conveyor.nudge_distance, conveyor.nudge_speed);
        let limit = conveyor.motion_timeout(distance, speed);
        let hw = self.engine.hardware();
        tokio::time::timeout(limit, hw.move_conveyor(distance, speed))
            .await
            .map_err(|_| SorterError::timeout("move_conveyor", limit))??;
        self.engine.events().log("Conveyor moved manually");
        Ok(())
    }

    async fn manual_arm_home(&self) -> Result<()> {
        let slot = self.slot.lock().await;
        self.ensure_manual_allowed(&slot)?;

        let limit = self.engine.config().arm.move_timeout();
        let hw = self.engine.hardware();
        tokio::time::timeout(limit, hw.move_arm_to(NamedPosition::Home))
            .await
            .map_err(|_| SorterError::timeout("move_arm_to", limit))??;
        self.engine.events().log("Arm moved to home position");
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().is_some_and(|running| !running.handle.is_finished()) {
            return Err(SorterError::Busy("stop the sorting loop before reset".to_string()));
        }
        *slot = None;
        self.engine.reset(self.provider.as_ref()).await
    }

    /// Stop the loop and release the hardware.
    pub async fn shutdown(&self, cleanup_timeout: Duration) -> Result<()> {
        let stopped = self.stop().await;
        let hw = self.engine.hardware();
        match tokio::time::timeout(cleanup_timeout, hw.cleanup()).await {
            Ok(result) => result?,
            Err(_) => return Err(SorterError::timeout("cleanup", cleanup_timeout)),
        }
        info!("Hardware released");
        stopped
    }
}
