//! Cycle engine: drives one sort cycle at a time
//!
//! ```text
//! Idle -> WaitingForTrigger -> Settling -> Capturing -> Inferring -> Deciding
//!      -> Transporting -> Sorting -> Returning -> (WaitingForTrigger | Idle)
//! ```
//! plus the absorbing `Faulted` state.
//!
//! Stop is honored while polling the sensor, right after the debounce, and on
//! entry to Capturing, Inferring, Deciding and Transporting. Once the conveyor
//! has been commanded the physical sub-sequence runs to completion (or fault)
//! and the stop is honored at Returning. Parking after a stop (conveyor off,
//! arm home) happens in Returning, so no actuator is ever commanded while
//! waiting for a trigger or settling.

use crate::cancellation::CancellationToken;
use crate::event_bus::EventBus;
use crate::frame_hub::FrameHub;
use parking_lot::RwLock;
use serde::Serialize;
use sorter_core::config::SorterConfig;
use sorter_core::{
    CycleOutcome, Detection, EngineState, Frame, FrameTag, GripperState, HardwareCapabilities,
    NamedPosition, Result, SorterError, SorterEvent, StatusClass, Verdict,
};
use sorter_eye::{annotate, VisionBackend};
use sorter_hal::{BackendProvider, HardwareBackend, SelectedBackend};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// How a run of the loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunExit {
    /// Cancellation honored; the conveyor was stopped and the arm homed.
    Stopped,
    /// The loop faulted. `parked` is true when the final safety action was
    /// already issued by the engine.
    Faulted { reason: String, parked: bool },
}

impl RunExit {
    pub fn parked(&self) -> bool {
        match self {
            RunExit::Stopped => true,
            RunExit::Faulted { parked, .. } => *parked,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    pass: AtomicU64,
    defect: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub total: u64,
    pub pass: u64,
    pub defect: u64,
}

/// Result of one pass through the state machine
enum CycleEnd {
    Completed,
    /// Capture failed; nothing was actuated
    Abandoned,
    Cancelled,
    Fault(SorterError),
}

/// One arm action of the sort sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmStep {
    Move(NamedPosition),
    Grip(GripperState),
}

/// Approach, open, lower, grip, lift, carry to `place`, release, go home.
pub fn sort_sequence(place: NamedPosition) -> [ArmStep; 8] {
    use ArmStep::{Grip, Move};
    [
        Move(NamedPosition::PickupApproach),
        Grip(GripperState::Open),
        Move(NamedPosition::Pickup),
        Grip(GripperState::Closed),
        Move(NamedPosition::PickupApproach),
        Move(place),
        Grip(GripperState::Open),
        Move(NamedPosition::Home),
    ]
}

/// Bound a hardware call with a timeout
async fn bounded<T, F>(operation: &str, limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(SorterError::timeout(operation, limit)),
    }
}

pub struct CycleEngine {
    config: Arc<SorterConfig>,
    hardware: RwLock<SelectedBackend>,
    vision: Arc<dyn VisionBackend>,
    frames: Arc<FrameHub>,
    events: EventBus,
    state: watch::Sender<EngineState>,
    counters: Counters,
    cycles: AtomicU64,
}

impl CycleEngine {
    pub fn new(
        config: Arc<SorterConfig>,
        hardware: SelectedBackend,
        vision: Arc<dyn VisionBackend>,
        frames: Arc<FrameHub>,
        events: EventBus,
    ) -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        Self {
            config,
            hardware: RwLock::new(hardware),
            vision,
            frames,
            events,
            state,
            counters: Counters::default(),
            cycles: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    pub fn hardware(&self) -> Arc<dyn HardwareBackend> {
        self.hardware.read().backend.clone()
    }

    pub fn capabilities(&self) -> HardwareCapabilities {
        self.hardware.read().capabilities
    }

    pub fn config(&self) -> &SorterConfig {
        &self.config
    }

    pub fn frames(&self) -> &Arc<FrameHub> {
        &self.frames
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn counters(&self) -> CounterSnapshot {
        CounterSnapshot {
            total: self.counters.total.load(Ordering::Relaxed),
            pass: self.counters.pass.load(Ordering::Relaxed),
            defect: self.counters.defect.load(Ordering::Relaxed),
        }
    }

    fn set_state(&self, state: EngineState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("{} -> {}", previous, state);
        }
    }

    fn emit_status(&self, class: StatusClass) {
        self.events
            .publish(SorterEvent::status(self.state().to_string(), class));
    }

    /// Run cycles until cancelled or faulted. The caller guarantees only one
    /// run exists at a time.
    pub async fn run(&self, cancel: CancellationToken) -> RunExit {
        if self.state() == EngineState::Faulted {
            return RunExit::Faulted {
                reason: "engine is faulted".to_string(),
                parked: false,
            };
        }

        let hardware = self.hardware();
        self.set_state(EngineState::WaitingForTrigger);
        self.emit_status(StatusClass::Running);
        info!("Sorting loop started ({} hardware)", hardware.capabilities());
        self.events.log("Sorting loop started");

        loop {
            if cancel.is_cancelled() {
                return self.finish_stopped(&*hardware).await;
            }

            let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
            let end = self
                .run_cycle(&*hardware, &cancel)
                .instrument(info_span!("cycle", cycle))
                .await;

            match end {
                CycleEnd::Completed | CycleEnd::Abandoned => {}
                CycleEnd::Cancelled => return self.finish_stopped(&*hardware).await,
                CycleEnd::Fault(err) => return self.fault(err, false),
            }
        }
    }

    async fn run_cycle(&self, hw: &dyn HardwareBackend, cancel: &CancellationToken) -> CycleEnd {
        let cycle = &self.config.cycle;

        // WaitingForTrigger
        self.set_state(EngineState::WaitingForTrigger);
        loop {
            if cancel.is_cancelled() {
                return CycleEnd::Cancelled;
            }
            match bounded("read_sensor", cycle.sensor_timeout(), hw.read_sensor()).await {
                Ok(true) => break,
                Ok(false) => {}
                Err(e @ SorterError::Timeout { .. }) => return CycleEnd::Fault(e),
                Err(e) => {
                    warn!("Sensor read failed: {}", e);
                    self.events.log(format!("Sensor read error: {}", e));
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return CycleEnd::Cancelled,
                _ = tokio::time::sleep(cycle.poll_interval()) => {}
            }
        }
        info!("Object detected");
        self.events.log("Object detected");

        // Settling
        self.set_state(EngineState::Settling);
        tokio::time::sleep(cycle.debounce()).await;
        if cancel.is_cancelled() {
            return CycleEnd::Cancelled;
        }

        // Capturing
        self.set_state(EngineState::Capturing);
        let frame = match bounded("capture_image", cycle.capture_timeout(), hw.capture_image()).await {
            Ok(frame) => frame,
            Err(e @ SorterError::Timeout { .. }) => return CycleEnd::Fault(e),
            Err(e) => {
                error!("Capture failed: {}", e);
                self.events.log(format!("Capture failed: {}", e));
                tokio::time::sleep(cycle.capture_cooldown()).await;
                return CycleEnd::Abandoned;
            }
        };
        self.frames.publish(frame.clone());

        // Inferring
        if cancel.is_cancelled() {
            return CycleEnd::Cancelled;
        }
        self.set_state(EngineState::Inferring);
        let detections = self.infer(&frame).await;

        // Deciding
        if cancel.is_cancelled() {
            return CycleEnd::Cancelled;
        }
        self.set_state(EngineState::Deciding);
        let outcome = CycleOutcome::from_detections(&detections);
        self.frames.publish(annotate(&frame, &detections));
        info!(verdict = %outcome.verdict, labels = %outcome.labels_text(), "Inspection result");
        self.events.publish(SorterEvent::detection(&outcome));

        // Transporting
        if cancel.is_cancelled() {
            return CycleEnd::Cancelled;
        }
        self.set_state(EngineState::Transporting);
        let conveyor = &self.config.conveyor;
        let (distance, speed) = (conveyor.pickup_distance, conveyor.pickup_speed);
        if let Err(e) = bounded(
            "move_conveyor",
            conveyor.motion_timeout(distance, speed),
            hw.move_conveyor(distance, speed),
        )
        .await
        {
            return CycleEnd::Fault(e);
        }

        // Sorting
        self.set_state(EngineState::Sorting);
        let place = self.config.sorting.place_position(&outcome);
        let limit = self.config.arm.move_timeout();
        for step in sort_sequence(place) {
            let done = match step {
                ArmStep::Move(position) => bounded("move_arm_to", limit, hw.move_arm_to(position)).await,
                ArmStep::Grip(state) => bounded("set_gripper", limit, hw.set_gripper(state)).await,
            };
            if let Err(e) = done {
                return CycleEnd::Fault(e);
            }
        }
        self.frames.clear(FrameTag::Annotated);
        let narration = match outcome.verdict {
            Verdict::Pass => format!("Unit passed, placed at {}", place),
            Verdict::Defect => format!(
                "Defective unit ({}), placed at {}",
                outcome.labels_text(),
                place
            ),
        };
        info!("{}", narration);
        self.events.log(narration);

        // Returning
        self.set_state(EngineState::Returning);
        self.record(outcome.verdict);
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(cycle.inter_cycle_delay()) => {}
        }
        CycleEnd::Completed
    }

    /// Fail-open: an unusable vision answer counts as zero detections.
    async fn infer(&self, frame: &Frame) -> Vec<Detection> {
        let limit = self.config.cycle.inference_timeout();
        match tokio::time::timeout(limit, self.vision.detect(frame)).await {
            Ok(Ok(detections)) => detections,
            Ok(Err(e)) => {
                warn!("Inference unavailable, treating as no detections: {}", e);
                self.events
                    .log(format!("Inference unavailable ({}), treating as no detections", e));
                Vec::new()
            }
            Err(_) => {
                warn!("Inference timed out after {:?}, treating as no detections", limit);
                self.events
                    .log("Inference timed out, treating as no detections");
                Vec::new()
            }
        }
    }

    fn record(&self, verdict: Verdict) {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        match verdict {
            Verdict::Pass => self.counters.pass.fetch_add(1, Ordering::Relaxed),
            Verdict::Defect => self.counters.defect.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Stop the conveyor and home the arm, each bounded by its timeout.
    pub async fn park(&self, hw: &dyn HardwareBackend) -> Result<()> {
        let margin = Duration::from_millis(self.config.conveyor.timeout_margin_ms);
        bounded("stop_conveyor", margin, hw.stop_conveyor()).await?;
        bounded(
            "move_arm_to",
            self.config.arm.move_timeout(),
            hw.move_arm_to(NamedPosition::Home),
        )
        .await
    }

    async fn finish_stopped(&self, hw: &dyn HardwareBackend) -> RunExit {
        info!("Stop requested, parking hardware");
        self.set_state(EngineState::Returning);
        match self.park(hw).await {
            Ok(()) => {
                self.set_state(EngineState::Idle);
                self.events.log("Sorting loop stopped");
                RunExit::Stopped
            }
            Err(e) => self.fault(e, true),
        }
    }

    fn fault(&self, err: SorterError, parked: bool) -> RunExit {
        error!(kind = err.kind(), "Engine faulted: {}", err);
        self.set_state(EngineState::Faulted);
        self.events.log(format!("Fault: {}", err));
        self.emit_status(StatusClass::Fault);
        RunExit::Faulted {
            reason: err.to_string(),
            parked,
        }
    }

    /// Release the current backend, select a new one and return to `Idle`.
    /// Only valid while no run is in progress.
    pub async fn reset(&self, provider: &dyn BackendProvider) -> Result<()> {
        let previous = self.hardware();
        if let Err(e) = bounded(
            "cleanup",
            self.config.arm.move_timeout(),
            previous.cleanup(),
        )
        .await
        {
            warn!("Cleanup before reset failed: {}", e);
        }

        let selected = provider.select(&self.config)?;
        if let Some(reason) = &selected.fallback_reason {
            self.events
                .log(format!("Real hardware unavailable, using simulation: {}", reason));
        }
        info!("Reset complete ({} hardware)", selected.capabilities);
        *self.hardware.write() = selected;

        self.frames.clear(FrameTag::Annotated);
        self.set_state(EngineState::Idle);
        self.emit_status(StatusClass::Idle);
        Ok(())
    }
}
