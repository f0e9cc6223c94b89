//! Scripted hardware and vision doubles shared by the engine tests

#![allow(dead_code)]

use async_trait::async_trait;
use image::RgbImage;
use parking_lot::Mutex;
use sorter_core::config::SorterConfig;
use sorter_core::{
    BoundingBox, Detection, EngineState, Frame, GripperState, HardwareCapabilities, NamedPosition,
    Result, SorterError, SorterEvent,
};
use sorter_engine::{ControlSurface, CycleEngine, EventBus, FrameHub};
use sorter_eye::VisionBackend;
use sorter_hal::{BackendProvider, HardwareBackend, SelectedBackend};
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    ReadSensor,
    Capture,
    MoveConveyor { distance: f64, speed: f64 },
    ConveyorDone,
    StopConveyor,
    MoveArm(NamedPosition),
    Grip(GripperState),
    Cleanup,
}

impl Op {
    pub fn is_actuation(&self) -> bool {
        matches!(
            self,
            Op::MoveConveyor { .. } | Op::StopConveyor | Op::MoveArm(_) | Op::Grip(_)
        )
    }
}

/// One recorded backend call with the engine state and the presence of an
/// annotated frame at the moment of the call
#[derive(Debug, Clone)]
pub struct Call {
    pub op: Op,
    pub state: EngineState,
    pub annotated: bool,
}

#[derive(Default)]
pub struct Script {
    /// Sensor readings served first
    pub sensor: VecDeque<Result<bool>>,
    /// After the script: alternate false/true instead of always false
    pub toggle: bool,
    pub next_toggle: bool,
    pub capture_failures: u32,
    pub conveyor_delay: Duration,
    pub arm_delay: Duration,
    pub failing_position: Option<NamedPosition>,
}

#[derive(Default)]
pub struct ScriptedBackend {
    pub script: Mutex<Script>,
    calls: Mutex<Vec<Call>>,
    observer: OnceLock<(watch::Receiver<EngineState>, Arc<FrameHub>)>,
}

impl ScriptedBackend {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            ..Self::default()
        })
    }

    pub fn attach(&self, engine: &CycleEngine) {
        let _ = self
            .observer
            .set((engine.subscribe_state(), engine.frames().clone()));
    }

    fn record(&self, op: Op) {
        let (state, annotated) = match self.observer.get() {
            Some((state, frames)) => (*state.borrow(), frames.snapshot().1.is_some()),
            None => (EngineState::Idle, false),
        };
        self.calls.lock().push(Call { op, state, annotated });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.calls.lock().iter().map(|c| c.op.clone()).collect()
    }

    pub fn count(&self, pred: impl Fn(&Op) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(&c.op)).count()
    }
}

#[async_trait]
impl HardwareBackend for ScriptedBackend {
    fn capabilities(&self) -> HardwareCapabilities {
        HardwareCapabilities::Simulated
    }

    async fn read_sensor(&self) -> Result<bool> {
        self.record(Op::ReadSensor);
        let mut script = self.script.lock();
        if let Some(reading) = script.sensor.pop_front() {
            return reading;
        }
        if script.toggle {
            let value = script.next_toggle;
            script.next_toggle = !value;
            return Ok(value);
        }
        Ok(false)
    }

    async fn capture_image(&self) -> Result<Frame> {
        self.record(Op::Capture);
        let mut script = self.script.lock();
        if script.capture_failures > 0 {
            script.capture_failures -= 1;
            return Err(SorterError::CaptureFailed("lens cap on".to_string()));
        }
        Ok(Frame::raw(RgbImage::new(16, 12)))
    }

    async fn move_conveyor(&self, distance: f64, speed: f64) -> Result<()> {
        self.record(Op::MoveConveyor { distance, speed });
        let delay = self.script.lock().conveyor_delay;
        tokio::time::sleep(delay).await;
        self.record(Op::ConveyorDone);
        Ok(())
    }

    async fn stop_conveyor(&self) -> Result<()> {
        self.record(Op::StopConveyor);
        Ok(())
    }

    async fn move_arm_to(&self, position: NamedPosition) -> Result<()> {
        self.record(Op::MoveArm(position));
        let (delay, failing) = {
            let script = self.script.lock();
            (script.arm_delay, script.failing_position)
        };
        tokio::time::sleep(delay).await;
        if failing == Some(position) {
            return Err(SorterError::ActuationFailed(format!("servo stalled at {}", position)));
        }
        Ok(())
    }

    async fn set_gripper(&self, state: GripperState) -> Result<()> {
        self.record(Op::Grip(state));
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        self.record(Op::Cleanup);
        Ok(())
    }
}

/// Vision double serving queued answers, then "nothing found"
#[derive(Default)]
pub struct ScriptedVision {
    responses: Mutex<VecDeque<Result<Vec<Detection>>>>,
}

impl ScriptedVision {
    pub fn new(responses: Vec<Result<Vec<Detection>>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
        })
    }
}

#[async_trait]
impl VisionBackend for ScriptedVision {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>> {
        self.responses.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Backend calls of a complete sort sequence placing at `place`
pub fn sort_ops(place: NamedPosition) -> Vec<Op> {
    vec![
        Op::MoveArm(NamedPosition::PickupApproach),
        Op::Grip(GripperState::Open),
        Op::MoveArm(NamedPosition::Pickup),
        Op::Grip(GripperState::Closed),
        Op::MoveArm(NamedPosition::PickupApproach),
        Op::MoveArm(place),
        Op::Grip(GripperState::Open),
        Op::MoveArm(NamedPosition::Home),
    ]
}

pub fn defect(label: &str) -> Detection {
    Detection::new(label, 0.87, BoundingBox::new(2, 2, 10, 8).unwrap()).unwrap()
}

pub struct Rig {
    pub backend: Arc<ScriptedBackend>,
    pub engine: Arc<CycleEngine>,
    pub control: Arc<ControlSurface>,
    pub events: broadcast::Receiver<SorterEvent>,
    pub state: watch::Receiver<EngineState>,
}

pub fn rig(config: SorterConfig, script: Script, vision: Arc<dyn VisionBackend>) -> Rig {
    let backend = ScriptedBackend::new(script);
    let selected = SelectedBackend::new(backend.clone());
    let events = EventBus::new(256);
    let engine = Arc::new(CycleEngine::new(
        Arc::new(config),
        selected,
        vision,
        Arc::new(FrameHub::new()),
        events.clone(),
    ));
    backend.attach(&engine);

    let provider_backend = backend.clone();
    let provider: Arc<dyn BackendProvider> =
        Arc::new(move |_: &SorterConfig| -> Result<SelectedBackend> {
            Ok(SelectedBackend::new(provider_backend.clone()))
        });

    let control = Arc::new(ControlSurface::new(engine.clone(), provider));
    Rig {
        backend,
        state: engine.subscribe_state(),
        events: events.subscribe(),
        engine,
        control,
    }
}

/// Drain every event received so far
pub fn drain(events: &mut broadcast::Receiver<SorterEvent>) -> Vec<SorterEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Poll `cond` on a 10ms cadence (virtual time in paused tests).
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

pub async fn wait_for_state(state: &mut watch::Receiver<EngineState>, target: EngineState) {
    tokio::time::timeout(Duration::from_secs(600), state.wait_for(|s| *s == target))
        .await
        .expect("state not reached")
        .expect("engine dropped");
}
