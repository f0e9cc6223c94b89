//! Assembly of the engine, frame distribution and control surface

use crate::cancellation::CancellationToken;
use crate::control::ControlSurface;
use crate::engine::CycleEngine;
use crate::event_bus::EventBus;
use crate::frame_hub::{EncodedFrame, FrameBroadcaster, FrameHub};
use sorter_core::config::SorterConfig;
use sorter_core::{Result, SorterEvent};
use sorter_eye::VisionBackend;
use sorter_hal::{BackendProvider, SelectedBackend};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::info;

/// Handle bundling everything an outer transport needs
pub struct SortingLine {
    engine: Arc<CycleEngine>,
    control: Arc<ControlSurface>,
    broadcaster: FrameBroadcaster,
    shutdown: CancellationToken,
}

impl SortingLine {
    /// Select the hardware through `provider` and start the frame broadcaster.
    pub fn start(
        config: SorterConfig,
        provider: Arc<dyn BackendProvider>,
        vision: Arc<dyn VisionBackend>,
    ) -> Result<Self> {
        let selected = provider.select(&config)?;
        Ok(Self::with_backend(config, selected, provider, vision))
    }

    pub fn with_backend(
        config: SorterConfig,
        selected: SelectedBackend,
        provider: Arc<dyn BackendProvider>,
        vision: Arc<dyn VisionBackend>,
    ) -> Self {
        let config = Arc::new(config);
        if let Some(reason) = &selected.fallback_reason {
            info!("Using simulated hardware: {}", reason);
        }

        let frames = Arc::new(FrameHub::new());
        let events = EventBus::new(config.stream.event_buffer_size);
        let shutdown = CancellationToken::new();
        let broadcaster = FrameBroadcaster::spawn(
            frames.clone(),
            config.stream.interval(),
            config.stream.jpeg_quality,
            shutdown.clone(),
        );

        let engine = Arc::new(CycleEngine::new(
            config,
            selected,
            vision,
            frames,
            events,
        ));
        let control = Arc::new(ControlSurface::new(engine.clone(), provider));

        Self {
            engine,
            control,
            broadcaster,
            shutdown,
        }
    }

    pub fn engine(&self) -> &Arc<CycleEngine> {
        &self.engine
    }

    pub fn control(&self) -> &Arc<ControlSurface> {
        &self.control
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SorterEvent> {
        self.engine.events().subscribe()
    }

    pub fn subscribe_frames(&self) -> watch::Receiver<Option<EncodedFrame>> {
        self.broadcaster.subscribe()
    }

    /// Stop the loop, park and release the hardware, stop streaming.
    pub async fn shutdown(&self, cleanup_timeout: Duration) -> Result<()> {
        let result = self.control.shutdown(cleanup_timeout).await;
        self.shutdown.cancel();
        self.broadcaster.join().await;
        result
    }
}
