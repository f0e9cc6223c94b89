//! Last-value-wins frame store and the streaming broadcaster

use crate::cancellation::CancellationToken;
use parking_lot::Mutex;
use sorter_core::{Frame, FrameTag, SorterEvent};
use sorter_eye::encode_frame;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Slots {
    raw: Option<Frame>,
    annotated: Option<Frame>,
}

/// Holds at most one raw and one annotated frame. Every operation is a
/// single short critical section; frames are reference-counted so readers
/// copy handles, never pixels.
#[derive(Debug, Default)]
pub struct FrameHub {
    slots: Mutex<Slots>,
}

impl FrameHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the frame stored under the frame's own tag.
    pub fn publish(&self, frame: Frame) {
        let mut slots = self.slots.lock();
        match frame.tag() {
            FrameTag::Raw => slots.raw = Some(frame),
            FrameTag::Annotated => slots.annotated = Some(frame),
        }
    }

    pub fn clear(&self, tag: FrameTag) {
        let mut slots = self.slots.lock();
        match tag {
            FrameTag::Raw => slots.raw = None,
            FrameTag::Annotated => slots.annotated = None,
        }
    }

    /// (raw, annotated) as one consistent pair
    pub fn snapshot(&self) -> (Option<Frame>, Option<Frame>) {
        let slots = self.slots.lock();
        (slots.raw.clone(), slots.annotated.clone())
    }

    /// Annotated frame if present, else raw
    pub fn preferred(&self) -> Option<Frame> {
        let (raw, annotated) = self.snapshot();
        annotated.or(raw)
    }
}

/// JPEG/base64 payload ready for observers
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    pub tag: FrameTag,
    pub data: String,
}

impl From<EncodedFrame> for SorterEvent {
    fn from(frame: EncodedFrame) -> Self {
        SorterEvent::frame(frame.tag, frame.data)
    }
}

/// Periodically encodes the preferred frame into a watch channel.
pub struct FrameBroadcaster {
    receiver: watch::Receiver<Option<EncodedFrame>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl FrameBroadcaster {
    pub fn spawn(
        hub: Arc<FrameHub>,
        interval: Duration,
        jpeg_quality: u8,
        shutdown: CancellationToken,
    ) -> Self {
        let (sender, receiver) = watch::channel(None);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut last: Option<Frame> = None;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let Some(frame) = hub.preferred() else {
                    continue;
                };
                if last.as_ref().is_some_and(|prev| prev.same_buffer(&frame)) {
                    continue;
                }

                let encoded = {
                    let frame = frame.clone();
                    tokio::task::spawn_blocking(move || encode_frame(&frame, jpeg_quality)).await
                };
                match encoded {
                    Ok(Ok(data)) => {
                        sender.send_replace(Some(EncodedFrame {
                            tag: frame.tag(),
                            data,
                        }));
                        last = Some(frame);
                    }
                    Ok(Err(e)) => warn!("Frame encoding failed: {}", e),
                    Err(e) => warn!("Frame encoding task failed: {}", e),
                }
            }
            debug!("Frame broadcaster stopped");
        });

        Self {
            receiver,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<EncodedFrame>> {
        self.receiver.clone()
    }

    /// Wait for the task to exit after its shutdown token fired.
    pub async fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Frame broadcaster panicked: {}", e);
            }
        }
    }
}
