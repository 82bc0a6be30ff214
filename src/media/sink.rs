//! Video sink abstraction
//!
//! Rendering is outside this crate; a sink only receives the bound stream.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::types::RemoteTrack;

/// Destination for the single remote stream of a session
pub trait VideoSink: Send + Sync {
    /// Called once, with the first received track
    fn attach(&self, track: RemoteTrack);

    /// Called when the media link is released
    fn detach(&self);
}

/// Sink statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub stream_id: Option<String>,
    pub packets: u64,
    pub bytes: u64,
}

/// Sink that drains RTP from the bound track and counts what arrives
#[derive(Default)]
pub struct RtpStatsSink {
    stream_id: Mutex<Option<String>>,
    packets: Arc<AtomicU64>,
    bytes: Arc<AtomicU64>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl RtpStatsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            stream_id: self.stream_id.lock().clone(),
            packets: self.packets.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

impl VideoSink for RtpStatsSink {
    fn attach(&self, track: RemoteTrack) {
        info!(
            "Sink bound to stream {} ({} track {})",
            track.stream_id, track.kind, track.track_id
        );
        *self.stream_id.lock() = Some(track.stream_id.clone());

        let Some(rtp) = track.rtp else {
            return;
        };

        let packets = self.packets.clone();
        let bytes = self.bytes.clone();
        let handle = tokio::spawn(async move {
            loop {
                match rtp.read_rtp().await {
                    Ok((packet, _attributes)) => {
                        packets.fetch_add(1, Ordering::Relaxed);
                        bytes.fetch_add(packet.payload.len() as u64, Ordering::Relaxed);
                    }
                    Err(e) => {
                        debug!("RTP reader stopped: {}", e);
                        break;
                    }
                }
            }
        });

        if let Some(previous) = self.reader.lock().replace(handle) {
            previous.abort();
        }
    }

    fn detach(&self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        *self.stream_id.lock() = None;
    }
}

impl Drop for RtpStatsSink {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.get_mut().take() {
            handle.abort();
        }
    }
}
