use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::debug;
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::CaptureError;

pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// Tracks owned by the capture side. The session only attaches them.
#[derive(Clone)]
pub struct LocalStream {
    pub id: String,
    pub tracks: Vec<LocalTrack>,
    _pump: Option<Arc<Pump>>,
}

impl LocalStream {
    pub fn new(id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
            _pump: None,
        }
    }

    pub fn track_ids(&self) -> Vec<String> {
        self.tracks.iter().map(|t| t.id().to_owned()).collect()
    }
}

impl fmt::Debug for LocalStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStream")
            .field("id", &self.id)
            .field("tracks", &self.track_ids())
            .finish()
    }
}

/// Media-capture collaborator.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn local_stream(&self) -> Result<LocalStream, CaptureError>;
}

struct Pump(JoinHandle<()>);

impl Drop for Pump {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// Opus DTX silence frame.
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];
const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Capture provider that needs no hardware: one Opus audio track fed with
/// silence frames until the last clone of the stream is dropped.
#[derive(Debug, Clone)]
pub struct SilentCapture {
    stream_id: String,
}

impl SilentCapture {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
        }
    }
}

impl Default for SilentCapture {
    fn default() -> Self {
        Self::new("webrtc-pair")
    }
}

#[async_trait]
impl MediaCapture for SilentCapture {
    async fn local_stream(&self) -> Result<LocalStream, CaptureError> {
        let audio_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            "audio".to_owned(),
            self.stream_id.clone(),
        ));
        let writer = audio_track.clone();
        let pump = tokio::spawn(async move {
            let mut ticker = interval(FRAME_DURATION);
            loop {
                ticker.tick().await;
                let sample = Sample {
                    data: Bytes::from_static(&OPUS_SILENCE),
                    duration: FRAME_DURATION,
                    ..Default::default()
                };
                if let Err(e) = writer.write_sample(&sample).await {
                    debug!("Silence frame not written: {}", e);
                }
            }
        });

        Ok(LocalStream {
            id: self.stream_id.clone(),
            tracks: vec![audio_track as LocalTrack],
            _pump: Some(Arc::new(Pump(pump))),
        })
    }
}
