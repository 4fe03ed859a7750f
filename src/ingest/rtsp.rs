//! RTSP frame source for IP cameras.
//!
//! Real RTSP decode uses GStreamer behind the `rtsp-gstreamer` feature.
//! `stub://` URLs fall back to the synthetic source so configurations can be
//! exercised without cameras or the GStreamer stack.

#[cfg(feature = "rtsp-gstreamer")]
use anyhow::Context;
use anyhow::Result;
#[cfg(feature = "rtsp-gstreamer")]
use std::time::{Duration, SystemTime};

use crate::frame::Frame;
use crate::ingest::{ConnectionStatus, FrameSource, StubSource};

#[derive(Clone, Debug)]
pub struct RtspConfig {
    /// e.g. "rtsp://192.168.1.100:554/stream"
    pub url: String,
    /// Decode-side frame rate target; the source decimates to this rate.
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            url: "rtsp://localhost:554/stream".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

pub struct RtspSource {
    backend: RtspBackend,
}

enum RtspBackend {
    Synthetic(StubSource),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerRtspSource),
}

impl RtspSource {
    pub fn new(config: RtspConfig) -> Result<Self> {
        if config.url.starts_with("stub://") {
            Ok(Self {
                backend: RtspBackend::Synthetic(StubSource::new(config.width, config.height)),
            })
        } else {
            #[cfg(feature = "rtsp-gstreamer")]
            {
                Ok(Self {
                    backend: RtspBackend::Gstreamer(GstreamerRtspSource::new(config)?),
                })
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            {
                anyhow::bail!("RTSP URLs require the rtsp-gstreamer feature")
            }
        }
    }
}

impl FrameSource for RtspSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.next_frame(),
        }
    }

    fn disconnect(&mut self) {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.disconnect(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.disconnect(),
        }
    }

    fn status(&self) -> ConnectionStatus {
        match &self.backend {
            RtspBackend::Synthetic(source) => source.status(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.status(),
        }
    }
}

// ----------------------------------------------------------------------------
// GStreamer backend
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerRtspSource {
    config: RtspConfig,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    status: ConnectionStatus,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerRtspSource {
    fn new(config: RtspConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline_description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            config.url
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok(Self {
            config,
            pipeline,
            appsink,
            status: ConnectionStatus::Disconnected,
        })
    }

    fn connect(&mut self) -> Result<()> {
        if self.status == ConnectionStatus::Connected {
            return Ok(());
        }
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Playing) {
            self.status = ConnectionStatus::Failed;
            return Err(anyhow::anyhow!("set RTSP pipeline to Playing: {}", e));
        }
        self.status = ConnectionStatus::Connected;
        log::info!("rtsp source connected: {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.status != ConnectionStatus::Connected {
            return Ok(None);
        }
        self.poll_bus();

        let timeout = gstreamer::ClockTime::from_mseconds(self.frame_timeout().as_millis() as u64);
        let Some(sample) = self.appsink.try_pull_sample(timeout) else {
            // Stalled stream is a soft miss; the worker decides when to
            // reconnect.
            return Ok(None);
        };

        match sample_to_frame(&sample) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => {
                log::warn!("rtsp sample decode failed: {:#}", e);
                Ok(None)
            }
        }
    }

    fn disconnect(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
        self.status = ConnectionStatus::Disconnected;
    }

    fn status(&self) -> ConnectionStatus {
        self.status
    }

    fn frame_timeout(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            500
        } else {
            (1000 / self.config.target_fps).saturating_mul(4)
        };
        Duration::from_millis(base_ms.max(500) as u64)
    }

    fn poll_bus(&mut self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    log::warn!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    );
                    self.status = ConnectionStatus::Error;
                }
                MessageView::Eos(..) => {
                    log::warn!("rtsp stream reached EOS: {}", self.config.url);
                    self.status = ConnectionStatus::Error;
                }
                _ => {}
            }
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_frame(sample: &gstreamer::Sample) -> Result<Frame> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride(0) as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    let pixels = if stride == row_bytes {
        data.to_vec()
    } else {
        let mut out = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let end = start + row_bytes;
            out.extend_from_slice(
                data.get(start..end)
                    .context("RTSP buffer row is out of bounds")?,
            );
        }
        out
    };

    Frame::new(pixels, width, height, SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_url_selects_synthetic_backend() {
        let config = RtspConfig {
            url: "stub://front".to_string(),
            ..RtspConfig::default()
        };
        let mut source = RtspSource::new(config).unwrap();
        source.connect().unwrap();
        assert!(source.next_frame().unwrap().is_some());
    }

    #[cfg(not(feature = "rtsp-gstreamer"))]
    #[test]
    fn real_url_requires_gstreamer_feature() {
        let config = RtspConfig::default();
        assert!(RtspSource::new(config).is_err());
    }
}
