use super::{MediaDevice, MediaStream};
use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::{FrameData, FrameFormat};
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::path::Path;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

/// V4L2 camera read through a GStreamer pipeline producing RGB frames
pub struct V4l2Camera {
    config: CameraConfig,
    name: String,
}

impl V4l2Camera {
    pub fn new(config: CameraConfig) -> Self {
        let name = format!("/dev/video{}", config.index);
        Self { config, name }
    }

    fn pipeline_description(&self) -> String {
        let (width, height) = self.config.resolution;
        format!(
            "v4l2src device={} io-mode=mmap do-timestamp=true ! \
             videoconvert ! \
             video/x-raw,format=RGB,width={},height={},framerate={}/1 ! \
             queue max-size-buffers=2 leaky=downstream ! \
             appsink name=sink sync=false max-buffers=2 drop=true emit-signals=false",
            self.name, width, height, self.config.fps
        )
    }
}

#[async_trait]
impl MediaDevice for V4l2Camera {
    async fn request_access(&self) -> Result<Box<dyn MediaStream>, CameraError> {
        if !Path::new(&self.name).exists() {
            return Err(CameraError::NotFound {
                details: format!("{} does not exist", self.name),
            });
        }

        gstreamer::init().map_err(|e| CameraError::Unavailable {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        let description = self.pipeline_description();
        info!("Creating GStreamer pipeline: {}", description);

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| CameraError::Unavailable {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| CameraError::Unavailable {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let appsink = pipeline
            .by_name("sink")
            .and_then(|element| element.downcast::<AppSink>().ok())
            .ok_or_else(|| CameraError::Unavailable {
                details: "Pipeline has no appsink".to_string(),
            })?;

        let (tx, rx) = mpsc::channel(4);
        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink
                        .pull_sample()
                        .map_err(|_| gstreamer::FlowError::Eos)?;
                    // Drop frames the consumer has not caught up with
                    let _ = tx.try_send(sample);
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        if let Err(e) = pipeline.set_state(gstreamer::State::Playing) {
            let _ = pipeline.set_state(gstreamer::State::Null);
            // v4l2src refuses to start when the node is not readable by us
            let readable = std::fs::File::open(&self.name).is_ok();
            return Err(if readable {
                CameraError::Unavailable {
                    details: format!("Failed to start pipeline: {}", e),
                }
            } else {
                CameraError::PermissionDenied {
                    details: format!("{} is not readable", self.name),
                }
            });
        }

        info!("GStreamer pipeline for {} started", self.name);

        Ok(Box::new(V4l2Stream {
            pipeline,
            samples: rx,
            frame_counter: 0,
        }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct V4l2Stream {
    pipeline: Pipeline,
    samples: mpsc::Receiver<gstreamer::Sample>,
    frame_counter: u64,
}

impl V4l2Stream {
    fn frame_from_sample(&mut self, sample: gstreamer::Sample) -> Result<FrameData, String> {
        let buffer = sample.buffer().ok_or("No buffer in sample")?;
        let caps = sample.caps().ok_or("No caps in sample")?;
        let video_info =
            VideoInfo::from_caps(caps).map_err(|e| format!("Failed to get video info: {}", e))?;
        let map = buffer
            .map_readable()
            .map_err(|e| format!("Failed to map buffer: {}", e))?;

        let (width, height) = (video_info.width(), video_info.height());
        let row_bytes = width as usize * 3;
        let stride = video_info.stride()[0] as usize;

        // Rows may be padded; repack tightly
        let data = if stride == row_bytes {
            map.as_slice().to_vec()
        } else {
            map.as_slice()
                .chunks(stride)
                .take(height as usize)
                .flat_map(|row| row[..row_bytes].iter().copied())
                .collect()
        };

        self.frame_counter += 1;
        trace!("Captured RGB frame {} ({}x{})", self.frame_counter, width, height);

        Ok(FrameData::new(
            self.frame_counter,
            SystemTime::now(),
            data,
            width,
            height,
            FrameFormat::Rgb24,
        ))
    }
}

#[async_trait]
impl MediaStream for V4l2Stream {
    async fn next_frame(&mut self) -> Option<FrameData> {
        loop {
            let sample = self.samples.recv().await?;
            match self.frame_from_sample(sample) {
                Ok(frame) => return Some(frame),
                Err(e) => error!("Error processing GStreamer sample: {}", e),
            }
        }
    }

    async fn stop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
        debug!("GStreamer pipeline stopped after {} frames", self.frame_counter);
    }
}
