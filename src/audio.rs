use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample as _, SampleFormat, SizedSample};
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Microphone capture feeding the local audio track.
///
/// cpal streams are not `Send`, so the stream lives on its own thread and
/// this handle only carries the stop signal. The shared `enabled` flag is
/// owned by `LocalMediaController`: while it is false the capture keeps
/// running but writes nothing, so unmuting never re-prompts for permission.
pub struct AudioCapture {
    stop: Mutex<Option<std_mpsc::Sender<()>>>,
}

impl AudioCapture {
    pub fn new(track: Arc<TrackLocalStaticSample>, enabled: Arc<AtomicBool>) -> Result<Self> {
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();

        std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let stream = match Self::open_stream(track, enabled) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Hold the stream until the handle is stopped or dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        ready_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("audio capture thread exited during startup"))??;

        Ok(Self {
            stop: Mutex::new(Some(stop_tx)),
        })
    }

    pub fn stop(&self) {
        if let Ok(mut guard) = self.stop.lock() {
            guard.take();
        }
    }

    fn open_stream(
        track: Arc<TrackLocalStaticSample>,
        enabled: Arc<AtomicBool>,
    ) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let input_device = host
            .default_input_device()
            .ok_or_else(|| anyhow::anyhow!("no audio input device available"))?;

        let config = input_device.default_input_config()?;
        log::debug!("audio input config: {config:?}");

        let stream = match config.sample_format() {
            SampleFormat::F32 => {
                Self::build_input_stream::<f32>(&input_device, &config.into(), track, enabled)?
            }
            SampleFormat::I16 => {
                Self::build_input_stream::<i16>(&input_device, &config.into(), track, enabled)?
            }
            SampleFormat::U16 => {
                Self::build_input_stream::<u16>(&input_device, &config.into(), track, enabled)?
            }
            sample_format => {
                return Err(anyhow::anyhow!("unsupported sample format: {sample_format:?}"))
            }
        };

        stream.play()?;
        Ok(stream)
    }

    fn build_input_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        track: Arc<TrackLocalStaticSample>,
        enabled: Arc<AtomicBool>,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + Send + 'static,
        f32: FromSample<T>,
    {
        let err_fn = |err| log::error!("audio input stream error: {err}");

        let stream = device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !enabled.load(Ordering::Relaxed) {
                    return;
                }
                let mut payload = Vec::with_capacity(data.len() * 4);
                for sample in data {
                    payload.extend_from_slice(&f32::from_sample(*sample).to_le_bytes());
                }
                let sample = Sample {
                    data: Bytes::from(payload),
                    duration: Duration::from_millis(20),
                    ..Default::default()
                };
                if let Err(e) = futures::executor::block_on(track.write_sample(&sample)) {
                    log::warn!("failed to write audio sample: {e}");
                }
            },
            err_fn,
            None,
        )?;

        Ok(stream)
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
