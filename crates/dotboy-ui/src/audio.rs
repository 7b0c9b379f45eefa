use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use dotboy_core::audio_queue::AudioConsumer;

/// The default output device and its preferred configuration, or `None` when
/// no audio output is available. Queried before the stream starts so the APU
/// resampler can be configured with the negotiated rate first.
pub fn output_device() -> Option<(cpal::Device, cpal::SupportedStreamConfig)> {
    let host = cpal::default_host();
    let device = host.default_output_device()?;
    match device.default_output_config() {
        Ok(config) => Some((device, config)),
        Err(e) => {
            log::warn!("no supported audio output config: {e}");
            None
        }
    }
}

/// Build and start an output stream whose callback drains `consumer`,
/// emitting silence on underrun.
pub fn start_stream(
    device: cpal::Device,
    supported: cpal::SupportedStreamConfig,
    consumer: AudioConsumer,
) -> Option<cpal::Stream> {
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let channels = config.channels as usize;
    let err_fn = |err| log::warn!("audio stream error: {err}");

    let build = |stream: Result<cpal::Stream, cpal::BuildStreamError>| match stream {
        Ok(s) => Some(s),
        Err(e) => {
            log::warn!("failed to build audio stream: {e}");
            None
        }
    };

    let stream = match sample_format {
        cpal::SampleFormat::I16 => build(device.build_output_stream(
            &config,
            move |data: &mut [i16], _| {
                for frame in data.chunks_mut(channels) {
                    let (left, right) = consumer.pop_stereo().unwrap_or((0, 0));
                    frame[0] = left;
                    if channels > 1 {
                        frame[1] = right;
                    }
                }
            },
            err_fn,
            None,
        ))?,
        cpal::SampleFormat::U16 => build(device.build_output_stream(
            &config,
            move |data: &mut [u16], _| {
                for frame in data.chunks_mut(channels) {
                    let (left, right) = consumer.pop_stereo().unwrap_or((0, 0));
                    frame[0] = (left as i32 + 32768) as u16;
                    if channels > 1 {
                        frame[1] = (right as i32 + 32768) as u16;
                    }
                }
            },
            err_fn,
            None,
        ))?,
        cpal::SampleFormat::F32 => build(device.build_output_stream(
            &config,
            move |data: &mut [f32], _| {
                for frame in data.chunks_mut(channels) {
                    let (left, right) = consumer.pop_stereo().unwrap_or((0, 0));
                    frame[0] = left as f32 / 32768.0;
                    if channels > 1 {
                        frame[1] = right as f32 / 32768.0;
                    }
                }
            },
            err_fn,
            None,
        ))?,
        other => {
            log::warn!("unsupported audio sample format: {other:?}");
            return None;
        }
    };

    if let Err(e) = stream.play() {
        log::warn!("failed to start audio stream: {e}");
        return None;
    }
    Some(stream)
}
