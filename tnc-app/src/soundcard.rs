//! Real cpal sound device backend for [`crate::soundmodem::InputSource`] and
//! [`crate::soundmodem::OutputSink`] (§4.4, §5). Grounded on the teacher's
//! soundcard worker-thread pattern: one thread per opened device, driven by
//! an internal event channel, building cpal streams on demand.

use std::borrow::Borrow;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, SupportedStreamConfigRange};
use log::error;

use crate::error::{ConfigError, RuntimeError};
use crate::soundmodem::{
    callback_tick, input_level_dbfs, EngineHandle, InputResampler, InputSource, OutputSink,
    SoundmodemEvent,
};

/// An opened sound device, usable as an input source, an output sink, or
/// both. Only one `Soundcard` should be opened per physical device name at
/// a time (§5).
pub struct Soundcard {
    event_tx: SyncSender<SoundcardEvent>,
    sample_rate: u32,
    channels: u16,
}

impl Soundcard {
    /// Open `card_name`, requiring a mono or stereo i16 config supporting at
    /// least `min_sample_rate_hz` (the TX codec's modem rate).
    pub fn new<S: Into<String>>(
        card_name: S,
        min_sample_rate_hz: u32,
    ) -> Result<Self, ConfigError> {
        let card_name = card_name.into();
        let host = cpal::default_host();
        let device = host
            .devices()
            .map_err(|_| ConfigError::SoundcardNotFound(card_name.clone()))?
            .find(|d| d.name().map(|n| n == card_name).unwrap_or(false))
            .ok_or_else(|| ConfigError::SoundcardNotFound(card_name.clone()))?;

        let config = pick_config(&device, min_sample_rate_hz)?;
        let sample_rate = config.sample_rate_hz;
        let channels = config.channels;

        let (event_tx, event_rx) = sync_channel(128);
        spawn_soundcard_worker(device, config, event_rx, min_sample_rate_hz);
        Ok(Self {
            event_tx,
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn input(&self) -> SoundcardInputSource {
        SoundcardInputSource {
            event_tx: self.event_tx.clone(),
        }
    }

    pub fn output(&self) -> SoundcardOutputSink {
        SoundcardOutputSink {
            event_tx: self.event_tx.clone(),
        }
    }

    /// Soundcards usable as a soundmodem output: mono/stereo, i16, and
    /// covering at least `min_sample_rate_hz`.
    pub fn supported_output_cards(min_sample_rate_hz: u32) -> Vec<String> {
        let host = cpal::default_host();
        let Ok(output_devices) = host.output_devices() else {
            return vec![];
        };
        list_compatible(output_devices, min_sample_rate_hz, |d| {
            d.supported_output_configs()
        })
    }

    pub fn supported_input_cards(min_sample_rate_hz: u32) -> Vec<String> {
        let host = cpal::default_host();
        let Ok(input_devices) = host.input_devices() else {
            return vec![];
        };
        list_compatible(input_devices, min_sample_rate_hz, |d| {
            d.supported_input_configs()
        })
    }
}

fn list_compatible<I, F, C>(devices: I, min_sample_rate_hz: u32, configs_of: F) -> Vec<String>
where
    I: Iterator<Item = cpal::Device>,
    F: Fn(&cpal::Device) -> Result<C, cpal::SupportedStreamConfigsError>,
    C: Iterator<Item = SupportedStreamConfigRange>,
{
    let mut out = vec![];
    for d in devices {
        let Ok(mut configs) = configs_of(&d) else {
            continue;
        };
        if configs.any(|c| config_is_compatible(c, min_sample_rate_hz)) {
            if let Ok(name) = d.name() {
                out.push(name);
            }
        }
    }
    out.sort();
    out
}

fn config_is_compatible<C: Borrow<SupportedStreamConfigRange>>(
    config: C,
    min_sample_rate_hz: u32,
) -> bool {
    let config = config.borrow();
    (config.channels() == 1 || config.channels() == 2)
        && config.sample_format() == SampleFormat::I16
        && config.max_sample_rate().0 >= min_sample_rate_hz
}

struct ChosenConfig {
    config: cpal::SupportedStreamConfig,
    sample_rate_hz: u32,
    channels: u16,
}

fn pick_config(
    device: &cpal::Device,
    min_sample_rate_hz: u32,
) -> Result<ChosenConfig, ConfigError> {
    let input_ok = device
        .supported_input_configs()
        .ok()
        .and_then(|mut c| c.find(|cfg| config_is_compatible(cfg, min_sample_rate_hz)));
    let output_ok = device
        .supported_output_configs()
        .ok()
        .and_then(|mut c| c.find(|cfg| config_is_compatible(cfg, min_sample_rate_hz)));
    let range = input_ok
        .or(output_ok)
        .ok_or(ConfigError::SampleRateTooLow {
            device_hz: 0,
            modem_hz: min_sample_rate_hz,
        })?;

    let rate = min_sample_rate_hz
        .max(range.min_sample_rate().0)
        .min(range.max_sample_rate().0);
    let channels = range.channels();
    let config = range.with_sample_rate(SampleRate(rate));
    Ok(ChosenConfig {
        sample_rate_hz: rate,
        channels,
        config,
    })
}

enum SoundcardEvent {
    StartInput {
        events: SyncSender<SoundmodemEvent>,
    },
    CloseInput,
    StartOutput {
        events: SyncSender<SoundmodemEvent>,
        engine: EngineHandle,
    },
    CloseOutput,
}

pub struct SoundcardInputSource {
    event_tx: SyncSender<SoundcardEvent>,
}

impl InputSource for SoundcardInputSource {
    fn start(&self, events: SyncSender<SoundmodemEvent>) {
        let _ = self.event_tx.send(SoundcardEvent::StartInput { events });
    }

    fn close(&self) {
        let _ = self.event_tx.send(SoundcardEvent::CloseInput);
    }
}

pub struct SoundcardOutputSink {
    event_tx: SyncSender<SoundcardEvent>,
}

impl OutputSink for SoundcardOutputSink {
    fn start(&self, events: SyncSender<SoundmodemEvent>, engine: EngineHandle) {
        let _ = self
            .event_tx
            .send(SoundcardEvent::StartOutput { events, engine });
    }

    fn close(&self) {
        let _ = self.event_tx.send(SoundcardEvent::CloseOutput);
    }
}

fn spawn_soundcard_worker(
    device: cpal::Device,
    chosen: ChosenConfig,
    event_rx: Receiver<SoundcardEvent>,
    modem_rate_hz: u32,
) {
    std::thread::spawn(move || {
        let channels = chosen.channels;
        let device_rate_hz = chosen.sample_rate_hz;
        let mut input_stream: Option<Stream> = None;
        let mut output_stream: Option<Stream> = None;

        while let Ok(ev) = event_rx.recv() {
            match ev {
                SoundcardEvent::StartInput { events } => {
                    let mut resampler = InputResampler::new(device_rate_hz, modem_rate_hz);
                    let stream = device.build_input_stream(
                        &chosen.config.clone().into(),
                        move |data: &[i16], _info: &cpal::InputCallbackInfo| {
                            let _ = events
                                .try_send(SoundmodemEvent::InputLevel(input_level_dbfs(data)));
                            let mono: Vec<i16> = data
                                .chunks(channels as usize)
                                .map(|frame| frame[0])
                                .collect();
                            let resampled = resampler.push(&mono);
                            let _ =
                                events.try_send(SoundmodemEvent::BasebandInput(resampled.into()));
                        },
                        move |e| error!("{}", RuntimeError::Stream(e)),
                        None,
                    );
                    match stream {
                        Ok(s) => {
                            if let Err(e) = s.play() {
                                error!("{}", RuntimeError::StreamPlay(e));
                            } else {
                                input_stream = Some(s);
                            }
                        }
                        Err(e) => error!("{}", RuntimeError::StreamBuild(e)),
                    }
                }
                SoundcardEvent::CloseInput => {
                    input_stream.take();
                }
                SoundcardEvent::StartOutput { events, engine } => {
                    let stream = device.build_output_stream(
                        &chosen.config.clone().into(),
                        move |data: &mut [i16], _info: &cpal::OutputCallbackInfo| {
                            // `data` is already interleaved device-channel PCM: the TX
                            // worker fans mono out to `channels` in `resample_and_fan_out`
                            // before it ever reaches the output buffer, so this callback
                            // just copies it straight through.
                            callback_tick(&engine, data, &events);
                        },
                        move |e| error!("{}", RuntimeError::Stream(e)),
                        None,
                    );
                    match stream {
                        Ok(s) => {
                            if let Err(e) = s.play() {
                                error!("{}", RuntimeError::StreamPlay(e));
                            } else {
                                output_stream = Some(s);
                            }
                        }
                        Err(e) => error!("{}", RuntimeError::StreamBuild(e)),
                    }
                }
                SoundcardEvent::CloseOutput => {
                    output_stream.take();
                }
            }
        }
    });
}
