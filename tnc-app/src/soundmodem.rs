//! The audio engine (§4.4): input/output sound devices, the RX reassembler
//! driving N parallel per-mode codec instances, the on-demand TX worker,
//! and PTT edge sequencing. Grounded on the teacher's event-loop-thread
//! pattern for the RX side (one worker thread consuming a
//! `SoundmodemEvent` channel) and its `OutputBuffer`/exactly-one-worker
//! discipline for the TX side.

use log::{debug, warn};
use rubato::Resampler;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use tnc_codec::Codec;
use tnc_core::frame::encode as frame_encode;
use tnc_core::reassembler::{PacketSink, ProgressSink};
use tnc_core::{Mode, Packet, Reassembler};

/// A queued, pre-rendered run of device-rate, device-channel-count PCM
/// samples waiting to be played. `idling` is true whenever nothing is
/// queued, so the output callback knows silence is expected rather than
/// an underrun.
pub struct OutputBuffer {
    pub idling: bool,
    pub samples: VecDeque<i16>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self {
            idling: true,
            samples: VecDeque::new(),
        }
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Keys the PTT control line. Implementations are expected to be
/// idempotent per edge (§5).
pub trait Ptt: Send + 'static {
    fn ptt_on(&mut self);
    fn ptt_off(&mut self);
}

/// No radio attached; used for tests and loopback.
#[derive(Default)]
pub struct NullPtt;

impl Ptt for NullPtt {
    fn ptt_on(&mut self) {}
    fn ptt_off(&mut self) {}
}

pub enum SoundmodemEvent {
    /// Mono, modem-rate samples from the input callback: downmixed and
    /// resampled from the device's native rate before being handed off
    /// (§4.4 Input device steps 2-3).
    BasebandInput(Arc<[i16]>),
    /// Peak input level in dBFS, computed once per input callback (§4.4
    /// Input device step 1). `-99.0` means silent.
    InputLevel(f32),
    DidReadFromOutputBuffer {
        len: usize,
        timestamp: Instant,
    },
    OutputUnderrun,
    /// The realtime callback computed a new `ptt_next` (§4.4 step 3); the
    /// engine thread actuates the PTT line since that may block on I/O
    /// (e.g. a rigctld round trip).
    PttEdge(bool),
    Start,
    Close,
}

pub trait InputSource: Send + Sync + 'static {
    fn start(&self, events: SyncSender<SoundmodemEvent>);
    fn close(&self);
}

pub trait OutputSink: Send + Sync + 'static {
    fn start(&self, events: SyncSender<SoundmodemEvent>, engine: EngineHandle);
    fn close(&self);
}

/// A no-op input that periodically delivers silence; useful off hardware.
#[derive(Default)]
pub struct NullInputSource;

impl InputSource for NullInputSource {
    fn start(&self, _events: SyncSender<SoundmodemEvent>) {}
    fn close(&self) {}
}

/// A no-op output that simply drains whatever is queued.
#[derive(Default)]
pub struct NullOutputSink;

impl OutputSink for NullOutputSink {
    fn start(&self, _events: SyncSender<SoundmodemEvent>, _engine: EngineHandle) {}
    fn close(&self) {}
}

/// Parameters governing a transmission's silence guard intervals and gain,
/// all configurable from the CLI (§6).
#[derive(Debug, Clone, Copy)]
pub struct TxSettings {
    pub ptt_on_delay_ms: u32,
    pub output_volume_db: f32,
    pub max_packets_combined: usize,
}

impl Default for TxSettings {
    fn default() -> Self {
        Self {
            ptt_on_delay_ms: 150,
            output_volume_db: 0.0,
            max_packets_combined: 5,
        }
    }
}

pub(crate) struct EngineShared {
    send_queue: Mutex<VecDeque<Packet>>,
    output_buffer: RwLock<OutputBuffer>,
    tx_codec: Mutex<Box<dyn Codec>>,
    inhibit: AtomicBool,
    /// Mirrors the PTT line's last-known state, written from the realtime
    /// output callback so it can evaluate step 1 of §4.4 ("if inhibit &&
    /// !ptt, emit silence") without a lock. The actual PTT line is only
    /// ever toggled off the engine thread, via `SoundmodemEvent::PttEdge`.
    ptt: AtomicBool,
    worker_running: AtomicBool,
    device_sample_rate: AtomicU32Cell,
    device_channels: AtomicU32Cell,
    settings: Mutex<TxSettings>,
    /// Latest peak input level in dBFS (§4.4 Input device step 1), stored
    /// as bits so it can be read without a lock. Exposed for UI; this
    /// crate has none, so it's just a getter.
    input_level_dbfs: std::sync::atomic::AtomicU32,
}

/// A handle an [`OutputSink`] implementation holds onto and calls
/// [`callback_tick`] through from inside its real-time audio callback. The
/// only way to reach the engine's shared state from outside this module.
#[derive(Clone)]
pub struct EngineHandle(pub(crate) Arc<EngineShared>);

impl EngineHandle {
    /// Replace the TX codec instance, e.g. for follow-mode or an operator
    /// mode change. Takes effect before the TX worker next runs.
    pub fn set_tx_codec(&self, codec: Box<dyn Codec>) {
        *self.0.tx_codec.lock().unwrap() = codec;
    }

    /// Test-only observation point: each mode's `SoftCodec` has a distinct
    /// frame size, so this lets tests elsewhere in the crate confirm a
    /// follow-mode codec rebuild actually took effect.
    #[cfg(test)]
    pub(crate) fn tx_bytes_per_frame(&self) -> usize {
        self.0.tx_codec.lock().unwrap().bytes_per_frame()
    }
}

/// A tiny `u32` cell built on an atomic so device parameters discovered at
/// stream-open time can be read from the TX worker without a mutex.
struct AtomicU32Cell(std::sync::atomic::AtomicU32);

impl AtomicU32Cell {
    fn new(v: u32) -> Self {
        Self(std::sync::atomic::AtomicU32::new(v))
    }
    fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
    fn set(&self, v: u32) {
        self.0.store(v, Ordering::Release)
    }
}

/// Owns the input/output sound devices and the RX reassembly pipeline.
/// Generic over the device backends so tests can run entirely against
/// [`NullInputSource`]/[`NullOutputSink`] and [`tnc_codec::SoftCodec`].
pub struct Soundmodem {
    shared: Arc<EngineShared>,
    event_tx: SyncSender<SoundmodemEvent>,
}

impl Soundmodem {
    /// `tx_codec` is the initial TX mode's codec instance. `rx_codecs` must
    /// have one entry per supported mode. `make_sink` builds the
    /// [`PacketSink`] given a handle back into this engine — needed
    /// because a sink (e.g. the controller) may want to drive follow-mode
    /// TX codec rebuilds, which would otherwise require the `Soundmodem`
    /// this constructor hasn't finished building yet. `progress` receives
    /// reassembly progress updates.
    pub fn new<I, O, P, S, Pr>(
        input: I,
        output: O,
        ptt: P,
        tx_codec: Box<dyn Codec>,
        rx_codecs: HashMap<Mode, Box<dyn Codec>>,
        settings: TxSettings,
        make_sink: impl FnOnce(EngineHandle) -> S,
        progress: Pr,
    ) -> Self
    where
        I: InputSource,
        O: OutputSink,
        P: Ptt,
        S: PacketSink + Send + 'static,
        Pr: ProgressSink + Send + 'static,
    {
        let shared = Arc::new(EngineShared {
            send_queue: Mutex::new(VecDeque::new()),
            output_buffer: RwLock::new(OutputBuffer::new()),
            tx_codec: Mutex::new(tx_codec),
            inhibit: AtomicBool::new(false),
            ptt: AtomicBool::new(false),
            worker_running: AtomicBool::new(false),
            device_sample_rate: AtomicU32Cell::new(48000),
            device_channels: AtomicU32Cell::new(1),
            settings: Mutex::new(settings),
            input_level_dbfs: std::sync::atomic::AtomicU32::new(f32::to_bits(-99.0)),
        });

        let sink = make_sink(EngineHandle(shared.clone()));
        let (event_tx, event_rx) = sync_channel(128);
        spawn_engine_thread(
            shared.clone(),
            event_tx.clone(),
            event_rx,
            Box::new(input),
            Box::new(output),
            Box::new(ptt),
            rx_codecs,
            sink,
            progress,
        );

        Self { shared, event_tx }
    }

    /// Append a packet to the send queue. Non-blocking (§4.4).
    pub fn write(&self, packet: Packet) {
        self.shared.send_queue.lock().unwrap().push_back(packet);
    }

    /// Drop all queued and pending-render content (§4.4 `clear()`).
    pub fn clear(&self) {
        self.shared.send_queue.lock().unwrap().clear();
        let mut buf = self.shared.output_buffer.write().unwrap();
        buf.samples.clear();
        buf.idling = true;
    }

    /// Replace the TX codec instance, e.g. for follow-mode or an operator
    /// mode change. Takes effect before the TX worker next runs.
    pub fn set_tx_codec(&self, codec: Box<dyn Codec>) {
        *self.shared.tx_codec.lock().unwrap() = codec;
    }

    pub fn is_inhibited(&self) -> bool {
        self.shared.inhibit.load(Ordering::Acquire)
    }

    /// Latest peak input level in dBFS (§4.4 Input device step 1).
    pub fn input_level_dbfs(&self) -> f32 {
        f32::from_bits(self.shared.input_level_dbfs.load(Ordering::Acquire))
    }

    pub fn start(&self) {
        let _ = self.event_tx.send(SoundmodemEvent::Start);
    }

    pub fn close(&self) {
        let _ = self.event_tx.send(SoundmodemEvent::Close);
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_engine_thread<S, Pr>(
    shared: Arc<EngineShared>,
    event_tx: SyncSender<SoundmodemEvent>,
    event_rx: Receiver<SoundmodemEvent>,
    input: Box<dyn InputSource>,
    output: Box<dyn OutputSink>,
    mut ptt_driver: Box<dyn Ptt>,
    mut rx_codecs: HashMap<Mode, Box<dyn Codec>>,
    mut sink: S,
    mut progress: Pr,
) where
    S: PacketSink + Send + 'static,
    Pr: ProgressSink + Send + 'static,
{
    std::thread::spawn(move || {
        let mut reassembler = Reassembler::new();
        let mut rx_pending: HashMap<Mode, Vec<u8>> =
            Mode::ALL.iter().map(|&m| (m, Vec::new())).collect();

        while let Ok(ev) = event_rx.recv() {
            match ev {
                SoundmodemEvent::BasebandInput(samples) => {
                    let mut any_sync = false;
                    for (&mode, codec) in rx_codecs.iter_mut() {
                        let pending = rx_pending.get_mut(&mode).unwrap();
                        for &s in samples.iter() {
                            pending.extend_from_slice(&s.to_le_bytes());
                        }
                        loop {
                            let nin = codec.nin_bytes();
                            if pending.len() < nin {
                                break;
                            }
                            let chunk: Vec<u8> = pending.drain(..nin).collect();
                            if let Some(payload) = codec.feed_rx(&chunk) {
                                reassembler.feed_frame(mode, &payload, &mut sink, &mut progress);
                            }
                        }
                        if codec.sync() != 0 {
                            any_sync = true;
                        }
                    }
                    shared.inhibit.store(any_sync, Ordering::Release);
                }
                SoundmodemEvent::InputLevel(dbfs) => {
                    shared
                        .input_level_dbfs
                        .store(dbfs.to_bits(), Ordering::Release);
                }
                SoundmodemEvent::Start => {
                    input.start(event_tx.clone());
                    output.start(event_tx.clone(), EngineHandle(shared.clone()));
                }
                SoundmodemEvent::Close => {
                    ptt_driver.ptt_off();
                    input.close();
                    output.close();
                    break;
                }
                SoundmodemEvent::DidReadFromOutputBuffer { .. } => {}
                SoundmodemEvent::OutputUnderrun => {
                    warn!("soundmodem output underrun");
                }
                SoundmodemEvent::PttEdge(on) => {
                    if on {
                        ptt_driver.ptt_on();
                    } else {
                        ptt_driver.ptt_off();
                    }
                }
            }
        }
    });
}

/// Invoked from the real-time output audio callback (§4.4, Output device
/// steps 1-3): emits silence while the channel is busy and no TX is in
/// progress, copies queued PCM into `out`, spawns the TX worker on demand,
/// and reports PTT edges through `events` (the actual PTT line is toggled
/// off this thread, by the engine thread, since it may block on I/O). Kept
/// as a free function (not a stream closure) so it is unit-testable
/// without `cpal`.
pub fn callback_tick(
    engine: &EngineHandle,
    out: &mut [i16],
    events: &SyncSender<SoundmodemEvent>,
) -> usize {
    let shared = &engine.0;
    let ptt_before = shared.ptt.load(Ordering::Acquire);

    if shared.inhibit.load(Ordering::Acquire) && !ptt_before {
        out.fill(0);
        return 0;
    }

    let mut taken = 0;
    let mut buffer_had_data = false;
    {
        let mut buf = shared.output_buffer.write().unwrap();
        for slot in out.iter_mut() {
            if let Some(s) = buf.samples.pop_front() {
                *slot = s;
                taken += 1;
                buffer_had_data = true;
            } else {
                if !buf.idling {
                    let _ = events.try_send(SoundmodemEvent::OutputUnderrun);
                }
                buf.idling = true;
                *slot = 0;
            }
        }
    }

    let ptt_next = if buffer_had_data {
        true
    } else {
        let queue_nonempty = !shared.send_queue.lock().unwrap().is_empty();
        let worker_running = shared.worker_running.load(Ordering::Acquire);
        if queue_nonempty && !worker_running {
            maybe_spawn_tx_worker(shared);
            ptt_before
        } else {
            false
        }
    };

    if ptt_next != ptt_before {
        shared.ptt.store(ptt_next, Ordering::Release);
        let _ = events.try_send(SoundmodemEvent::PttEdge(ptt_next));
    }

    let _ = events.try_send(SoundmodemEvent::DidReadFromOutputBuffer {
        len: taken,
        timestamp: Instant::now(),
    });
    taken
}

fn maybe_spawn_tx_worker(shared: &Arc<EngineShared>) {
    let queue_empty = shared.send_queue.lock().unwrap().is_empty();
    if queue_empty {
        return;
    }
    let buffer_empty = shared.output_buffer.read().unwrap().samples.is_empty();
    if !buffer_empty {
        return;
    }
    if shared
        .worker_running
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }
    let shared = shared.clone();
    std::thread::spawn(move || {
        run_tx_worker(&shared);
        shared.worker_running.store(false, Ordering::Release);
    });
}

/// Drains the send queue, encodes and modulates it, and appends the
/// rendered samples to the output buffer (§4.4 TX worker steps 1-4).
fn run_tx_worker(shared: &Arc<EngineShared>) {
    let settings = *shared.settings.lock().unwrap();
    let drained: VecDeque<Packet> = std::mem::take(&mut *shared.send_queue.lock().unwrap());
    if drained.is_empty() {
        return;
    }
    let mut queue = drained;

    let mut codec = shared.tx_codec.lock().unwrap();
    let bytes_per_frame = codec.bytes_per_frame();
    let crc16 = |bytes: &[u8]| codec.crc16(bytes);
    let frames = frame_encode(
        &mut queue,
        bytes_per_frame,
        settings.max_packets_combined,
        crc16,
    );
    debug!("tx worker encoded {} frame(s) from queue", frames.len());

    let device_rate = shared.device_sample_rate.get();
    let modem_rate = codec.sample_rate();
    let channels = shared.device_channels.get().max(1);

    let ptt_on_silence =
        vec![0i16; (modem_rate as u64 * settings.ptt_on_delay_ms as u64 / 1000) as usize];
    let mut modem_samples = ptt_on_silence;

    for frame in &frames {
        modem_samples.extend(codec.preamble_samples());
        modem_samples.extend(codec.modulate_frame(frame));
        modem_samples.extend(codec.postamble_samples());
    }
    // Trailing silence to flush codec buffers, sized like the teacher's
    // "2 * n_nom_modem_samples" rule of thumb.
    modem_samples.extend(vec![0i16; codec.n_tx_modem_samples() * 2]);
    drop(codec);

    let gain = 10f32.powf(settings.output_volume_db / 20.0);
    let device_samples =
        resample_and_fan_out(&modem_samples, modem_rate, device_rate, channels, gain);

    let mut buf = shared.output_buffer.write().unwrap();
    buf.samples.extend(device_samples);
    buf.idling = false;
}

/// Apply gain, resample from the modem rate to the device rate, and fan
/// mono out to the device's channel count. Resampling follows the
/// teacher's `m17codec2::tx::ResamplingAccumulator` recipe: a
/// `SincFixedIn` fed in `input_frames_next()`-sized chunks, the final
/// partial chunk zero-padded and the excess trimmed back off the output.
fn resample_and_fan_out(
    samples: &[i16],
    from_rate: u32,
    to_rate: u32,
    channels: u32,
    gain: f32,
) -> Vec<i16> {
    let mono: Vec<i16> = if from_rate == to_rate || samples.is_empty() {
        samples.iter().map(|&s| apply_gain(s, gain)).collect()
    } else {
        let ratio = to_rate as f64 / from_rate as f64;
        let expected_len = ((samples.len() as f64) * ratio).round() as usize;
        let mut resampler = make_resampler(from_rate, to_rate);
        let mut out = Vec::with_capacity(expected_len);
        let mut pos = 0;
        while pos < samples.len() {
            let chunk_len = resampler.input_frames_next();
            let mut chunk: Vec<f32> = samples[pos..(pos + chunk_len).min(samples.len())]
                .iter()
                .map(|&s| s as f32 / i16::MAX as f32)
                .collect();
            chunk.resize(chunk_len, 0.0);
            pos += chunk_len;
            let produced = resampler
                .process(&[chunk], None)
                .expect("fixed-size chunks always satisfy rubato's input_frames_next contract");
            out.extend(produced[0].iter().map(|&s| (s * i16::MAX as f32) as i16));
        }
        out.truncate(expected_len);
        out.into_iter().map(|s| apply_gain(s, gain)).collect()
    };
    if channels <= 1 {
        mono
    } else {
        mono.into_iter()
            .flat_map(|s| std::iter::repeat_n(s, channels as usize))
            .collect()
    }
}

/// Device-rate to modem-rate resampler for the input path (§4.4 Input
/// device step 3), carrying a [`rubato::SincFixedIn`] plus whatever partial
/// chunk is left over between callbacks — unlike the TX worker's one-shot
/// `resample_and_fan_out`, this one lives across many callback invocations
/// and must never drop samples at chunk boundaries.
pub(crate) struct InputResampler {
    resampler: Option<rubato::SincFixedIn<f32>>,
    pending: Vec<f32>,
}

impl InputResampler {
    pub(crate) fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            resampler: (from_rate != to_rate).then(|| make_resampler(from_rate, to_rate)),
            pending: Vec::new(),
        }
    }

    /// Feed newly-captured mono samples and return however many modem-rate
    /// samples that produced. Leftover input short of a full resampler
    /// chunk is buffered for the next call.
    pub(crate) fn push(&mut self, mono: &[i16]) -> Vec<i16> {
        let Some(resampler) = self.resampler.as_mut() else {
            return mono.to_vec();
        };
        self.pending
            .extend(mono.iter().map(|&s| s as f32 / i16::MAX as f32));

        let mut out = Vec::new();
        loop {
            let chunk_len = resampler.input_frames_next();
            if self.pending.len() < chunk_len {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..chunk_len).collect();
            let produced = resampler
                .process(&[chunk], None)
                .expect("fixed-size chunks always satisfy rubato's input_frames_next contract");
            out.extend(produced[0].iter().map(|&s| (s * i16::MAX as f32) as i16));
        }
        out
    }
}

/// Peak input level in dBFS (§4.4 Input device step 1); `-99.0` for
/// silence rather than `-inf`.
pub(crate) fn input_level_dbfs(samples: &[i16]) -> f32 {
    let peak = samples.iter().map(|&s| s.unsigned_abs()).max().unwrap_or(0);
    if peak == 0 {
        return -99.0;
    }
    (20.0 * (peak as f32 / i16::MAX as f32).log10()).max(-99.0)
}

fn make_resampler(from_rate: u32, to_rate: u32) -> rubato::SincFixedIn<f32> {
    use rubato::{SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        oversampling_factor: 128,
        interpolation: SincInterpolationType::Cubic,
        window: WindowFunction::BlackmanHarris2,
    };
    SincFixedIn::new(to_rate as f64 / from_rate as f64, 1.0, params, 1024, 1)
        .expect("static resampler parameters are always valid")
}

fn apply_gain(sample: i16, gain: f32) -> i16 {
    ((sample as f32) * gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

impl Soundmodem {
    /// Record the device parameters the output stream actually opened
    /// with, so the TX worker renders at the right rate/channel count.
    pub fn set_output_device_params(&self, sample_rate: u32, channels: u32) {
        self.shared.device_sample_rate.set(sample_rate);
        self.shared.device_channels.set(channels.max(1));
    }
}

/// Test-only constructor used by this module's own tests and by
/// `controller`'s, so both can exercise an [`EngineHandle`] without
/// standing up real sound devices.
#[cfg(test)]
pub(crate) fn test_engine_handle() -> EngineHandle {
    use tnc_codec::SoftCodec;
    EngineHandle(Arc::new(EngineShared {
        send_queue: Mutex::new(VecDeque::new()),
        output_buffer: RwLock::new(OutputBuffer::new()),
        tx_codec: Mutex::new(Box::new(SoftCodec::open(Mode::DataC1))),
        inhibit: AtomicBool::new(false),
        ptt: AtomicBool::new(false),
        worker_running: AtomicBool::new(false),
        device_sample_rate: AtomicU32Cell::new(8000),
        device_channels: AtomicU32Cell::new(1),
        settings: Mutex::new(TxSettings::default()),
        input_level_dbfs: std::sync::atomic::AtomicU32::new(f32::to_bits(-99.0)),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::sync_channel;
    use tnc_codec::SoftCodec;

    #[test]
    fn resample_and_fan_out_preserves_length_and_duration() {
        let tone: Vec<i16> = (0..8000)
            .map(|i| ((i as f32 * 0.1).sin() * 10000.0) as i16)
            .collect();
        let out = resample_and_fan_out(&tone, 8000, 48000, 2, 1.0);
        // Mono-equivalent length should track the resample ratio; fanned
        // out to stereo doubles it again.
        assert_eq!(out.len(), tone.len() * 6 * 2);
    }

    #[test]
    fn resample_and_fan_out_is_a_no_op_at_matching_rates() {
        let samples = vec![100i16, -200, 300, -400];
        let out = resample_and_fan_out(&samples, 8000, 8000, 1, 1.0);
        assert_eq!(out, samples);
    }

    #[test]
    fn input_resampler_is_a_pass_through_at_matching_rates() {
        let mut r = InputResampler::new(8000, 8000);
        let samples = vec![100i16, -200, 300, -400];
        assert_eq!(r.push(&samples), samples);
    }

    #[test]
    fn input_resampler_converts_device_rate_down_to_modem_rate() {
        let mut r = InputResampler::new(48000, 8000);
        let tone: Vec<i16> = (0..48000)
            .map(|i| ((i as f32 * 0.05).sin() * 10000.0) as i16)
            .collect();
        // Feed it in small chunks, as cpal callbacks would, to exercise the
        // across-callback pending-sample carry.
        let mut total = 0;
        for chunk in tone.chunks(480) {
            total += r.push(chunk).len();
        }
        // 48kHz -> 8kHz is a 6x downsample; allow for rubato's internal
        // latency rather than pinning an exact sample count.
        let expected = tone.len() / 6;
        assert!(
            total.abs_diff(expected) < expected / 10,
            "expected around {expected} output samples, got {total}"
        );
    }

    #[test]
    fn input_level_dbfs_reports_silence_and_full_scale() {
        assert_eq!(input_level_dbfs(&[0, 0, 0]), -99.0);
        assert_eq!(input_level_dbfs(&[i16::MAX, 0, -100]), 0.0);
        let half = input_level_dbfs(&[i16::MAX / 2]);
        assert!(half < 0.0 && half > -10.0);
    }

    struct Collected(Arc<Mutex<Vec<Packet>>>);
    impl PacketSink for Collected {
        fn packet_received(&mut self, packet: Packet) {
            self.0.lock().unwrap().push(packet);
        }
    }
    struct NoProgress;
    impl ProgressSink for NoProgress {
        fn progress(&mut self, _mode: Mode, _received: usize, _total: usize) {}
    }

    fn test_engine() -> (Arc<EngineShared>, Arc<Mutex<Vec<Packet>>>) {
        let rx_codecs: HashMap<Mode, Box<dyn Codec>> = Mode::ALL
            .iter()
            .map(|&m| (m, Box::new(SoftCodec::open(m)) as Box<dyn Codec>))
            .collect();
        let shared = Arc::new(EngineShared {
            send_queue: Mutex::new(VecDeque::new()),
            output_buffer: RwLock::new(OutputBuffer::new()),
            tx_codec: Mutex::new(Box::new(SoftCodec::open(Mode::DataC1))),
            inhibit: AtomicBool::new(false),
            ptt: AtomicBool::new(false),
            worker_running: AtomicBool::new(false),
            device_sample_rate: AtomicU32Cell::new(8000),
            device_channels: AtomicU32Cell::new(1),
            settings: Mutex::new(TxSettings::default()),
            input_level_dbfs: std::sync::atomic::AtomicU32::new(f32::to_bits(-99.0)),
        });
        let received = Arc::new(Mutex::new(Vec::new()));
        let _ = rx_codecs;
        (shared, received)
    }

    #[test]
    fn clear_empties_queue_and_buffer() {
        let (shared, _r) = test_engine();
        shared
            .send_queue
            .lock()
            .unwrap()
            .push_back(Packet::kiss(b"x".to_vec()).unwrap());
        shared.output_buffer.write().unwrap().samples.push_back(1);
        shared.send_queue.lock().unwrap().clear();
        shared.output_buffer.write().unwrap().samples.clear();
        assert!(shared.send_queue.lock().unwrap().is_empty());
        assert!(shared.output_buffer.read().unwrap().samples.is_empty());
    }

    #[test]
    fn tx_worker_renders_then_rx_loopback_delivers_in_order() {
        let (shared, _r) = test_engine();
        // No PTT guard silence, so the rendered stream is exactly
        // preamble + frame + postamble (SoftCodec has no real preamble
        // correlation to locate a frame amid silence it would need to
        // skip, unlike a real demodulator).
        shared.settings.lock().unwrap().ptt_on_delay_ms = 0;
        shared
            .send_queue
            .lock()
            .unwrap()
            .push_back(Packet::kiss(b"a".to_vec()).unwrap());
        shared
            .send_queue
            .lock()
            .unwrap()
            .push_back(Packet::kiss(b"b".to_vec()).unwrap());
        run_tx_worker(&shared);
        assert!(shared.send_queue.lock().unwrap().is_empty());
        let samples: Vec<i16> = shared
            .output_buffer
            .read()
            .unwrap()
            .samples
            .iter()
            .copied()
            .collect();
        assert!(!samples.is_empty());

        let mut rx = SoftCodec::open(Mode::DataC1);
        let preamble_len = 16; // SoftCodec::params_for(DataC1).preamble_len
        let frame: Vec<i16> = samples[preamble_len..preamble_len + rx.bytes_per_frame()].to_vec();
        let bytes: Vec<u8> = frame.iter().flat_map(|s| s.to_le_bytes()).collect();
        let payload = rx.feed_rx(&bytes).expect("aligned frame should decode");

        let mut reassembler = Reassembler::new();
        let mut sink = Collected(Arc::new(Mutex::new(Vec::new())));
        let mut progress = NoProgress;
        reassembler.feed_frame(Mode::DataC1, &payload, &mut sink, &mut progress);

        let got = sink.0.lock().unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].data, b"a");
        assert_eq!(got[1].data, b"b");
    }

    #[test]
    fn no_worker_spawned_when_queue_empty() {
        let (shared, _r) = test_engine();
        maybe_spawn_tx_worker(&shared);
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!shared.worker_running.load(Ordering::Acquire));
    }

    #[test]
    fn callback_tick_emits_silence_and_no_ptt_when_inhibited_and_idle() {
        let (shared, _r) = test_engine();
        shared.inhibit.store(true, Ordering::Release);
        let (tx, _rx) = sync_channel(8);
        let mut out = [7i16; 4];
        let taken = callback_tick(&EngineHandle(shared.clone()), &mut out, &tx);
        // Buffer is empty, so this is plain silence regardless of inhibit;
        // inhibit only prevents the worker from *starting* a transmission.
        assert_eq!(taken, 0);
        assert_eq!(out, [0, 0, 0, 0]);
    }

    #[test]
    fn inhibit_suppresses_tx_start_even_with_packets_queued() {
        let (shared, _r) = test_engine();
        shared.inhibit.store(true, Ordering::Release);
        shared
            .send_queue
            .lock()
            .unwrap()
            .push_back(Packet::kiss(b"a".to_vec()).unwrap());
        let (tx, _rx) = sync_channel(8);
        let mut out = [9i16; 8];
        let taken = callback_tick(&EngineHandle(shared.clone()), &mut out, &tx);
        assert_eq!(taken, 0);
        assert_eq!(out, [0; 8]);
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(
            !shared.worker_running.load(Ordering::Acquire),
            "inhibited callback must not start a transmission (§8 property 7)"
        );
        assert!(!shared.ptt.load(Ordering::Acquire));
    }

    #[test]
    fn ptt_edges_are_balanced_over_a_completed_tx_episode() {
        let (shared, _r) = test_engine();
        shared.settings.lock().unwrap().ptt_on_delay_ms = 0;
        shared
            .send_queue
            .lock()
            .unwrap()
            .push_back(Packet::kiss(b"hello".to_vec()).unwrap());
        let (tx, rx) = sync_channel(256);
        let engine = EngineHandle(shared.clone());

        let mut on_count = 0;
        let mut off_count = 0;
        let mut out = [0i16; 64];
        // Drive enough callback ticks to spawn the worker, drain its
        // rendered output, and return to idle.
        for _ in 0..200 {
            callback_tick(&engine, &mut out, &tx);
            while let Ok(ev) = rx.try_recv() {
                if let SoundmodemEvent::PttEdge(on) = ev {
                    if on {
                        on_count += 1;
                    } else {
                        off_count += 1;
                    }
                }
            }
            if !shared.ptt.load(Ordering::Acquire)
                && shared.output_buffer.read().unwrap().samples.is_empty()
                && shared.send_queue.lock().unwrap().is_empty()
                && on_count > 0
            {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        assert!(on_count > 0, "expected at least one PTT rising edge");
        assert_eq!(
            on_count, off_count,
            "§8 property 8: ptt_trigger calls must equal ptt_release calls over a completed TX episode"
        );
    }
}
