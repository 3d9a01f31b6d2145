//! The codec adapter: a typed interface to the external FreeDV OFDM data
//! modem (§4.1/§6). The modem itself is a native, opaque collaborator;
//! this crate only defines the boundary and provides two implementations
//! of it.

pub mod error;
pub mod software;

#[cfg(feature = "freedv-sys")]
pub mod ffi;

pub use error::CodecError;
pub use software::SoftCodec;

/// One open instance of the external codec, bound to a single [`Mode`]
/// (`tnc_core::Mode`). Not internally thread-safe: each instance must be
/// driven by exactly one thread (§4.1 contract).
pub trait Codec: Send {
    /// Modem sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Fixed on-air frame size, including the trailing CRC.
    fn bytes_per_frame(&self) -> usize;

    /// Number of PCM samples a modulated frame body occupies.
    fn n_tx_modem_samples(&self) -> usize;

    /// Number of bytes of 16-bit PCM the demodulator currently wants fed
    /// in before it can attempt another decode. May vary call-to-call as
    /// the codec tracks clock drift.
    fn nin_bytes(&self) -> usize;

    /// Feed exactly `nin_bytes()` bytes of 16-bit signed little-endian PCM
    /// mono. Returns the decoded `bytes_per_frame - 2` payload bytes (CRC
    /// already validated and stripped) or `None` if no frame was
    /// recoverable from this chunk.
    fn feed_rx(&mut self, samples: &[u8]) -> Option<Vec<u8>>;

    /// Modulate one `bytes_per_frame`-byte frame (CRC included) into
    /// `n_tx_modem_samples()` PCM samples.
    fn modulate_frame(&mut self, frame: &[u8]) -> Vec<i16>;

    /// Samples emitted once before the first frame of a transmission.
    fn preamble_samples(&mut self) -> Vec<i16>;

    /// Samples emitted once after the last frame of a transmission.
    fn postamble_samples(&mut self) -> Vec<i16>;

    /// Last estimated signal-to-noise ratio in dB.
    fn snr(&self) -> f32;

    /// Nonzero while the demodulator has acquired lock on an incoming
    /// waveform.
    fn sync(&self) -> i32;

    /// CRC-16 over `bytes`, using the same polynomial this codec uses
    /// internally to validate received frames.
    fn crc16(&self, bytes: &[u8]) -> u16;
}
