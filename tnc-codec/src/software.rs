//! A pure-Rust stand-in for the external OFDM codec (§1, §9). It performs
//! no real DSP — frame bytes are XOR-scrambled one-for-one into samples —
//! but it runs a real CRC-16 check on receive, so corrupted frames are
//! genuinely rejected and round trips are genuinely exercised end to end
//! without linking against libcodec2.
//!
//! Per-mode frame sizes are small illustrative constants, not the real
//! FreeDV DATAC1/3/4 parameters (those live in the native library and are
//! out of scope here): DataC1 is the largest/slowest, DataC4 the
//! smallest/fastest, mirroring their real relative ordering.

use crate::Codec;
use tnc_core::crc::crc16_ccitt;
use tnc_core::frame::verify_and_strip;
use tnc_core::Mode;

/// XOR key used to "scramble" frame bytes into samples. Any fixed value
/// works since this is a loopback, not a real modulation scheme.
const SCRAMBLE_KEY: u8 = 0xA5;

#[derive(Debug, Clone, Copy)]
struct Params {
    sample_rate: u32,
    bytes_per_frame: usize,
    preamble_len: usize,
    postamble_len: usize,
}

fn params_for(mode: Mode) -> Params {
    match mode {
        Mode::DataC1 => Params {
            sample_rate: 8000,
            bytes_per_frame: 510,
            preamble_len: 16,
            postamble_len: 8,
        },
        Mode::DataC3 => Params {
            sample_rate: 8000,
            bytes_per_frame: 246,
            preamble_len: 12,
            postamble_len: 6,
        },
        Mode::DataC4 => Params {
            sample_rate: 8000,
            bytes_per_frame: 128,
            preamble_len: 8,
            postamble_len: 4,
        },
    }
}

pub struct SoftCodec {
    mode: Mode,
    params: Params,
    last_decode_ok: bool,
}

impl SoftCodec {
    pub fn open(mode: Mode) -> Self {
        Self {
            mode,
            params: params_for(mode),
            last_decode_ok: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }
}

impl Codec for SoftCodec {
    fn sample_rate(&self) -> u32 {
        self.params.sample_rate
    }

    fn bytes_per_frame(&self) -> usize {
        self.params.bytes_per_frame
    }

    fn n_tx_modem_samples(&self) -> usize {
        self.params.bytes_per_frame
    }

    fn nin_bytes(&self) -> usize {
        self.n_tx_modem_samples() * 2
    }

    fn feed_rx(&mut self, samples: &[u8]) -> Option<Vec<u8>> {
        assert_eq!(
            samples.len(),
            self.nin_bytes(),
            "caller must feed exactly nin_bytes()"
        );
        let frame: Vec<u8> = samples
            .chunks_exact(2)
            .map(|pair| (i16::from_le_bytes([pair[0], pair[1]]) as u8) ^ SCRAMBLE_KEY)
            .collect();
        let decoded = verify_and_strip(&frame, crc16_ccitt).map(|payload| payload.to_vec());
        self.last_decode_ok = decoded.is_some();
        decoded
    }

    fn modulate_frame(&mut self, frame: &[u8]) -> Vec<i16> {
        assert_eq!(
            frame.len(),
            self.bytes_per_frame(),
            "caller must supply a full bytes_per_frame() frame"
        );
        frame.iter().map(|&b| (b ^ SCRAMBLE_KEY) as i16).collect()
    }

    fn preamble_samples(&mut self) -> Vec<i16> {
        vec![0i16; self.params.preamble_len]
    }

    fn postamble_samples(&mut self) -> Vec<i16> {
        vec![0i16; self.params.postamble_len]
    }

    fn snr(&self) -> f32 {
        if self.last_decode_ok {
            20.0
        } else {
            0.0
        }
    }

    fn sync(&self) -> i32 {
        self.last_decode_ok as i32
    }

    fn crc16(&self, bytes: &[u8]) -> u16 {
        crc16_ccitt(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn modulate_then_feed_rx_round_trips() {
        let mut tx = SoftCodec::open(Mode::DataC1);
        let mut rx = SoftCodec::open(Mode::DataC1);
        let mut frame = vec![0x11u8; tx.bytes_per_frame()];
        let region = frame.len() - 2;
        let crc = crc16_ccitt(&frame[..region]);
        frame[region..].copy_from_slice(&crc.to_be_bytes());

        let samples = tx.modulate_frame(&frame);
        assert_eq!(samples.len(), tx.n_tx_modem_samples());
        let bytes = samples_to_bytes(&samples);
        assert_eq!(bytes.len(), rx.nin_bytes());

        let payload = rx.feed_rx(&bytes).expect("valid frame should decode");
        assert_eq!(payload, frame[..region]);
        assert_eq!(rx.sync(), 1);
    }

    #[test]
    fn corrupted_frame_is_rejected() {
        let mut tx = SoftCodec::open(Mode::DataC4);
        let mut rx = SoftCodec::open(Mode::DataC4);
        let mut frame = vec![0x22u8; tx.bytes_per_frame()];
        let region = frame.len() - 2;
        let crc = crc16_ccitt(&frame[..region]);
        frame[region..].copy_from_slice(&crc.to_be_bytes());

        let samples = tx.modulate_frame(&frame);
        let mut bytes = samples_to_bytes(&samples);
        bytes[0] ^= 0xFF;

        assert!(rx.feed_rx(&bytes).is_none());
        assert_eq!(rx.sync(), 0);
    }

    #[test]
    fn modes_have_distinct_decreasing_frame_sizes() {
        let c1 = SoftCodec::open(Mode::DataC1);
        let c3 = SoftCodec::open(Mode::DataC3);
        let c4 = SoftCodec::open(Mode::DataC4);
        assert!(c1.bytes_per_frame() > c3.bytes_per_frame());
        assert!(c3.bytes_per_frame() > c4.bytes_per_frame());
    }
}
