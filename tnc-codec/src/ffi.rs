//! Bindings to the real FreeDV OFDM data modes in libcodec2, mirroring the
//! Python original's `cffi` binding (`freedv_build.py`). Only compiled
//! under the `freedv-sys` feature; `build.rs` only links `codec2` when
//! that feature is enabled, so a default build never needs the system
//! library installed.
//!
//! Safety: every call here operates on a `*mut freedv` owned exclusively
//! by one `FreedvCodec`, created by `freedv_open` and released by
//! `freedv_close` in `Drop`. No instance is ever shared across threads
//! (§4.1, §9).

use crate::{Codec, CodecError};
use std::os::raw::{c_int, c_short};
use tnc_core::Mode;

#[allow(non_camel_case_types)]
#[repr(C)]
struct freedv {
    _private: [u8; 0],
}

const FREEDV_MODE_DATAC1: c_int = 18;
const FREEDV_MODE_DATAC3: c_int = 19;
const FREEDV_MODE_DATAC4: c_int = 20;

fn mode_to_ffi(mode: Mode) -> c_int {
    match mode {
        Mode::DataC1 => FREEDV_MODE_DATAC1,
        Mode::DataC3 => FREEDV_MODE_DATAC3,
        Mode::DataC4 => FREEDV_MODE_DATAC4,
    }
}

#[repr(C)]
#[allow(dead_code)]
struct ModemStats {
    snr_est: f32,
    sync: c_int,
    // The real struct carries much more (symbol history, EVM, ...); this
    // adapter only reads the leading fields it needs.
}

extern "C" {
    fn freedv_open(mode: c_int) -> *mut freedv;
    fn freedv_close(freedv: *mut freedv);
    fn freedv_get_modem_sample_rate(freedv: *const freedv) -> c_int;
    fn freedv_get_bits_per_modem_frame(freedv: *mut freedv) -> c_int;
    fn freedv_nin(freedv: *mut freedv) -> c_int;
    fn freedv_get_n_tx_modem_samples(freedv: *mut freedv) -> c_int;
    fn freedv_get_n_tx_preamble_modem_samples(freedv: *mut freedv) -> c_int;
    fn freedv_get_n_tx_postamble_modem_samples(freedv: *mut freedv) -> c_int;
    fn freedv_rawdatarx(freedv: *mut freedv, bytes_out: *mut u8, demod_in: *mut c_short) -> c_int;
    fn freedv_rawdatatx(freedv: *mut freedv, mod_out: *mut c_short, bytes_in: *mut u8) -> c_int;
    fn freedv_rawdatapreambletx(freedv: *mut freedv, mod_out: *mut c_short) -> c_int;
    fn freedv_rawdatapostambletx(freedv: *mut freedv, mod_out: *mut c_short) -> c_int;
    fn freedv_get_sync(freedv: *mut freedv) -> c_int;
    fn freedv_get_modem_stats(freedv: *mut freedv, stats: *mut ModemStats) -> c_int;
    fn freedv_gen_crc16(buf: *const u8, length: c_int) -> u16;
    fn freedv_set_frames_per_burst(freedv: *mut freedv, framesperburst: c_int);
}

pub struct FreedvCodec {
    handle: *mut freedv,
    mode: Mode,
    bytes_per_frame: usize,
    n_tx_modem_samples: usize,
}

// The handle is only ever touched by the one thread that owns this value;
// nothing here is shared.
unsafe impl Send for FreedvCodec {}

impl FreedvCodec {
    pub fn open(mode: Mode) -> Result<Self, CodecError> {
        let handle = unsafe { freedv_open(mode_to_ffi(mode)) };
        if handle.is_null() {
            return Err(CodecError::NullHandle(mode));
        }
        unsafe { freedv_set_frames_per_burst(handle, 1) };
        let bits_per_frame = unsafe { freedv_get_bits_per_modem_frame(handle) };
        let n_tx_modem_samples = unsafe { freedv_get_n_tx_modem_samples(handle) };
        Ok(Self {
            handle,
            mode,
            bytes_per_frame: (bits_per_frame / 8) as usize,
            n_tx_modem_samples: n_tx_modem_samples as usize,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }
}

impl Drop for FreedvCodec {
    fn drop(&mut self) {
        unsafe { freedv_close(self.handle) };
    }
}

impl Codec for FreedvCodec {
    fn sample_rate(&self) -> u32 {
        unsafe { freedv_get_modem_sample_rate(self.handle) as u32 }
    }

    fn bytes_per_frame(&self) -> usize {
        self.bytes_per_frame
    }

    fn n_tx_modem_samples(&self) -> usize {
        self.n_tx_modem_samples
    }

    fn nin_bytes(&self) -> usize {
        unsafe { freedv_nin(self.handle) as usize * 2 }
    }

    fn feed_rx(&mut self, samples: &[u8]) -> Option<Vec<u8>> {
        assert_eq!(
            samples.len(),
            self.nin_bytes(),
            "caller must feed exactly nin_bytes()"
        );
        let mut demod_in: Vec<c_short> = samples
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let mut bytes_out = vec![0u8; self.bytes_per_frame - 2];
        let nbytes =
            unsafe { freedv_rawdatarx(self.handle, bytes_out.as_mut_ptr(), demod_in.as_mut_ptr()) };
        if nbytes > 0 {
            bytes_out.truncate(nbytes as usize);
            Some(bytes_out)
        } else {
            None
        }
    }

    fn modulate_frame(&mut self, frame: &[u8]) -> Vec<i16> {
        assert_eq!(
            frame.len(),
            self.bytes_per_frame,
            "caller must supply a full frame"
        );
        let mut bytes_in = frame.to_vec();
        let mut mod_out = vec![0i16; self.n_tx_modem_samples];
        unsafe { freedv_rawdatatx(self.handle, mod_out.as_mut_ptr(), bytes_in.as_mut_ptr()) };
        mod_out
    }

    fn preamble_samples(&mut self) -> Vec<i16> {
        let n = unsafe { freedv_get_n_tx_preamble_modem_samples(self.handle) } as usize;
        let mut buf = vec![0i16; n];
        unsafe { freedv_rawdatapreambletx(self.handle, buf.as_mut_ptr()) };
        buf
    }

    fn postamble_samples(&mut self) -> Vec<i16> {
        let n = unsafe { freedv_get_n_tx_postamble_modem_samples(self.handle) } as usize;
        let mut buf = vec![0i16; n];
        unsafe { freedv_rawdatapostambletx(self.handle, buf.as_mut_ptr()) };
        buf
    }

    fn snr(&self) -> f32 {
        let mut stats = ModemStats {
            snr_est: 0.0,
            sync: 0,
        };
        unsafe { freedv_get_modem_stats(self.handle, &mut stats) };
        stats.snr_est
    }

    fn sync(&self) -> i32 {
        unsafe { freedv_get_sync(self.handle) }
    }

    fn crc16(&self, bytes: &[u8]) -> u16 {
        unsafe { freedv_gen_crc16(bytes.as_ptr(), bytes.len() as c_int) }
    }
}
