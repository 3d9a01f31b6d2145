//! External KISS transports and the rigctld PTT client (§4.3, §6).
//!
//! Grounded on the teacher's `Tnc for TcpStream` blanket impl (`tnc.rs`):
//! a transport is just a byte stream that happens to carry KISS frames,
//! and `TcpStream`/`File` already satisfy `Read + Write`.

use std::io::{BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::error::TransportError;
use crate::soundmodem::Ptt;
use tnc_core::Packet;

const FEND: u8 = 0xC0;
const FESC: u8 = 0xDB;
const TFEND: u8 = 0xDC;
const TFESC: u8 = 0xDD;

/// Encode one data frame (port 0, command 0) as a KISS frame (§4.3).
pub fn kiss_encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(FEND);
    out.push(0x00);
    for &b in payload {
        match b {
            FEND => {
                out.push(FESC);
                out.push(TFEND);
            }
            FESC => {
                out.push(FESC);
                out.push(TFESC);
            }
            other => out.push(other),
        }
    }
    out.push(FEND);
    out
}

/// Incremental KISS frame decoder fed one byte at a time.
#[derive(Default)]
pub struct KissDecoder {
    buf: Vec<u8>,
    in_frame: bool,
    escaped: bool,
}

impl KissDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte; returns a completed data frame's payload (command
    /// byte stripped) once a closing `FEND` is seen.
    pub fn feed(&mut self, byte: u8) -> Option<Vec<u8>> {
        match byte {
            FEND => {
                if self.in_frame && !self.buf.is_empty() {
                    let frame = std::mem::take(&mut self.buf);
                    self.in_frame = false;
                    // First byte is port/command; data frames have 0 in
                    // the low nibble.
                    return Some(frame[1..].to_vec());
                }
                self.in_frame = true;
                self.buf.clear();
            }
            FESC if self.in_frame => self.escaped = true,
            b => {
                if self.in_frame {
                    let actual = if self.escaped {
                        self.escaped = false;
                        match b {
                            TFEND => FEND,
                            TFESC => FESC,
                            other => other,
                        }
                    } else {
                        b
                    };
                    self.buf.push(actual);
                }
            }
        }
        None
    }
}

/// A KISS TCP server: one listener accepting any number of clients, all of
/// which receive the same outgoing stream and can each inject incoming
/// packets (§4.3, §6 `--kiss-host`/`--kiss-port`).
pub struct KissTcpServer {
    clients: Arc<std::sync::Mutex<Vec<TcpStream>>>,
}

impl KissTcpServer {
    /// Bind `addr` and start accepting clients. `on_frame` is called from
    /// a per-client reader thread with each decoded outbound packet.
    pub fn bind<F>(addr: SocketAddr, on_frame: F) -> Result<Self, TransportError>
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        let listener =
            TcpListener::bind(addr).map_err(|e| TransportError::KissAcceptFailed(addr, e))?;
        let clients: Arc<std::sync::Mutex<Vec<TcpStream>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let on_frame = Arc::new(on_frame);

        let accept_clients = clients.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        info!("KISS client connected: {:?}", stream.peer_addr());
                        let reader_stream = match stream.try_clone() {
                            Ok(s) => s,
                            Err(e) => {
                                warn!("{}", TransportError::KissConnectionLost(e));
                                continue;
                            }
                        };
                        accept_clients.lock().unwrap().push(stream);
                        let on_frame = on_frame.clone();
                        std::thread::spawn(move || run_client_reader(reader_stream, on_frame));
                    }
                    Err(e) => warn!("{}", TransportError::KissAcceptFailed(addr, e)),
                }
            }
        });

        Ok(Self { clients })
    }

    /// Broadcast a received packet to every connected client as a KISS
    /// frame, dropping any client whose connection has died.
    pub fn broadcast(&self, payload: &[u8]) {
        let frame = kiss_encode(payload);
        let mut clients = self.clients.lock().unwrap();
        clients.retain_mut(|c| match c.write_all(&frame) {
            Ok(()) => true,
            Err(e) => {
                warn!("{}", TransportError::KissConnectionLost(e));
                false
            }
        });
    }
}

fn run_client_reader<F>(stream: TcpStream, on_frame: Arc<F>)
where
    F: Fn(Vec<u8>) + Send + Sync + 'static,
{
    let mut reader = BufReader::new(stream);
    let mut decoder = KissDecoder::new();
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => {
                debug!("KISS client disconnected");
                break;
            }
            Ok(_) => {
                if let Some(payload) = decoder.feed(byte[0]) {
                    on_frame(payload);
                }
            }
            Err(e) => {
                warn!("{}", TransportError::KissConnectionLost(e));
                break;
            }
        }
    }
}

/// A KISS transport carried over a pseudo-terminal instead of TCP, for
/// applications (e.g. `direwolf`-compatible tools) that expect a serial
/// device (§6 `--pts`). Unix only.
#[cfg(unix)]
pub mod pts {
    use super::*;
    use std::ffi::CStr;
    use std::fs::File;
    use std::os::fd::{FromRawFd, RawFd};

    extern "C" {
        fn posix_openpt(flags: i32) -> i32;
        fn grantpt(fd: i32) -> i32;
        fn unlockpt(fd: i32) -> i32;
        fn ptsname(fd: i32) -> *mut i8;
    }

    const O_RDWR: i32 = 2;
    const O_NOCTTY: i32 = 0o400;

    pub struct PtsTransport {
        pub secondary_path: String,
    }

    impl PtsTransport {
        /// Open a new PTY pair and start a reader thread over the primary
        /// side, same as [`super::KissTcpServer::bind`]'s client reader.
        pub fn open<F>(on_frame: F) -> Result<(Self, File), TransportError>
        where
            F: Fn(Vec<u8>) + Send + Sync + 'static,
        {
            let fd: RawFd = unsafe { posix_openpt(O_RDWR | O_NOCTTY) };
            if fd < 0 {
                return Err(TransportError::PtsOpenFailed(
                    std::io::Error::last_os_error(),
                ));
            }
            if unsafe { grantpt(fd) } != 0 || unsafe { unlockpt(fd) } != 0 {
                return Err(TransportError::PtsOpenFailed(
                    std::io::Error::last_os_error(),
                ));
            }
            let name_ptr = unsafe { ptsname(fd) };
            if name_ptr.is_null() {
                return Err(TransportError::PtsOpenFailed(
                    std::io::Error::last_os_error(),
                ));
            }
            let secondary_path = unsafe { CStr::from_ptr(name_ptr) }
                .to_string_lossy()
                .into_owned();

            let primary = unsafe { File::from_raw_fd(fd) };
            let reader_primary = primary.try_clone().map_err(TransportError::PtsOpenFailed)?;
            let on_frame = Arc::new(on_frame);
            std::thread::spawn(move || run_file_reader(reader_primary, on_frame));

            Ok((Self { secondary_path }, primary))
        }
    }

    fn run_file_reader<F>(mut file: File, on_frame: Arc<F>)
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        let mut decoder = KissDecoder::new();
        let mut byte = [0u8; 1];
        loop {
            match file.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    if let Some(payload) = decoder.feed(byte[0]) {
                        on_frame(payload);
                    }
                }
                Err(e) => {
                    warn!("PTS read error: {e}");
                    break;
                }
            }
        }
    }
}

/// A PTT backend that keys/unkeys a radio over rigctld's plain-text
/// protocol (`T 1\n` / `T 0\n`). Reconnects lazily on the next edge after a
/// dropped connection, per §4.4's edge-triggered PTT contract.
pub struct RigctldPtt {
    addr: Option<SocketAddr>,
    stream: Option<TcpStream>,
}

impl RigctldPtt {
    /// `addr` of `None` disables PTT entirely (§6: port 0 means disabled).
    pub fn new(addr: Option<SocketAddr>) -> Self {
        Self { addr, stream: None }
    }

    fn ensure_connected(&mut self) -> Option<&mut TcpStream> {
        let addr = self.addr?;
        if self.stream.is_none() {
            match TcpStream::connect(addr) {
                Ok(s) => self.stream = Some(s),
                Err(e) => {
                    warn!("{}", TransportError::RigctldConnectFailed(addr, e));
                    return None;
                }
            }
        }
        self.stream.as_mut()
    }

    fn send(&mut self, command: &[u8]) {
        let Some(stream) = self.ensure_connected() else {
            return;
        };
        if let Err(e) = stream.write_all(command) {
            warn!("{}", TransportError::RigctldCommandFailed(e));
            self.stream = None;
        }
    }
}

impl Ptt for RigctldPtt {
    fn ptt_on(&mut self) {
        self.send(b"T 1\n");
    }

    fn ptt_off(&mut self) {
        self.send(b"T 0\n");
    }
}

/// Dispatches decoded KISS-framed host->radio traffic into the TNC's send
/// queue and mirrors radio->host traffic back out to KISS clients. Kept
/// separate from [`crate::controller::Controller`] only in that it knows
/// nothing about chat packets.
pub struct KissBridge {
    to_queue: SyncSender<Packet>,
}

impl KissBridge {
    pub fn new() -> (Self, Receiver<Packet>) {
        let (tx, rx) = sync_channel(128);
        (Self { to_queue: tx }, rx)
    }

    pub fn on_frame(&self, payload: Vec<u8>) {
        match Packet::kiss(payload) {
            Ok(p) => {
                let _ = self.to_queue.try_send(p);
            }
            Err(e) => warn!("dropping oversized KISS frame from client: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_round_trips_including_escaped_bytes() {
        let payload = vec![0x00, FEND, 0x42, FESC, 0xFF];
        let frame = kiss_encode(&payload);
        let mut decoder = KissDecoder::new();
        let mut got = None;
        for &b in &frame {
            if let Some(p) = decoder.feed(b) {
                got = Some(p);
            }
        }
        assert_eq!(got.unwrap(), payload);
    }

    #[test]
    fn decoder_ignores_bytes_outside_a_frame() {
        let mut decoder = KissDecoder::new();
        assert!(decoder.feed(0x99).is_none());
        assert!(decoder.feed(FEND).is_none());
        assert!(decoder.feed(0x00).is_none());
        assert!(decoder.feed(b'h').is_none());
        assert_eq!(decoder.feed(FEND).unwrap(), b"h");
    }

    #[test]
    fn rigctld_ptt_with_no_address_is_a_no_op() {
        let mut ptt = RigctldPtt::new(None);
        ptt.ptt_on();
        ptt.ptt_off();
    }
}
