//! Dispatches reassembled packets by header byte and owns follow-mode TX
//! codec rebuilding (§4.5). Grounded on the teacher's adapter-registration
//! pattern in spirit (one place owning cross-cutting dispatch) but much
//! smaller, since this spec only has two sinks.

use std::sync::{Arc, Mutex};

use log::{debug, warn};

use tnc_codec::Codec;
use tnc_core::reassembler::{PacketSink, ProgressSink};
use tnc_core::{HeaderType, Mode, Packet};

use crate::soundmodem::EngineHandle;
use crate::transport::KissTcpServer;

/// Receives chat packets split at the first `0xFF` into `(callsign,
/// message)` (§3, §4.5).
pub trait ChatSink: Send + 'static {
    fn chat_received(&mut self, callsign: &str, message: &str);
}

/// No-op chat sink for configurations that don't wire one up.
pub struct NullChatSink;

impl ChatSink for NullChatSink {
    fn chat_received(&mut self, _callsign: &str, _message: &str) {}
}

/// Builds a fresh TX codec instance for `mode`; supplied by the caller so
/// this crate doesn't need to know whether it's building a [`tnc_codec::SoftCodec`]
/// or an FFI-backed one.
pub type CodecFactory = Arc<dyn Fn(Mode) -> Box<dyn Codec> + Send + Sync>;

/// Central dispatch point: reassembled packets come in, get routed to the
/// KISS transport or the chat sink, and "follow mode" rebuilds the TX
/// codec to match whichever mode last delivered a packet.
pub struct Controller<C: ChatSink> {
    kiss: Arc<KissTcpServer>,
    chat: Mutex<C>,
    engine: EngineHandle,
    codec_factory: CodecFactory,
    follow_mode: bool,
    last_seen_mode: Mutex<Option<Mode>>,
}

impl<C: ChatSink> Controller<C> {
    pub fn new(
        kiss: Arc<KissTcpServer>,
        chat: C,
        engine: EngineHandle,
        codec_factory: CodecFactory,
        follow_mode: bool,
    ) -> Self {
        Self {
            kiss,
            chat: Mutex::new(chat),
            engine,
            codec_factory,
            follow_mode,
            last_seen_mode: Mutex::new(None),
        }
    }
}

impl<C: ChatSink> PacketSink for Controller<C> {
    fn packet_received(&mut self, packet: Packet) {
        if let Some(mode) = packet.mode {
            self.maybe_follow(mode);
        }
        match packet.header {
            HeaderType::Kiss => self.kiss.broadcast(&packet.data),
            HeaderType::Chat => match split_chat(&packet.data) {
                Some((callsign, message)) => {
                    self.chat.lock().unwrap().chat_received(callsign, message)
                }
                None => warn!("dropping malformed chat packet: no callsign/message separator"),
            },
            HeaderType::Other(b) => {
                debug!("dropping packet with unrecognized header byte {b:#04x}")
            }
        }
    }
}

impl<C: ChatSink> Controller<C> {
    fn maybe_follow(&self, mode: Mode) {
        if !self.follow_mode {
            return;
        }
        let mut last = self.last_seen_mode.lock().unwrap();
        if *last == Some(mode) {
            return;
        }
        *last = Some(mode);
        debug!("follow mode: switching TX codec to {mode}");
        self.engine.set_tx_codec((self.codec_factory)(mode));
    }
}

fn split_chat(data: &[u8]) -> Option<(&str, &str)> {
    let sep = data.iter().position(|&b| b == 0xFF)?;
    let callsign = std::str::from_utf8(&data[..sep]).ok()?;
    let message = std::str::from_utf8(&data[sep + 1..]).ok()?;
    Some((callsign, message))
}

/// Reports decode progress per mode, logged at debug level (§4.5). Kept
/// separate from [`Controller`] since it has no dispatch decisions to make.
pub struct LoggingProgress;

impl ProgressSink for LoggingProgress {
    fn progress(&mut self, mode: Mode, received: usize, total: usize) {
        debug!("{mode}: {received}/{total} bytes reassembled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soundmodem::test_engine_handle;
    use crate::transport::KissTcpServer;
    use tnc_codec::SoftCodec;

    #[test]
    fn chat_splits_callsign_and_message_at_first_0xff() {
        assert_eq!(split_chat(b"N0CALL\xffhello"), Some(("N0CALL", "hello")));
    }

    #[test]
    fn chat_without_separator_is_rejected() {
        assert_eq!(split_chat(b"no separator here"), None);
    }

    fn test_controller(follow_mode: bool) -> Controller<NullChatSink> {
        let kiss = Arc::new(
            KissTcpServer::bind("127.0.0.1:0".parse().unwrap(), |_payload: Vec<u8>| {}).unwrap(),
        );
        let engine = test_engine_handle();
        let codec_factory: CodecFactory = Arc::new(|mode| Box::new(SoftCodec::open(mode)));
        Controller::new(kiss, NullChatSink, engine, codec_factory, follow_mode)
    }

    #[test]
    fn follow_mode_rebuilds_tx_codec_when_received_mode_changes() {
        let mut controller = test_controller(true);
        let before = controller.engine.tx_bytes_per_frame();

        let mut packet = Packet::kiss(b"hello".to_vec()).unwrap();
        packet.mode = Some(Mode::DataC4);
        controller.packet_received(packet);

        let after = controller.engine.tx_bytes_per_frame();
        assert_ne!(
            before, after,
            "follow mode should rebuild the TX codec for DataC4 (§4.5, S5)"
        );
        assert_eq!(after, SoftCodec::open(Mode::DataC4).bytes_per_frame());
    }

    #[test]
    fn follow_mode_disabled_leaves_tx_codec_untouched() {
        let mut controller = test_controller(false);
        let before = controller.engine.tx_bytes_per_frame();

        let mut packet = Packet::kiss(b"hello".to_vec()).unwrap();
        packet.mode = Some(Mode::DataC4);
        controller.packet_received(packet);

        assert_eq!(before, controller.engine.tx_bytes_per_frame());
    }
}
