use crate::mode::Mode;
use std::fmt;

/// Maximum packet payload length: the on-air length field is a 2-byte
/// unsigned big-endian integer (§3).
pub const MAX_PACKET_LEN: usize = 32768;

/// The one-byte header type carried by every packet (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderType {
    /// Raw KISS packet, handed verbatim to the KISS transport.
    Kiss,
    /// Chat message: payload is `callsign` + `0xFF` + `message`.
    Chat,
    /// Anything else: logged and dropped by the controller (§4.5).
    Other(u8),
}

impl HeaderType {
    pub const KISS_BYTE: u8 = 0xFF;
    pub const CHAT_BYTE: u8 = 0xFE;

    pub fn as_byte(&self) -> u8 {
        match self {
            HeaderType::Kiss => Self::KISS_BYTE,
            HeaderType::Chat => Self::CHAT_BYTE,
            HeaderType::Other(b) => *b,
        }
    }
}

impl From<u8> for HeaderType {
    fn from(b: u8) -> Self {
        match b {
            Self::KISS_BYTE => HeaderType::Kiss,
            Self::CHAT_BYTE => HeaderType::Chat,
            other => HeaderType::Other(other),
        }
    }
}

/// An application-layer unit travelling to or from the modem (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub data: Vec<u8>,
    pub header: HeaderType,
    /// Set by the reassembler on receive; `None` for packets not yet sent.
    pub mode: Option<Mode>,
}

impl Packet {
    pub fn new(data: Vec<u8>, header: HeaderType) -> Result<Self, PacketTooLarge> {
        if data.len() >= MAX_PACKET_LEN {
            return Err(PacketTooLarge { len: data.len() });
        }
        Ok(Self {
            data,
            header,
            mode: None,
        })
    }

    pub fn kiss(data: Vec<u8>) -> Result<Self, PacketTooLarge> {
        Self::new(data, HeaderType::Kiss)
    }

    pub fn chat(callsign: &str, message: &str) -> Result<Self, PacketTooLarge> {
        let mut data = Vec::with_capacity(callsign.len() + 1 + message.len());
        data.extend_from_slice(callsign.as_bytes());
        data.push(0xFF);
        data.extend_from_slice(message.as_bytes());
        Self::new(data, HeaderType::Chat)
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketTooLarge {
    pub len: usize,
}

impl fmt::Display for PacketTooLarge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "packet payload is {} bytes; maximum is {}",
            self.len,
            MAX_PACKET_LEN - 1
        )
    }
}

impl std::error::Error for PacketTooLarge {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_oversized_payload() {
        let data = vec![0u8; MAX_PACKET_LEN];
        assert!(Packet::kiss(data).is_err());
    }

    #[test]
    fn accepts_max_minus_one() {
        let data = vec![0u8; MAX_PACKET_LEN - 1];
        assert!(Packet::kiss(data).is_ok());
    }

    #[test]
    fn chat_splits_at_first_0xff() {
        let p = Packet::chat("N0CALL", "hi").unwrap();
        assert_eq!(p.header, HeaderType::Chat);
        assert_eq!(p.data, b"N0CALL\xffhi");
    }

    #[test]
    fn header_byte_round_trips() {
        assert_eq!(HeaderType::from(0xFF), HeaderType::Kiss);
        assert_eq!(HeaderType::from(0xFE), HeaderType::Chat);
        assert_eq!(HeaderType::from(0x01), HeaderType::Other(0x01));
    }
}
