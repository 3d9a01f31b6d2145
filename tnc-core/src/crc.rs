//! CRC-16 used to protect the wire-format trailer (§4.2, §6).
//!
//! The real polynomial lives inside the external codec (§4.1's `crc16()`);
//! it is opaque and out of scope for this crate (§1). `crc16_ccitt` is a
//! concrete, named stand-in (CRC-16/CCITT-FALSE) used by `tnc-core`'s own
//! tests and as the default when no codec-supplied CRC function is given
//! to the frame codec.

pub const CCITT_FALSE: crc::Algorithm<u16> = crc::Algorithm {
    width: 16,
    poly: 0x1021,
    init: 0xFFFF,
    refin: false,
    refout: false,
    xorout: 0x0000,
    check: 0x29B1,
    residue: 0x0000,
};

pub fn crc16_ccitt(input: &[u8]) -> u16 {
    let crc = crc::Crc::<u16>::new(&CCITT_FALSE);
    let mut digest = crc.digest();
    digest.update(input);
    digest.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_test_vector() {
        assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
    }

    #[test]
    fn crc_is_sensitive_to_a_single_bit_flip() {
        let a = crc16_ccitt(b"hello world");
        let mut flipped = b"hello world".to_vec();
        flipped[0] ^= 0x01;
        assert_ne!(a, crc16_ccitt(&flipped));
    }
}
