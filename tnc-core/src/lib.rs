//! Framing protocol, segmentation/coalescing, and RX reassembly for the
//! HF soundmodem TNC. Deliberately `std`, not `no_std`: packet payloads
//! run up to 32 KiB and are naturally `Vec<u8>`-shaped rather than fixed
//! stack buffers (see DESIGN.md).

pub mod crc;
pub mod frame;
pub mod mode;
pub mod packet;
pub mod reassembler;

pub use mode::Mode;
pub use packet::{HeaderType, Packet};
pub use reassembler::{PacketSink, ProgressSink, Reassembler};
