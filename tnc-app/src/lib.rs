//! The audio engine, transports, and packet dispatch for the HF soundmodem
//! TNC (§4.3-§4.5, §5-§7): sound device I/O, the on-demand TX worker, KISS
//! TCP/PTS transports, a rigctld PTT client, and the controller that ties
//! reassembled packets to their sinks.

pub mod controller;
pub mod error;
pub mod soundcard;
pub mod soundmodem;
pub mod transport;

pub use controller::{ChatSink, Controller, NullChatSink};
pub use error::{ConfigError, RuntimeError, TransportError};
pub use soundmodem::{InputSource, OutputSink, Ptt, Soundmodem, TxSettings};
