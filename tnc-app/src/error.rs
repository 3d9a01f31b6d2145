use std::net::SocketAddr;

use thiserror::Error;

use tnc_core::mode::UnknownMode;

/// Fatal at startup: the process cannot come up in a consistent state
/// (§7 ConfigError).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown modem mode: {0}")]
    UnknownMode(#[from] UnknownMode),

    #[error("unable to locate sound card '{0}' - is it in use?")]
    SoundcardNotFound(String),

    #[error(
        "selected device's sample rate ({device_hz} Hz) is lower than the modem rate ({modem_hz} Hz)"
    )]
    SampleRateTooLow { device_hz: u32, modem_hz: u32 },

    #[error("invalid callsign: {0}")]
    InvalidCallsign(String),

    #[error("invalid network address: {0}")]
    InvalidAddress(String),
}

/// Logged and recoverable: an external transport dropped or refused a
/// connection (§7 TransportError). The transport decides whether to
/// retry or drop.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("KISS TCP listener on {0} failed to accept a connection: {1}")]
    KissAcceptFailed(SocketAddr, std::io::Error),

    #[error("KISS client connection lost: {0}")]
    KissConnectionLost(std::io::Error),

    #[error("failed to open pseudo-terminal: {0}")]
    PtsOpenFailed(std::io::Error),

    #[error("rigctld connection to {0} failed: {1}")]
    RigctldConnectFailed(SocketAddr, std::io::Error),

    #[error("rigctld command failed: {0}")]
    RigctldCommandFailed(std::io::Error),
}

/// Caught at the audio callback boundary, logged, and never allowed to
/// tear down the stream (§7 RuntimeError in audio callback).
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("error occurred in soundcard i/o: {0}")]
    Stream(#[source] cpal::StreamError),

    #[error("unable to retrieve supported configs for soundcard: {0}")]
    SupportedConfigs(#[source] cpal::SupportedStreamConfigsError),

    #[error("could not find a suitable soundcard config (need mono/stereo, i16, >= {0} Hz)")]
    NoValidConfigAvailable(u32),

    #[error("unable to build soundcard stream: {0}")]
    StreamBuild(#[source] cpal::BuildStreamError),

    #[error("unable to play soundcard stream: {0}")]
    StreamPlay(#[source] cpal::PlayStreamError),
}
