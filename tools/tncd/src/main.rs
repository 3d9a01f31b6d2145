use std::collections::HashMap;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use tnc_app::controller::{Controller, LoggingProgress, NullChatSink};
use tnc_app::error::ConfigError;
use tnc_app::soundcard::Soundcard;
use tnc_app::soundmodem::{Soundmodem, TxSettings};
use tnc_app::transport::{KissBridge, KissTcpServer, RigctldPtt};
use tnc_codec::{Codec, SoftCodec};
use tnc_core::Mode;

/// A KISS-over-TCP HF soundmodem TNC driving FreeDV OFDM data modes.
#[derive(Parser, Debug)]
#[command(name = "tncd", version, about)]
struct Args {
    /// Modem mode to transmit with initially.
    #[arg(long, default_value = "datac3")]
    mode: Mode,

    /// Rebuild the TX codec to match whichever mode last decoded a packet.
    #[arg(long)]
    follow: bool,

    /// Maximum packets coalesced into a single on-air frame.
    #[arg(long, default_value_t = 5)]
    max_packets_combined: usize,

    /// Input sound card name (see tnc-soundcards for a list).
    #[arg(long)]
    input_device: String,

    /// Output sound card name (see tnc-soundcards for a list).
    #[arg(long)]
    output_device: String,

    /// Output gain in dB applied before the sound card.
    #[arg(long, default_value_t = 0.0)]
    output_volume: f32,

    /// rigctld host; PTT is disabled if rigctld_port is 0.
    #[arg(long, default_value = "localhost")]
    rigctld_host: String,

    /// rigctld port; 0 disables PTT.
    #[arg(long, default_value_t = 4532)]
    rigctld_port: u16,

    /// Silence inserted before the first frame of a transmission, to give
    /// the radio time to key up.
    #[arg(long, default_value_t = 150)]
    ptt_on_delay_ms: u32,

    /// KISS TCP listener host.
    #[arg(long, default_value = "127.0.0.1")]
    kiss_host: String,

    /// KISS TCP listener port.
    #[arg(long, default_value_t = 8001)]
    kiss_port: u16,

    /// Also expose a KISS pseudo-terminal instead of (or alongside) TCP.
    #[arg(long)]
    pts: bool,

    /// Station callsign, used for chat packets.
    #[arg(long)]
    callsign: Option<String>,
}

fn main() -> ExitCode {
    env_logger::builder()
        .format_timestamp(Some(env_logger::TimestampPrecision::Millis))
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Startup failures from either taxonomy; once running, a `TransportError`
/// is logged and retried rather than treated as fatal (§7).
#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not start KISS transport: {0}")]
    Transport(#[from] tnc_app::error::TransportError),
}

fn validate_callsign(callsign: &str) -> Result<(), ConfigError> {
    let ok = !callsign.is_empty()
        && callsign.len() <= 9
        && callsign
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if ok {
        Ok(())
    } else {
        Err(ConfigError::InvalidCallsign(callsign.to_string()))
    }
}

fn make_codec(mode: Mode) -> Box<dyn Codec> {
    #[cfg(feature = "freedv-sys")]
    {
        match tnc_codec::ffi::FreedvCodec::open(mode) {
            Ok(c) => return Box::new(c),
            Err(e) => {
                log::warn!("falling back to software codec for {mode}: {e}");
            }
        }
    }
    Box::new(SoftCodec::open(mode))
}

fn run(args: Args) -> Result<(), StartupError> {
    if let Some(callsign) = &args.callsign {
        validate_callsign(callsign)?;
    }

    let modem_rate = make_codec(args.mode).sample_rate();

    let input_card = Soundcard::new(&args.input_device, modem_rate)?;
    let output_card = Soundcard::new(&args.output_device, modem_rate)?;

    let rx_codecs: HashMap<Mode, Box<dyn Codec>> =
        Mode::ALL.iter().map(|&m| (m, make_codec(m))).collect();

    let kiss_addr: SocketAddr = format!("{}:{}", args.kiss_host, args.kiss_port)
        .parse()
        .map_err(|_| ConfigError::InvalidAddress(args.kiss_host.clone()))?;

    let (bridge, from_clients) = KissBridge::new();
    let bridge = Arc::new(bridge);
    let kiss_for_bind = bridge.clone();
    let kiss = Arc::new(KissTcpServer::bind(kiss_addr, move |payload| {
        kiss_for_bind.on_frame(payload);
    })?);
    info!("KISS TCP listening on {kiss_addr}");

    if args.pts {
        #[cfg(unix)]
        {
            let kiss_for_pts = bridge.clone();
            match tnc_app::transport::pts::PtsTransport::open(move |payload| {
                kiss_for_pts.on_frame(payload);
            }) {
                Ok((pts, _file)) => info!("KISS PTS available at {}", pts.secondary_path),
                Err(e) => error!("{e}"),
            }
        }
        #[cfg(not(unix))]
        {
            error!("--pts is only supported on unix targets");
        }
    }

    let rigctld_addr = if args.rigctld_port == 0 {
        None
    } else {
        format!("{}:{}", args.rigctld_host, args.rigctld_port)
            .parse()
            .ok()
    };
    let ptt = RigctldPtt::new(rigctld_addr);

    let settings = TxSettings {
        ptt_on_delay_ms: args.ptt_on_delay_ms,
        output_volume_db: args.output_volume,
        max_packets_combined: args.max_packets_combined,
    };

    let codec_factory: tnc_app::controller::CodecFactory = Arc::new(make_codec);
    let tx_codec = make_codec(args.mode);

    let soundmodem = Arc::new(Soundmodem::new(
        input_card.input(),
        output_card.output(),
        ptt,
        tx_codec,
        rx_codecs,
        settings,
        |engine| {
            Controller::new(
                kiss.clone(),
                NullChatSink,
                engine,
                codec_factory,
                args.follow,
            )
        },
        LoggingProgress,
    ));
    soundmodem.set_output_device_params(output_card.sample_rate(), output_card.channels() as u32);
    soundmodem.start();

    std::thread::spawn({
        let soundmodem = soundmodem.clone();
        move || {
            while let Ok(packet) = from_clients.recv() {
                soundmodem.write(packet);
            }
        }
    });

    // Block until interrupted; a real deployment would wait on a signal
    // handler here.
    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}
