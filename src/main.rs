//!
//! # aa-headunit
//!
//! A head-unit side implementation of the Android Auto projection protocol:
//! accepts a TCP connection from a phone, negotiates the version/TLS/service
//! discovery handshake, and dispatches the fixed set of logical channels
//! (control, input, sensor, video, three audio classes, bluetooth,
//! navigation, media/phone status, wifi, av-input) to their handlers.
//!
//! This program is free software: you can redistribute it and/or modify it under the terms of the
//! GNU General Public License as published by the Free Software Foundation, either version 3 of
//! the License, or (at your option) any later version.
//!
//! This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
//! without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
//! the GNU General Public License for more details.
//!
//! You should have received a copy of the GNU General Public License along with this program. If
//! not, see <https://www.gnu.org/licenses/>.
//!
#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::*;
use tokio::net::TcpListener;
use validator::Validate;

use aa_core::config::{self, Config};
use aa_core::cryptor::TlsMaterial;
use aa_core::handlers::av::{AudioHandler, VideoHandler};
use aa_core::handlers::input::InputHandler;
use aa_core::handlers::sensor::SensorHandler;
use aa_core::handlers::simple::{IndicationSink, SimpleHandler};
use aa_core::handlers::{ChannelHandler, MediaSink};
use aa_core::night_mode;
use aa_core::protocol_logger::ProtocolLogger;
use aa_core::service_discovery::ServiceDiscoveryBuilder;
use aa_core::session::{HandlerSlot, Session};
use aa_core::transport::{self, ConnectionWatchdog};

#[derive(Parser)]
#[command(name = "aa-headunit", about = "Android Auto projection protocol head unit")]
struct Opt {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `transport.listen_port` from the config file.
    #[arg(long, global = true)]
    listen_port: Option<u16>,

    /// Overrides the `RUST_LOG` default filter.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Writes a TSV trace of every message crossing the wire to this path.
    #[arg(long, global = true)]
    protocol_log: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the head unit, accepting connections until interrupted.
    Run,
}

/// A [`MediaSink`] that just counts and logs frames; actually decoding or
/// rendering media is out of scope for this crate.
struct LoggingMediaSink {
    label: &'static str,
}

impl MediaSink for LoggingMediaSink {
    fn on_media_frame(&mut self, channel_id: u8, body: &[u8], timestamp: u64) {
        debug!("{} channel {channel_id}: {} bytes @ {timestamp}", self.label, body.len());
    }
}

/// An [`IndicationSink`] that just logs; channels using [`SimpleHandler`] have
/// no further behaviour pinned by this crate's scope.
struct LoggingIndicationSink;

impl IndicationSink for LoggingIndicationSink {
    fn on_indication(&mut self, channel_id: u8, message_id: u16, body: &[u8]) {
        debug!("channel {channel_id}: indication {message_id:#06x} ({} bytes)", body.len());
    }
}

fn load_config(path: &PathBuf) -> Result<Config> {
    let raw = fs::read_to_string(path).with_context(|| format!("failed to read {path:?}"))?;
    let config = Config::from_toml_str(&raw).with_context(|| format!("failed to parse {path:?}"))?;
    config.validate().with_context(|| format!("config at {path:?} failed validation"))?;
    Ok(config)
}

fn register_handlers(session: &mut Session<tokio::net::TcpStream>, config: &Config) {
    session.register_handler(HandlerSlot::Av(Box::new(VideoHandler::new(
        3,
        vec![0],
        Box::new(LoggingMediaSink { label: "video" }),
    ))));
    session.register_handler(HandlerSlot::Av(Box::new(AudioHandler::new(
        4,
        Box::new(LoggingMediaSink { label: "media audio" }),
    ))));
    session.register_handler(HandlerSlot::Av(Box::new(AudioHandler::new(
        5,
        Box::new(LoggingMediaSink { label: "speech audio" }),
    ))));
    session.register_handler(HandlerSlot::Av(Box::new(AudioHandler::new(
        6,
        Box::new(LoggingMediaSink { label: "system audio" }),
    ))));

    // KEYCODE_HOME, KEYCODE_BACK, KEYCODE_MICROPHONE
    let (touch_w, touch_h) = ServiceDiscoveryBuilder::input_touch_dims(config);
    session.register_handler(HandlerSlot::Plain(Box::new(InputHandler::new(1, touch_w, touch_h, vec![3, 4, 84]))));
    session.register_handler(HandlerSlot::Plain(Box::new(SensorHandler::new(2))));

    for channel_id in [7u8, 8, 9, 10, 11, 14] {
        let handler: Box<dyn ChannelHandler> =
            Box::new(SimpleHandler::new(channel_id, Box::new(LoggingIndicationSink)));
        session.register_handler(HandlerSlot::Plain(handler));
    }
}

async fn run(opt: Opt) -> Result<()> {
    let conf_path = opt.config.context("must supply --config <path>")?;
    let mut config = load_config(&conf_path)?;
    if let Some(port) = opt.listen_port {
        config.transport.listen_port = port;
    }

    let tls_material = TlsMaterial::load(&config.tls.cert_path, &config.tls.key_path, &config.tls.client_ca_path)
        .with_context(|| "failed to load TLS material")?;

    let protocol_logger = opt
        .protocol_log
        .map(|path| -> Result<Arc<ProtocolLogger>> {
            let logger = ProtocolLogger::new();
            logger.open(path.to_str().context("--protocol-log path must be valid UTF-8")?)?;
            Ok(Arc::new(logger))
        })
        .transpose()?;

    let night_rx = match config.sensors.night_mode.source.as_str() {
        "gpio" => night_mode::spawn_gpio_based(config.sensors.night_mode.gpio_pin, config.sensors.night_mode.gpio_active_high),
        _ => {
            let day_start = config::parse_hh_mm(&config.sensors.night_mode.day_start).expect("validated on load");
            let night_start = config::parse_hh_mm(&config.sensors.night_mode.night_start).expect("validated on load");
            night_mode::spawn_time_based(day_start, night_start)
        }
    };

    let addr = format!("0.0.0.0:{}", config.transport.listen_port);
    let listener = TcpListener::bind(&addr).await.with_context(|| format!("failed to bind {addr}"))?;
    info!("aa-headunit listening on {addr}");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        info!("accepted connection from {peer}");

        if let Err(e) = transport::configure_tcp_socket(&stream) {
            warn!("{peer}: failed to configure socket, dropping: {e}");
            continue;
        }

        let session_config = ServiceDiscoveryBuilder::build(&config);
        let watchdog = ConnectionWatchdog::new(&stream);
        let mut session = Session::new(stream, session_config, Some(tls_material.clone()));
        session.set_watchdog(move || watchdog.check());
        session.set_night_mode(night_rx.clone());
        if let Some(logger) = &protocol_logger {
            session.attach_logger(logger.clone());
        }
        register_handlers(&mut session, &config);

        tokio::spawn(async move {
            let reason = session.run().await;
            info!("{peer}: session ended ({reason:?})");
        });
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();
    let default_filter = opt.log_level.clone().unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    info!("aa-headunit {}", env!("CARGO_PKG_VERSION"));

    match &opt.cmd {
        None | Some(Command::Run) => run(opt).await,
    }
}
