//! Wire protocol and session engine for the head-unit side of the Android
//! Auto projection protocol: frame codec, TLS bracket, control-channel
//! codec, per-channel handlers, service discovery, and the `Session` state
//! machine tying them together. Transport and UI are out of scope (see the
//! `aa-headunit` binary crate) — this crate knows nothing about sockets
//! beyond `AsyncRead + AsyncWrite`, and nothing about a screen at all.

pub mod config;
pub mod control_channel;
pub mod cryptor;
pub mod error;
pub mod frame;
pub mod handlers;
pub mod messenger;
pub mod night_mode;
pub mod proto;
pub mod protocol_logger;
pub mod service_discovery;
pub mod session;
pub mod transport;

pub use error::{ConfigError, DisconnectReason, Error, Result};
