//! The per-connection state machine: drives one accepted transport from
//! `Idle` through the version/TLS/service-discovery handshake into `Active`,
//! dispatches channel traffic to registered handlers, and tears everything
//! down into a single `disconnected(reason)` outcome.
//!
//! One `Session` owns exactly one [`Messenger`]; the listener loop (outside
//! this crate) spawns one task per accepted connection and calls
//! [`Session::run`] on it. There is no shared mutable state between
//! sessions beyond what they're explicitly handed (a [`ProtocolLogger`],
//! a night-mode `watch::Receiver`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, info, warn};
use prost::Message as _;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::time::Interval;
use tokio_util::sync::CancellationToken;

use crate::control_channel::{self, ControlChannel, ControlEvent};
use crate::cryptor::{Cryptor, HandshakeProgress, TlsMaterial};
use crate::error::{DisconnectReason, Error, Result};
use crate::handlers::{
    AVHandler, ChannelHandler, ExternalSignal, OutgoingMessage, MSG_AV_MEDIA_INDICATION, MSG_AV_MEDIA_WITH_TIMESTAMP,
};
use crate::messenger::{Messenger, MessengerSink};
use crate::proto;
use crate::protocol_logger::ProtocolLogger;
use crate::service_discovery::SessionConfig;

/// One entry in the handler registry. `Session` needs to call both the
/// `ChannelHandler` methods every handler has and, for the four AV
/// channels, `on_media_data`/`can_accept_media` — but this edition has no
/// trait-object upcasting from `&mut dyn AVHandler` to `&mut dyn
/// ChannelHandler`, so the registry stores one or the other explicitly and
/// forwards by hand instead of trying to coerce between them.
pub enum HandlerSlot {
    Plain(Box<dyn ChannelHandler>),
    Av(Box<dyn AVHandler>),
}

impl HandlerSlot {
    pub fn channel_id(&self) -> u8 {
        match self {
            HandlerSlot::Plain(h) => h.channel_id(),
            HandlerSlot::Av(h) => h.channel_id(),
        }
    }

    fn on_channel_opened(&mut self) -> Vec<OutgoingMessage> {
        match self {
            HandlerSlot::Plain(h) => h.on_channel_opened(),
            HandlerSlot::Av(h) => h.on_channel_opened(),
        }
    }

    fn on_channel_closed(&mut self) {
        match self {
            HandlerSlot::Plain(h) => h.on_channel_closed(),
            HandlerSlot::Av(h) => h.on_channel_closed(),
        }
    }

    fn on_message(&mut self, message_id: u16, body: &[u8]) -> Vec<OutgoingMessage> {
        match self {
            HandlerSlot::Plain(h) => h.on_message(message_id, body),
            HandlerSlot::Av(h) => h.on_message(message_id, body),
        }
    }

    fn as_av_mut(&mut self) -> Option<&mut dyn AVHandler> {
        match self {
            HandlerSlot::Av(h) => Some(h.as_mut()),
            HandlerSlot::Plain(_) => None,
        }
    }

    fn on_external_signal(&mut self, signal: ExternalSignal) -> Vec<OutgoingMessage> {
        match self {
            HandlerSlot::Plain(h) => h.on_external_signal(signal),
            HandlerSlot::Av(h) => h.on_external_signal(signal),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Connecting,
    VersionExchange,
    TlsHandshake,
    ServiceDiscovery,
    Active,
    ShuttingDown,
    Disconnected(DisconnectReason),
}

fn state_label(state: State) -> &'static str {
    match state {
        State::Idle => "idle",
        State::Connecting => "connecting",
        State::VersionExchange => "version exchange",
        State::TlsHandshake => "tls handshake",
        State::ServiceDiscovery => "service discovery",
        State::Active => "active",
        State::ShuttingDown => "shutting down",
        State::Disconnected(_) => "disconnected",
    }
}

/// Collects the events one `dispatch_ready` pass produces, so `Session`
/// doesn't have to pass `&mut self` into `Messenger` while also being the
/// sink `Messenger` calls back into — the same borrow Messenger's own tests
/// sidestep with a recording sink.
#[derive(Default)]
struct EventSink {
    messages: Vec<(u8, u16, Bytes, usize)>,
    handshake: Vec<(u8, Bytes)>,
    errors: Vec<Error>,
}

impl MessengerSink for EventSink {
    fn on_message(&mut self, channel_id: u8, message_id: u16, payload: Bytes, data_offset: usize) {
        self.messages.push((channel_id, message_id, payload, data_offset));
    }
    fn on_ssl_handshake_data(&mut self, channel_id: u8, data: Bytes) {
        self.handshake.push((channel_id, data));
    }
    fn on_error(&mut self, err: Error) {
        self.errors.push(err);
    }
}

/// Waits on an optional deadline; with `None`, waits forever rather than
/// needing a boxed/pinned future just to make the `select!` arm type-check.
async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d.into()).await,
        None => std::future::pending::<()>().await,
    }
}

/// Ticks an optional interval; with `None`, never resolves. Shared by the
/// ping timer and the (optional) watchdog poll so neither has to special-case
/// "not armed" at the `select!` site.
async fn tick_interval(interval: &mut Option<Interval>) -> bool {
    match interval {
        Some(iv) => {
            iv.tick().await;
            true
        }
        None => std::future::pending().await,
    }
}

/// Awaits the next change on an optional `watch::Receiver`; with `None`, or
/// once the sender side is dropped, never resolves again. Shared shape with
/// `tick_interval`/`sleep_until_or_forever` so the `select!` loop treats
/// every "maybe not wired up" input uniformly.
async fn watch_changed(rx: &mut Option<watch::Receiver<bool>>) -> Option<bool> {
    match rx {
        Some(inner) => match inner.changed().await {
            Ok(()) => Some(*inner.borrow()),
            Err(_) => {
                *rx = None;
                std::future::pending().await
            }
        },
        None => std::future::pending().await,
    }
}

async fn wait_for_stop(token: &CancellationToken, already_fired: bool) {
    if already_fired {
        std::future::pending::<()>().await
    } else {
        token.cancelled().await
    }
}

fn current_time_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

const WATCHDOG_INTERVAL_MS: u64 = 2000;

/// Drives one accepted connection through the handshake and into steady
/// `Active` channel dispatch. Generic over any `AsyncRead + AsyncWrite`
/// transport so tests can drive it over `tokio::io::duplex()` instead of a
/// real socket.
pub struct Session<T> {
    messenger: Messenger<T>,
    state: State,
    config: SessionConfig,
    tls_material: Option<TlsMaterial>,
    handlers: HashMap<u8, HandlerSlot>,
    deadline: Option<Instant>,
    ping_interval: Option<Interval>,
    missed_pings: u32,
    watchdog: Option<Box<dyn Fn() -> bool + Send>>,
    watchdog_interval: Option<Interval>,
    night_mode: Option<watch::Receiver<bool>>,
    cancel: CancellationToken,
    stop_requested: bool,
}

impl<T> Session<T> {
    /// `tls_material` is `None` only in tests that never drive the session
    /// past version exchange; the production listener always supplies one.
    pub fn new(transport: T, config: SessionConfig, tls_material: Option<TlsMaterial>) -> Self {
        Session {
            messenger: Messenger::new(transport),
            state: State::Idle,
            config,
            tls_material,
            handlers: HashMap::new(),
            deadline: None,
            ping_interval: None,
            missed_pings: 0,
            watchdog: None,
            watchdog_interval: None,
            night_mode: None,
            cancel: CancellationToken::new(),
            stop_requested: false,
        }
    }

    pub fn register_handler(&mut self, handler: HandlerSlot) {
        self.handlers.insert(handler.channel_id(), handler);
    }

    /// Subscribes to a shared night-mode signal; every change is broadcast
    /// to every registered handler's [`ChannelHandler::on_external_signal`]
    /// (in practice only the sensor channel's handler reacts).
    pub fn set_night_mode(&mut self, rx: watch::Receiver<bool>) {
        self.night_mode = Some(rx);
    }

    /// Wires a connection-health check (normally [`crate::transport::ConnectionWatchdog::check`])
    /// to be polled every 2s while `Active`. The watchdog itself needs a
    /// concrete `TcpStream`'s raw fd, which a generic `T` can't provide, so
    /// the listener builds it against the real socket and hands in a closure.
    pub fn set_watchdog(&mut self, check: impl Fn() -> bool + Send + 'static) {
        self.watchdog = Some(Box::new(check));
        self.watchdog_interval = Some(tokio::time::interval(Duration::from_millis(WATCHDOG_INTERVAL_MS)));
    }

    /// A clone of the stop token; call `.cancel()` on it from outside to
    /// request a graceful `SHUTDOWN_REQUEST` round-trip.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Attaches a protocol trace tap shared across sessions.
    pub fn attach_logger(&mut self, logger: Arc<ProtocolLogger>) {
        self.messenger.attach_logger(logger);
    }

    fn arm_deadline(&mut self, ms: u64) {
        self.deadline = Some(Instant::now() + Duration::from_millis(ms));
    }

    fn clear_deadline(&mut self) {
        self.deadline = None;
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Session<T> {
    /// Runs the full state machine to completion, returning the reason the
    /// session ended. Consumes `self`: a finished session is not reusable,
    /// matching property 9 (state monotonicity) — a fresh `Session` is the
    /// only way back to `Idle`.
    pub async fn run(mut self) -> DisconnectReason {
        if let Err(e) = self.enter_version_exchange().await {
            return self.fail(e);
        }

        loop {
            tokio::select! {
                biased;

                _ = wait_for_stop(&self.cancel, self.stop_requested) => {
                    self.stop_requested = true;
                    if !matches!(self.state, State::ShuttingDown | State::Disconnected(_)) {
                        if let Err(e) = self.begin_shutdown().await {
                            return self.fail(e);
                        }
                    }
                }

                _ = sleep_until_or_forever(self.deadline) => {
                    let label = state_label(self.state);
                    return self.fail(Error::Timeout(label));
                }

                fired = tick_interval(&mut self.ping_interval) => {
                    if fired {
                        if let Err(e) = self.on_ping_tick().await {
                            return self.fail(e);
                        }
                    }
                }

                fired = tick_interval(&mut self.watchdog_interval) => {
                    if fired && matches!(self.state, State::Active) {
                        let unhealthy = self.watchdog.as_ref().map(|w| w()).unwrap_or(false);
                        if unhealthy {
                            return self.teardown(DisconnectReason::TransportError);
                        }
                    }
                }

                night = watch_changed(&mut self.night_mode) => {
                    if let Some(is_night) = night {
                        if let Err(e) = self.broadcast_night_mode(is_night).await {
                            return self.fail(e);
                        }
                    }
                }

                n = self.messenger.recv_some() => {
                    match n {
                        Ok(0) => return self.teardown(DisconnectReason::TransportError),
                        Ok(_) => {
                            if let Err(e) = self.drain_incoming().await {
                                return self.fail(e);
                            }
                            if let State::Disconnected(reason) = self.state {
                                return self.teardown(reason);
                            }
                        }
                        Err(e) => return self.fail(e),
                    }
                }
            }
        }
    }

    async fn enter_version_exchange(&mut self) -> Result<()> {
        self.state = State::VersionExchange;
        let out = ControlChannel::encode_version_request(self.config.protocol_major, self.config.protocol_minor);
        self.messenger.send_message(0, out.msg_id, &out.body).await?;
        self.arm_deadline(self.config.version_timeout_ms);
        Ok(())
    }

    /// Runs one `dispatch_ready` pass, collecting its events first (see
    /// [`EventSink`]) then handing each to the state-appropriate handler —
    /// `Messenger::dispatch_ready` needs `&mut dyn MessengerSink`, and `self`
    /// can't be both that sink and the thing holding `&mut self.messenger`.
    async fn drain_incoming(&mut self) -> Result<()> {
        let mut sink = EventSink::default();
        self.messenger.dispatch_ready(&mut sink)?;

        for err in sink.errors {
            warn!("messenger reported a non-fatal error: {err}");
        }
        for (channel_id, data) in sink.handshake {
            self.on_ssl_handshake_data(channel_id, &data).await?;
            if matches!(self.state, State::Disconnected(_)) {
                return Ok(());
            }
        }
        for (channel_id, message_id, payload, data_offset) in sink.messages {
            self.on_message(channel_id, message_id, &payload[data_offset..]).await?;
            if matches!(self.state, State::Disconnected(_)) {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn on_ssl_handshake_data(&mut self, channel_id: u8, data: &[u8]) -> Result<()> {
        if !matches!(self.state, State::VersionExchange | State::TlsHandshake) {
            return Ok(());
        }
        if matches!(self.state, State::VersionExchange) {
            // The phone can interleave SSL_HANDSHAKE bytes as soon as it's
            // sent VERSION_RESPONSE; Cryptor is built lazily here rather
            // than assuming VERSION_RESPONSE always arrives as its own frame
            // first.
            self.begin_tls_handshake()?;
        }
        let cryptor = self.messenger.cryptor_mut().expect("cryptor installed by begin_tls_handshake");
        cryptor.write_handshake_buffer(data)?;
        self.drive_handshake().await
    }

    fn begin_tls_handshake(&mut self) -> Result<()> {
        self.state = State::TlsHandshake;
        let material = self
            .tls_material
            .as_ref()
            .ok_or_else(|| Error::Tls("no TLS material configured for this session".into()))?;
        let cryptor = Cryptor::begin_handshake(material)?;
        self.messenger.install_cryptor(cryptor);
        self.arm_deadline(self.config.handshake_timeout_ms);
        Ok(())
    }

    async fn drive_handshake(&mut self) -> Result<()> {
        let progress = {
            let cryptor = self.messenger.cryptor_mut().expect("cryptor installed before driving handshake");
            cryptor.do_handshake()?
        };
        let outbound = {
            let cryptor = self.messenger.cryptor_mut().expect("cryptor installed before draining handshake bytes");
            cryptor.read_handshake_buffer()?
        };
        if !outbound.is_empty() {
            self.messenger.send_handshake_bytes(0, &outbound).await?;
        }
        if progress == HandshakeProgress::Done {
            self.messenger.mark_encrypted();
            let out = ControlChannel::encode_auth_complete(true);
            self.messenger.send_message(0, out.msg_id, &out.body).await?;
            self.state = State::ServiceDiscovery;
            self.arm_deadline(self.config.discovery_timeout_ms);
        }
        Ok(())
    }

    async fn on_message(&mut self, channel_id: u8, message_id: u16, body: &[u8]) -> Result<()> {
        match self.state {
            State::VersionExchange => self.handle_version_exchange(channel_id, message_id, body).await,
            State::ServiceDiscovery => self.handle_service_discovery(channel_id, message_id, body).await,
            State::Active => self.handle_active(channel_id, message_id, body).await,
            State::ShuttingDown => self.handle_shutting_down(message_id).await,
            // TlsHandshake's only traffic is SSL_HANDSHAKE, routed via
            // on_ssl_handshake_data before this method is ever reached; any
            // ordinary message here is out-of-sequence noise and dropped.
            _ => {
                debug!("dropping message {message_id:#06x} on channel {channel_id} while {:?}", self.state);
                Ok(())
            }
        }
    }

    async fn handle_version_exchange(&mut self, channel_id: u8, message_id: u16, body: &[u8]) -> Result<()> {
        if channel_id != 0 || message_id != control_channel::MSG_VERSION_RESPONSE {
            return Ok(());
        }
        let (event, _) = ControlChannel::handle_message(message_id, body);
        match event {
            ControlEvent::VersionReceived { major, minor, matched: true } => {
                info!("peer accepted protocol version {major}.{minor}");
                self.begin_tls_handshake()
            }
            ControlEvent::VersionReceived { major, minor, matched: false } => {
                Err(Error::VersionMismatch { major, minor, status: 1 })
            }
            _ => Ok(()),
        }
    }

    async fn handle_service_discovery(&mut self, channel_id: u8, message_id: u16, body: &[u8]) -> Result<()> {
        if channel_id != 0 || message_id != control_channel::MSG_SERVICE_DISCOVERY_REQUEST {
            return Ok(());
        }
        let (event, _) = ControlChannel::handle_message(message_id, body);
        if !matches!(event, ControlEvent::ServiceDiscoveryRequested) {
            return Ok(());
        }
        let response = self.build_service_discovery_response();
        let out = ControlChannel::encode_service_discovery_response(&response);
        self.messenger.send_message(0, out.msg_id, &out.body).await?;
        self.enter_active();
        // A handler that subscribes to night_mode only reacts to the next
        // transition via watch_changed; push the value already in flight so
        // a session that starts mid-night doesn't wait out the clock.
        if let Some(rx) = &self.night_mode {
            let is_night = *rx.borrow();
            self.broadcast_night_mode(is_night).await?;
        }
        Ok(())
    }

    fn build_service_discovery_response(&self) -> proto::ServiceDiscoveryResponse {
        proto::ServiceDiscoveryResponse {
            head_unit_name: self.config.head_unit_name.clone(),
            car_model: self.config.car_model.clone(),
            car_year: self.config.car_year.clone(),
            car_serial: self.config.car_serial.clone(),
            left_hand_drive_vehicle: self.config.left_hand_drive,
            headunit_manufacturer: self.config.manufacturer.clone(),
            headunit_model: self.config.model.clone(),
            sw_build: self.config.sw_build.clone(),
            sw_version: self.config.sw_version.clone(),
            can_play_native_media_during_vr: false,
            channels: self.config.channels.iter().map(|(_, d)| d.clone()).collect(),
        }
    }

    fn enter_active(&mut self) {
        self.state = State::Active;
        self.clear_deadline();
        self.missed_pings = 0;
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.ping_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        self.ping_interval = Some(interval);
        info!("session active");
    }

    async fn on_ping_tick(&mut self) -> Result<()> {
        if !matches!(self.state, State::Active) {
            return Ok(());
        }
        self.missed_pings += 1;
        if self.missed_pings > 3 {
            return Err(Error::PingTimeout(self.missed_pings));
        }
        let out = ControlChannel::encode_ping_request(current_time_ms());
        self.messenger.send_message(0, out.msg_id, &out.body).await
    }

    async fn broadcast_night_mode(&mut self, is_night: bool) -> Result<()> {
        if !matches!(self.state, State::Active) {
            return Ok(());
        }
        let mut outgoing = Vec::new();
        for slot in self.handlers.values_mut() {
            outgoing.extend(slot.on_external_signal(ExternalSignal::NightMode(is_night)));
        }
        self.send_all(outgoing).await
    }

    async fn handle_active(&mut self, channel_id: u8, message_id: u16, body: &[u8]) -> Result<()> {
        if message_id == control_channel::MSG_CHANNEL_OPEN_REQUEST {
            return self.handle_channel_open_request(channel_id, body).await;
        }
        if channel_id == 0 {
            return self.handle_control_active(message_id, body).await;
        }
        if matches!(message_id, MSG_AV_MEDIA_WITH_TIMESTAMP | MSG_AV_MEDIA_INDICATION) {
            return self.handle_media(channel_id, message_id, body).await;
        }

        let Some(slot) = self.handlers.get_mut(&channel_id) else {
            debug!("message for unregistered channel {channel_id}, dropping");
            return Ok(());
        };
        let outgoing = slot.on_message(message_id, body);
        self.send_all(outgoing).await
    }

    async fn handle_channel_open_request(&mut self, arrived_on: u8, body: &[u8]) -> Result<()> {
        let target = match proto::ChannelOpenRequest::decode(body) {
            Ok(req) => req.channel_id as u8,
            Err(e) => {
                warn!("malformed CHANNEL_OPEN_REQUEST: {e}");
                return Ok(());
            }
        };
        let accepted = self.handlers.contains_key(&target);
        let out = ControlChannel::encode_channel_open_response(accepted);
        self.messenger.send_message(arrived_on, out.msg_id, &out.body).await?;
        if accepted {
            if let Some(slot) = self.handlers.get_mut(&target) {
                let opened = slot.on_channel_opened();
                self.send_all(opened).await?;
            }
        } else {
            warn!("CHANNEL_OPEN_REQUEST for unregistered channel {target}");
        }
        Ok(())
    }

    async fn handle_media(&mut self, channel_id: u8, message_id: u16, body: &[u8]) -> Result<()> {
        let timestamp = if message_id == MSG_AV_MEDIA_WITH_TIMESTAMP && body.len() >= 8 {
            u64::from_be_bytes(body[..8].try_into().unwrap())
        } else {
            0
        };
        let frame_body = if message_id == MSG_AV_MEDIA_WITH_TIMESTAMP && body.len() >= 8 { &body[8..] } else { body };

        let Some(slot) = self.handlers.get_mut(&channel_id) else {
            debug!("media on unregistered channel {channel_id}, dropping");
            return Ok(());
        };
        let Some(av) = slot.as_av_mut() else {
            warn!("media on channel {channel_id}, which has no AV handler registered");
            return Ok(());
        };
        if !av.can_accept_media() {
            return Ok(());
        }
        let outgoing = av.on_media_data(frame_body, timestamp);
        self.send_all(outgoing).await
    }

    async fn handle_control_active(&mut self, message_id: u16, body: &[u8]) -> Result<()> {
        let (event, auto_response) = ControlChannel::handle_message(message_id, body);
        if let Some(out) = auto_response {
            self.messenger.send_message(0, out.msg_id, &out.body).await?;
        }

        match event {
            ControlEvent::PongReceived => {
                self.missed_pings = 0;
            }
            ControlEvent::NavigationFocusRequested => {
                let focus_type = proto::NavFocusRequest::decode(body).map(|r| r.focus_type).unwrap_or(0);
                let out = ControlChannel::encode_nav_focus_response(focus_type);
                self.messenger.send_message(0, out.msg_id, &out.body).await?;
            }
            ControlEvent::AudioFocusRequested(kind) => {
                let response_type = control_channel::map_audio_focus(kind);
                let out = ControlChannel::encode_audio_focus_response(response_type);
                self.messenger.send_message(0, out.msg_id, &out.body).await?;
            }
            ControlEvent::VoiceSessionRequested => {
                debug!("voice session requested by peer");
            }
            ControlEvent::ShutdownRequested => {
                let out = ControlChannel::encode_shutdown_response();
                self.messenger.send_message(0, out.msg_id, &out.body).await?;
                self.state = State::Disconnected(DisconnectReason::Normal);
            }
            ControlEvent::ShutdownAcknowledged | ControlEvent::ChannelCloseNotification => {}
            ControlEvent::CallAvailabilityUnexpected | ControlEvent::ServiceDiscoveryUpdateUnhandled => {
                debug!("ignoring post-handshake control message {message_id:#06x}");
            }
            ControlEvent::Unknown { msg_id } => {
                debug!("unhandled control message {msg_id:#06x}");
            }
            ControlEvent::VersionReceived { .. }
            | ControlEvent::SslHandshakeData(_)
            | ControlEvent::ServiceDiscoveryRequested
            | ControlEvent::ChannelOpenRequested { .. } => {
                // Reached only for out-of-sequence retransmits of
                // handshake-phase messages; nothing to do once Active.
            }
        }
        Ok(())
    }

    async fn handle_shutting_down(&mut self, message_id: u16) -> Result<()> {
        if message_id == control_channel::MSG_SHUTDOWN_RESPONSE {
            self.state = State::Disconnected(DisconnectReason::Normal);
        }
        Ok(())
    }

    async fn begin_shutdown(&mut self) -> Result<()> {
        let out = ControlChannel::encode_shutdown_request();
        self.messenger.send_message(0, out.msg_id, &out.body).await?;
        self.state = State::ShuttingDown;
        self.ping_interval = None;
        self.arm_deadline(5000);
        Ok(())
    }

    async fn send_all(&mut self, messages: Vec<OutgoingMessage>) -> Result<()> {
        for m in messages {
            self.messenger.send_message(m.channel_id, m.message_id, &m.body).await?;
        }
        Ok(())
    }

    fn teardown(&mut self, reason: DisconnectReason) -> DisconnectReason {
        self.ping_interval = None;
        self.watchdog_interval = None;
        self.deadline = None;
        self.messenger.clear_reassembly();
        for slot in self.handlers.values_mut() {
            slot.on_channel_closed();
        }
        self.state = State::Disconnected(reason);
        info!("session disconnected: {reason:?}");
        reason
    }

    fn fail(&mut self, err: Error) -> DisconnectReason {
        warn!("session failed: {err}");
        let reason = err.disconnect_reason();
        self.teardown(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::simple::{IndicationSink, SimpleHandler};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn test_config() -> SessionConfig {
        SessionConfig {
            head_unit_name: "test-hu".into(),
            manufacturer: "Test".into(),
            model: "test-hu".into(),
            sw_version: "0.1".into(),
            sw_build: "1".into(),
            car_model: "Universal".into(),
            car_year: "2024".into(),
            car_serial: "00000000".into(),
            left_hand_drive: true,
            protocol_major: 1,
            protocol_minor: 7,
            version_timeout_ms: 200,
            handshake_timeout_ms: 200,
            discovery_timeout_ms: 200,
            ping_interval_ms: 100,
            channels: Vec::new(),
        }
    }

    struct NullSink;
    impl IndicationSink for NullSink {
        fn on_indication(&mut self, _channel_id: u8, _message_id: u16, _body: &[u8]) {}
    }

    async fn read_frame_message_id(stream: &mut DuplexStream) -> u16 {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await.unwrap();
        let size = u16::from_be_bytes([header[2], header[3]]) as usize;
        let mut payload = vec![0u8; size];
        stream.read_exact(&mut payload).await.unwrap();
        u16::from_be_bytes([payload[0], payload[1]])
    }

    #[tokio::test]
    async fn version_mismatch_disconnects_without_touching_tls() {
        let (mut peer, hu) = duplex(4096);
        let session = Session::new(hu, test_config(), None);

        let run = tokio::spawn(session.run());

        // Drain the VERSION_REQUEST the session sends on entry.
        assert_eq!(read_frame_message_id(&mut peer).await, control_channel::MSG_VERSION_REQUEST);

        let resp = [0x00u8, 0x01, 0x00, 0x07, 0x00, 0x01]; // status != 0
        let mut frame = Vec::new();
        crate::frame::serialize_frame(
            0,
            crate::frame::FrameType::Bulk,
            crate::frame::MessageType::Control,
            crate::frame::EncryptionType::Plain,
            None,
            &{
                let mut body = control_channel::MSG_VERSION_RESPONSE.to_be_bytes().to_vec();
                body.extend_from_slice(&resp);
                body
            },
            &mut frame,
        );
        peer.write_all(&frame).await.unwrap();

        let reason = run.await.unwrap();
        assert_eq!(reason, DisconnectReason::VersionMismatch);
    }

    async fn read_frame(stream: &mut DuplexStream) -> (u16, Vec<u8>) {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await.unwrap();
        let size = u16::from_be_bytes([header[2], header[3]]) as usize;
        let mut payload = vec![0u8; size];
        stream.read_exact(&mut payload).await.unwrap();
        (u16::from_be_bytes([payload[0], payload[1]]), payload[2..].to_vec())
    }

    #[tokio::test]
    async fn registered_channel_open_is_accepted_and_opens_handler() {
        let (mut peer, hu) = duplex(4096);
        let mut session = Session::new(hu, test_config(), None);
        session.register_handler(HandlerSlot::Plain(Box::new(SimpleHandler::new(9, Box::new(NullSink)))));
        session.enter_active();

        let req = proto::ChannelOpenRequest { channel_id: 9, priority: 0 };
        session.handle_active(0, control_channel::MSG_CHANNEL_OPEN_REQUEST, &req.encode_to_vec()).await.unwrap();

        let (msg_id, body) = read_frame(&mut peer).await;
        assert_eq!(msg_id, control_channel::MSG_CHANNEL_OPEN_RESPONSE);
        let resp = proto::ChannelOpenResponse::decode(&body[..]).unwrap();
        assert_eq!(resp.status, proto::Status::Ok as i32);
    }

    #[tokio::test]
    async fn unregistered_channel_open_is_rejected() {
        let (mut peer, hu) = duplex(4096);
        let mut session = Session::new(hu, test_config(), None);
        session.enter_active();

        let req = proto::ChannelOpenRequest { channel_id: 42, priority: 0 };
        session.handle_active(0, control_channel::MSG_CHANNEL_OPEN_REQUEST, &req.encode_to_vec()).await.unwrap();

        let (msg_id, body) = read_frame(&mut peer).await;
        assert_eq!(msg_id, control_channel::MSG_CHANNEL_OPEN_RESPONSE);
        let resp = proto::ChannelOpenResponse::decode(&body[..]).unwrap();
        assert_eq!(resp.status, proto::Status::InvalidChannel as i32);
    }

    #[tokio::test]
    async fn ping_timeout_disconnects_after_four_missed_pings() {
        let mut cfg = test_config();
        cfg.ping_interval_ms = 10;
        let (_peer, hu) = duplex(4096);
        let session = Session::new(hu, cfg, None);
        let mut session = session;
        session.enter_active();

        for _ in 0..3 {
            session.on_ping_tick().await.unwrap();
        }
        let result = session.on_ping_tick().await;
        assert!(matches!(result, Err(Error::PingTimeout(_))));
    }

    #[tokio::test]
    async fn shutdown_request_reaches_disconnected_normal() {
        let (mut peer, hu) = duplex(4096);
        let mut session = Session::new(hu, test_config(), None);
        session.enter_active();

        let shutdown = proto::ShutdownRequest { reason: proto::ShutdownReason::Quit as i32 };
        session
            .handle_active(0, control_channel::MSG_SHUTDOWN_REQUEST, &shutdown.encode_to_vec())
            .await
            .unwrap();

        assert_eq!(read_frame_message_id(&mut peer).await, control_channel::MSG_SHUTDOWN_RESPONSE);
        assert_eq!(session.state, State::Disconnected(DisconnectReason::Normal));
    }

    #[tokio::test]
    async fn night_mode_change_reaches_subscribed_sensor_handler() {
        use crate::handlers::sensor::SensorHandler;

        const MSG_SENSOR_START_REQUEST: u16 = 0x0001;
        const MSG_SENSOR_EVENT_INDICATION: u16 = 0x0003;

        let (mut peer, hu) = duplex(4096);
        let mut session = Session::new(hu, test_config(), None);
        session.register_handler(HandlerSlot::Plain(Box::new(SensorHandler::new(2))));
        session.enter_active();

        let req = proto::SensorStartRequest { sensor_type: proto::SensorType::NightData as i32, refresh_interval_ms: 1000 };
        session.handle_active(2, MSG_SENSOR_START_REQUEST, &req.encode_to_vec()).await.unwrap();
        // drain the SENSOR_START_RESPONSE that triggers
        let _ = read_frame(&mut peer).await;

        let (_tx, rx) = watch::channel(false);
        session.set_night_mode(rx);

        session.broadcast_night_mode(true).await.unwrap();
        let (msg_id, body) = read_frame(&mut peer).await;
        assert_eq!(msg_id, MSG_SENSOR_EVENT_INDICATION);
        let ind = proto::SensorEventIndication::decode(&body[..]).unwrap();
        assert!(ind.night_mode.unwrap().is_night);
    }
}
