//! One handler per logical channel. The common `ChannelHandler` contract
//! plus the narrower `AVHandler` sub-trait for the four media-carrying
//! channels (video, media audio, speech audio, system audio).
//!
//! Handlers are plain structs owning only their own state; `Session` holds
//! them as `Box<dyn ChannelHandler>` (or `Box<dyn AVHandler>`) keyed by
//! channel id. They never call back into Messenger directly — instead
//! `on_channel_opened`/`on_message`/`on_media_data` return the zero or more
//! messages they want sent, and `Session` forwards those to the Messenger.
//! This is the synchronous-return-value shape of the spec's "send-interface
//! provided at registration": handler trait methods stay plain `&mut self`
//! functions rather than async, since there is no `async fn` in trait
//! objects without pulling in a crate this codebase doesn't otherwise need.

pub mod av;
pub mod input;
pub mod sensor;
pub mod simple;

/// A message a handler wants delivered on its own channel.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub channel_id: u8,
    pub message_id: u16,
    pub body: Vec<u8>,
}

impl OutgoingMessage {
    pub fn new(channel_id: u8, message_id: u16, body: Vec<u8>) -> Self {
        OutgoingMessage { channel_id, message_id, body }
    }
}

/// An out-of-band signal a handler may react to, independent of anything
/// the phone sent. Broadcast to every registered handler; only the ones
/// that care override [`ChannelHandler::on_external_signal`].
#[derive(Debug, Clone, Copy)]
pub enum ExternalSignal {
    NightMode(bool),
}

/// Common contract every channel handler implements.
pub trait ChannelHandler: Send {
    fn channel_id(&self) -> u8;

    /// Invariant: called before any `on_message`, exactly once per
    /// CHANNEL_OPEN_REQUEST accepted for this channel.
    fn on_channel_opened(&mut self) -> Vec<OutgoingMessage>;

    /// Invariant: terminates delivery; called on session teardown.
    fn on_channel_closed(&mut self);

    fn on_message(&mut self, message_id: u16, body: &[u8]) -> Vec<OutgoingMessage>;

    /// Reacts to a signal that didn't arrive over the wire. Default is a
    /// no-op; `SensorHandler` is the only implementor that currently cares.
    fn on_external_signal(&mut self, _signal: ExternalSignal) -> Vec<OutgoingMessage> {
        Vec::new()
    }
}

/// Receives decoded media frames. Forwarding them to an actual decoder/sink
/// is out of scope (§1 Non-goals) — handlers only need a place to hand
/// frames to; production wires a real sink, tests use a recording one.
pub trait MediaSink: Send {
    fn on_media_frame(&mut self, channel_id: u8, body: &[u8], timestamp: u64);
}

/// Additional contract for the four AV (video + 3 audio classes) channels.
pub trait AVHandler: ChannelHandler {
    fn on_media_data(&mut self, body: &[u8], timestamp: u64) -> Vec<OutgoingMessage>;
    fn can_accept_media(&self) -> bool;
}

pub(crate) const MSG_AV_SETUP_REQUEST: u16 = 0x8000;
pub(crate) const MSG_AV_SETUP_RESPONSE: u16 = 0x8001;
pub(crate) const MSG_AV_START_INDICATION: u16 = 0x8002;
pub(crate) const MSG_AV_STOP_INDICATION: u16 = 0x8003;
pub(crate) const MSG_AV_MEDIA_ACK_INDICATION: u16 = 0x8004;
pub(crate) const MSG_VIDEO_FOCUS_REQUEST: u16 = 0x8005;
pub(crate) const MSG_VIDEO_FOCUS_INDICATION: u16 = 0x8006;

pub const MSG_AV_MEDIA_WITH_TIMESTAMP: u16 = 0x0000;
pub const MSG_AV_MEDIA_INDICATION: u16 = 0x0001;

pub(crate) const MSG_INPUT_EVENT_INDICATION: u16 = 0x0001;
pub(crate) const MSG_BINDING_REQUEST: u16 = 0x0002;
pub(crate) const MSG_BINDING_RESPONSE: u16 = 0x0003;

pub(crate) const MSG_SENSOR_START_REQUEST: u16 = 0x0001;
pub(crate) const MSG_SENSOR_START_RESPONSE: u16 = 0x0002;
pub(crate) const MSG_SENSOR_EVENT_INDICATION: u16 = 0x0003;
