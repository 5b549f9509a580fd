//! Encoding/decoding for channel 0, the control channel.
//!
//! Grounded in the same message-id table the whole protocol is built
//! around: version exchange, the TLS handshake byte pipe, service
//! discovery, channel lifecycle, ping/pong, focus negotiation, and
//! shutdown. `ControlChannel` itself is stateless beyond the protocol
//! version it advertises; all session-state lives in [`Session`](crate::session::Session).

use log::{debug, warn};
use prost::Message as _;

use crate::proto;

pub const MSG_VERSION_REQUEST: u16 = 0x0001;
pub const MSG_VERSION_RESPONSE: u16 = 0x0002;
pub const MSG_SSL_HANDSHAKE: u16 = 0x0003;
pub const MSG_AUTH_COMPLETE: u16 = 0x0004;
pub const MSG_SERVICE_DISCOVERY_REQUEST: u16 = 0x0005;
pub const MSG_SERVICE_DISCOVERY_RESPONSE: u16 = 0x0006;
pub const MSG_CHANNEL_OPEN_REQUEST: u16 = 0x0007;
pub const MSG_CHANNEL_OPEN_RESPONSE: u16 = 0x0008;
pub const MSG_CHANNEL_CLOSE: u16 = 0x0009;
pub const MSG_PING_REQUEST: u16 = 0x000b;
pub const MSG_PING_RESPONSE: u16 = 0x000c;
pub const MSG_NAV_FOCUS_REQUEST: u16 = 0x000d;
pub const MSG_NAV_FOCUS_RESPONSE: u16 = 0x000e;
pub const MSG_SHUTDOWN_REQUEST: u16 = 0x000f;
pub const MSG_SHUTDOWN_RESPONSE: u16 = 0x0010;
pub const MSG_VOICE_SESSION_REQUEST: u16 = 0x0011;
pub const MSG_AUDIO_FOCUS_REQUEST: u16 = 0x0012;
pub const MSG_AUDIO_FOCUS_RESPONSE: u16 = 0x0013;
pub const MSG_CALL_AVAILABILITY: u16 = 0x0018;
pub const MSG_SERVICE_DISCOVERY_UPDATE: u16 = 0x001a;

/// A ready-to-send control-channel message: always sent on channel 0.
pub struct OutgoingControl {
    pub msg_id: u16,
    pub body: Vec<u8>,
}

/// Events `Session` reacts to, decoded from an incoming control-channel message.
#[derive(Debug)]
pub enum ControlEvent {
    VersionReceived { major: u16, minor: u16, matched: bool },
    SslHandshakeData(Vec<u8>),
    ServiceDiscoveryRequested,
    ChannelOpenRequested { channel_id: u8 },
    PongReceived,
    NavigationFocusRequested,
    ShutdownRequested,
    ShutdownAcknowledged,
    VoiceSessionRequested,
    AudioFocusRequested(Option<proto::AudioFocusRequestType>),
    CallAvailabilityUnexpected,
    ServiceDiscoveryUpdateUnhandled,
    ChannelCloseNotification,
    Unknown { msg_id: u16 },
}

/// Stateless control-channel codec. Holds nothing; every method is a pure
/// function of its inputs, since channel 0 carries no per-connection state
/// of its own (the protocol version and handshake progress live on
/// `Session`).
pub struct ControlChannel;

impl ControlChannel {
    /// Decode an incoming channel-0 message, also building any message the
    /// wire protocol requires the HU to send back immediately (ping
    /// auto-response is the only such case; everything else is a decision
    /// `Session` makes based on the returned event).
    pub fn handle_message(msg_id: u16, body: &[u8]) -> (ControlEvent, Option<OutgoingControl>) {
        match msg_id {
            MSG_VERSION_RESPONSE => {
                if body.len() < 6 {
                    return (
                        ControlEvent::VersionReceived { major: 0, minor: 0, matched: false },
                        None,
                    );
                }
                let major = u16::from_be_bytes([body[0], body[1]]);
                let minor = u16::from_be_bytes([body[2], body[3]]);
                let status = u16::from_be_bytes([body[4], body[5]]);
                (
                    ControlEvent::VersionReceived { major, minor, matched: status == 0 },
                    None,
                )
            }
            MSG_SSL_HANDSHAKE => (ControlEvent::SslHandshakeData(body.to_vec()), None),
            MSG_SERVICE_DISCOVERY_REQUEST => {
                if let Err(e) = proto::ServiceDiscoveryRequest::decode(body) {
                    warn!("[ControlChannel] failed to parse ServiceDiscoveryRequest: {e}");
                }
                (ControlEvent::ServiceDiscoveryRequested, None)
            }
            MSG_CHANNEL_OPEN_REQUEST => match proto::ChannelOpenRequest::decode(body) {
                Ok(req) => (
                    ControlEvent::ChannelOpenRequested { channel_id: req.channel_id as u8 },
                    None,
                ),
                Err(e) => {
                    warn!("[ControlChannel] failed to parse ChannelOpenRequest: {e}");
                    (ControlEvent::Unknown { msg_id }, None)
                }
            },
            MSG_PING_REQUEST => match proto::PingRequest::decode(body) {
                Ok(req) => {
                    debug!("[ControlChannel] ping request ts={}", req.timestamp);
                    let resp = proto::PingResponse { timestamp: req.timestamp };
                    (
                        ControlEvent::Unknown { msg_id: MSG_PING_REQUEST },
                        Some(OutgoingControl { msg_id: MSG_PING_RESPONSE, body: resp.encode_to_vec() }),
                    )
                }
                Err(e) => {
                    warn!("[ControlChannel] failed to parse PingRequest: {e}");
                    (ControlEvent::Unknown { msg_id }, None)
                }
            },
            MSG_PING_RESPONSE => (ControlEvent::PongReceived, None),
            MSG_NAV_FOCUS_REQUEST => (ControlEvent::NavigationFocusRequested, None),
            MSG_SHUTDOWN_REQUEST => (ControlEvent::ShutdownRequested, None),
            MSG_SHUTDOWN_RESPONSE => (ControlEvent::ShutdownAcknowledged, None),
            MSG_VOICE_SESSION_REQUEST => (ControlEvent::VoiceSessionRequested, None),
            MSG_AUDIO_FOCUS_REQUEST => match proto::AudioFocusRequest::decode(body) {
                Ok(req) => {
                    let kind = match req.request_type {
                        0 => Some(proto::AudioFocusRequestType::Gain),
                        1 => Some(proto::AudioFocusRequestType::GainTransient),
                        2 => Some(proto::AudioFocusRequestType::GainNavi),
                        3 => Some(proto::AudioFocusRequestType::Release),
                        _ => None,
                    };
                    (ControlEvent::AudioFocusRequested(kind), None)
                }
                Err(e) => {
                    warn!("[ControlChannel] failed to parse AudioFocusRequest: {e}");
                    (ControlEvent::Unknown { msg_id }, None)
                }
            },
            MSG_CHANNEL_CLOSE => (ControlEvent::ChannelCloseNotification, None),
            MSG_CALL_AVAILABILITY => (ControlEvent::CallAvailabilityUnexpected, None),
            MSG_SERVICE_DISCOVERY_UPDATE => (ControlEvent::ServiceDiscoveryUpdateUnhandled, None),
            _ => (ControlEvent::Unknown { msg_id }, None),
        }
    }

    pub fn encode_version_request(major: u16, minor: u16) -> OutgoingControl {
        let mut body = Vec::with_capacity(4);
        body.extend_from_slice(&major.to_be_bytes());
        body.extend_from_slice(&minor.to_be_bytes());
        OutgoingControl { msg_id: MSG_VERSION_REQUEST, body }
    }

    pub fn encode_ssl_handshake(chunk: &[u8]) -> OutgoingControl {
        OutgoingControl { msg_id: MSG_SSL_HANDSHAKE, body: chunk.to_vec() }
    }

    pub fn encode_auth_complete(success: bool) -> OutgoingControl {
        let status = if success { proto::Status::Ok } else { proto::Status::AuthenticationFailure };
        let msg = proto::AuthCompleteIndication { status: status as i32 };
        OutgoingControl { msg_id: MSG_AUTH_COMPLETE, body: msg.encode_to_vec() }
    }

    pub fn encode_service_discovery_response(resp: &proto::ServiceDiscoveryResponse) -> OutgoingControl {
        OutgoingControl { msg_id: MSG_SERVICE_DISCOVERY_RESPONSE, body: resp.encode_to_vec() }
    }

    pub fn encode_channel_open_response(accepted: bool) -> OutgoingControl {
        let status = if accepted { proto::Status::Ok } else { proto::Status::InvalidChannel };
        let msg = proto::ChannelOpenResponse { status: status as i32 };
        OutgoingControl { msg_id: MSG_CHANNEL_OPEN_RESPONSE, body: msg.encode_to_vec() }
    }

    pub fn encode_ping_request(timestamp_ms: i64) -> OutgoingControl {
        let msg = proto::PingRequest { timestamp: timestamp_ms };
        OutgoingControl { msg_id: MSG_PING_REQUEST, body: msg.encode_to_vec() }
    }

    pub fn encode_shutdown_request() -> OutgoingControl {
        let msg = proto::ShutdownRequest { reason: proto::ShutdownReason::Quit as i32 };
        OutgoingControl { msg_id: MSG_SHUTDOWN_REQUEST, body: msg.encode_to_vec() }
    }

    pub fn encode_shutdown_response() -> OutgoingControl {
        let msg = proto::ShutdownResponse {};
        OutgoingControl { msg_id: MSG_SHUTDOWN_RESPONSE, body: msg.encode_to_vec() }
    }

    pub fn encode_audio_focus_response(response_type: proto::AudioFocusResponseType) -> OutgoingControl {
        let msg = proto::AudioFocusResponse { response_type: response_type as i32 };
        OutgoingControl { msg_id: MSG_AUDIO_FOCUS_RESPONSE, body: msg.encode_to_vec() }
    }

    pub fn encode_nav_focus_response(focus_type: i32) -> OutgoingControl {
        let msg = proto::NavFocusResponse { focus_type };
        OutgoingControl { msg_id: MSG_NAV_FOCUS_RESPONSE, body: msg.encode_to_vec() }
    }
}

/// Map an `AUDIO_FOCUS_REQUEST` kind to the response type the HU auto-replies
/// with. `None` covers both an explicitly out-of-range wire value and any
/// future request kind this crate doesn't recognize yet — spec.md §4.8's
/// "else NONE" branch, distinct from `Release`.
pub fn map_audio_focus(request: Option<proto::AudioFocusRequestType>) -> proto::AudioFocusResponseType {
    use proto::{AudioFocusRequestType as Req, AudioFocusResponseType as Resp};
    match request {
        Some(Req::Gain) => Resp::Gain,
        Some(Req::GainTransient) => Resp::GainTransient,
        Some(Req::GainNavi) => Resp::GainTransientGuidanceOnly,
        Some(Req::Release) => Resp::Loss,
        None => Resp::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn version_response_status_zero_matches() {
        let mut body = vec![0x00, 0x01, 0x00, 0x07, 0x00, 0x00];
        let (event, _) = ControlChannel::handle_message(MSG_VERSION_RESPONSE, &body);
        assert_matches!(event, ControlEvent::VersionReceived { major: 1, minor: 7, matched: true });

        body[5] = 0x01;
        let (event, _) = ControlChannel::handle_message(MSG_VERSION_RESPONSE, &body);
        assert_matches!(event, ControlEvent::VersionReceived { matched: false, .. });
    }

    #[test]
    fn version_response_too_short_is_mismatch() {
        let (event, _) = ControlChannel::handle_message(MSG_VERSION_RESPONSE, &[0x00, 0x01]);
        assert_matches!(event, ControlEvent::VersionReceived { major: 0, minor: 0, matched: false });
    }

    #[test]
    fn ping_request_auto_responds_with_same_timestamp() {
        let req = proto::PingRequest { timestamp: 424242 };
        let (_, out) = ControlChannel::handle_message(MSG_PING_REQUEST, &req.encode_to_vec());
        let out = out.expect("ping must auto-respond");
        assert_eq!(out.msg_id, MSG_PING_RESPONSE);
        let resp = proto::PingResponse::decode(&out.body[..]).unwrap();
        assert_eq!(resp.timestamp, 424242);
    }

    #[test]
    fn audio_focus_mapping() {
        use proto::{AudioFocusRequestType as R, AudioFocusResponseType as A};
        assert_eq!(map_audio_focus(Some(R::Gain)), A::Gain);
        assert_eq!(map_audio_focus(Some(R::GainTransient)), A::GainTransient);
        assert_eq!(map_audio_focus(Some(R::GainNavi)), A::GainTransientGuidanceOnly);
        assert_eq!(map_audio_focus(Some(R::Release)), A::Loss);
        assert_eq!(map_audio_focus(None), A::None);
    }

    #[test]
    fn audio_focus_request_out_of_range_value_decodes_to_none_not_release() {
        let req = proto::AudioFocusRequest { request_type: 7 };
        let (event, _) = ControlChannel::handle_message(MSG_AUDIO_FOCUS_REQUEST, &req.encode_to_vec());
        assert_matches!(event, ControlEvent::AudioFocusRequested(None));
    }
}
