//! Shared setup/start/stop/ack machinery for the four media-carrying
//! channels, plus the audio- and video-specific flow control and focus
//! behaviour layered on top.

use delegate::delegate;
use log::warn;
use prost::Message;

use super::{
    ChannelHandler, MediaSink, OutgoingMessage, AVHandler, MSG_AV_MEDIA_ACK_INDICATION,
    MSG_AV_SETUP_RESPONSE, MSG_AV_START_INDICATION, MSG_AV_STOP_INDICATION, MSG_VIDEO_FOCUS_INDICATION,
    MSG_VIDEO_FOCUS_REQUEST,
};
use crate::proto;

/// State and behaviour common to every AV channel: open/close bookkeeping,
/// SETUP_REQUEST/START_INDICATION/STOP_INDICATION handling.
pub struct AvHandlerBase {
    channel_id: u8,
    max_unacked: u32,
    config_indices: Vec<i32>,
    opened: bool,
    streaming: bool,
    session: Option<i32>,
    media_sink: Box<dyn MediaSink>,
}

impl AvHandlerBase {
    pub fn new(channel_id: u8, config_indices: Vec<i32>, media_sink: Box<dyn MediaSink>) -> Self {
        AvHandlerBase {
            channel_id,
            max_unacked: 10,
            config_indices,
            opened: false,
            streaming: false,
            session: None,
            media_sink,
        }
    }

    fn on_channel_opened(&mut self) -> Vec<OutgoingMessage> {
        self.opened = true;
        Vec::new()
    }

    fn on_channel_closed(&mut self) {
        self.opened = false;
        self.streaming = false;
        self.session = None;
    }

    fn handle_setup(&self) -> OutgoingMessage {
        let resp = proto::AvChannelSetupResponse {
            media_status: proto::AvChannelSetupStatus::Ok as i32,
            max_unacked: self.max_unacked,
            configs: self.config_indices.clone(),
        };
        OutgoingMessage::new(self.channel_id, MSG_AV_SETUP_RESPONSE, resp.encode_to_vec())
    }

    fn handle_start(&mut self, body: &[u8]) {
        match proto::AvChannelStartIndication::decode(body) {
            Ok(start) => {
                self.session = Some(start.session);
                self.streaming = true;
            }
            Err(e) => warn!("channel {}: malformed START_INDICATION: {e}", self.channel_id),
        }
    }

    fn handle_stop(&mut self) {
        self.streaming = false;
    }

    fn can_accept_media(&self) -> bool {
        self.opened && self.streaming
    }

    fn ack(&self, value: u32) -> OutgoingMessage {
        let ack = proto::AvMediaAckIndication { session: self.session.unwrap_or(0), value };
        OutgoingMessage::new(self.channel_id, MSG_AV_MEDIA_ACK_INDICATION, ack.encode_to_vec())
    }
}

/// Audio flow control: forward every frame, ACK every `max_unacked` (10)
/// frames with `value` = the count just acknowledged, then reset to zero.
pub struct AudioHandler {
    base: AvHandlerBase,
    unacked_count: u32,
}

impl AudioHandler {
    pub fn new(channel_id: u8, media_sink: Box<dyn MediaSink>) -> Self {
        AudioHandler { base: AvHandlerBase::new(channel_id, vec![0], media_sink), unacked_count: 0 }
    }
}

impl ChannelHandler for AudioHandler {
    fn channel_id(&self) -> u8 {
        self.base.channel_id
    }

    delegate! {
        to self.base {
            fn on_channel_opened(&mut self) -> Vec<OutgoingMessage>;
            fn on_channel_closed(&mut self);
        }
    }

    fn on_message(&mut self, message_id: u16, body: &[u8]) -> Vec<OutgoingMessage> {
        match message_id {
            super::MSG_AV_SETUP_REQUEST => vec![self.base.handle_setup()],
            MSG_AV_START_INDICATION => {
                self.base.handle_start(body);
                Vec::new()
            }
            MSG_AV_STOP_INDICATION => {
                self.base.handle_stop();
                Vec::new()
            }
            _ => {
                warn!("audio channel {}: unexpected message id {message_id:#06x}", self.base.channel_id);
                Vec::new()
            }
        }
    }
}

impl AVHandler for AudioHandler {
    fn on_media_data(&mut self, body: &[u8], timestamp: u64) -> Vec<OutgoingMessage> {
        self.base.media_sink.on_media_frame(self.base.channel_id, body, timestamp);
        self.unacked_count += 1;
        if self.unacked_count >= self.base.max_unacked {
            let value = self.unacked_count;
            self.unacked_count = 0;
            vec![self.base.ack(value)]
        } else {
            Vec::new()
        }
    }

    fn can_accept_media(&self) -> bool {
        self.base.can_accept_media()
    }
}

/// Video flow control (ACK every frame with a monotonically increasing
/// counter) plus the video-focus handshake described in §4.6.1.
pub struct VideoHandler {
    base: AvHandlerBase,
    ack_counter: u32,
    focused: bool,
}

impl VideoHandler {
    pub fn new(channel_id: u8, config_indices: Vec<i32>, media_sink: Box<dyn MediaSink>) -> Self {
        VideoHandler { base: AvHandlerBase::new(channel_id, config_indices, media_sink), ack_counter: 0, focused: false }
    }

    /// The HU's imperative "take or release video focus", independent of
    /// any request from the phone. Emits an unsolicited VIDEO_FOCUS_INDICATION.
    pub fn request_video_focus(&mut self, focused: bool) -> OutgoingMessage {
        self.focused = focused;
        self.focus_indication(focused, true)
    }

    fn focus_indication(&self, focused: bool, unrequested: bool) -> OutgoingMessage {
        let mode = if focused { proto::VideoFocusMode::Projected } else { proto::VideoFocusMode::None };
        let ind = proto::VideoFocusIndication { mode: mode as i32, unrequested };
        OutgoingMessage::new(self.base.channel_id, MSG_VIDEO_FOCUS_INDICATION, ind.encode_to_vec())
    }
}

impl ChannelHandler for VideoHandler {
    fn channel_id(&self) -> u8 {
        self.base.channel_id
    }

    delegate! {
        to self.base {
            fn on_channel_closed(&mut self);
        }
    }

    fn on_channel_opened(&mut self) -> Vec<OutgoingMessage> {
        self.base.on_channel_opened()
    }

    fn on_message(&mut self, message_id: u16, body: &[u8]) -> Vec<OutgoingMessage> {
        match message_id {
            super::MSG_AV_SETUP_REQUEST => {
                // SETUP_RESPONSE MUST be followed by an unsolicited
                // VIDEO_FOCUS_INDICATION(mode=PROJECTED) — some phones never
                // send VIDEO_FOCUS_REQUEST and expect the HU to lead.
                self.focused = true;
                vec![self.base.handle_setup(), self.focus_indication(true, true)]
            }
            MSG_AV_START_INDICATION => {
                self.base.handle_start(body);
                Vec::new()
            }
            MSG_AV_STOP_INDICATION => {
                self.base.handle_stop();
                Vec::new()
            }
            MSG_VIDEO_FOCUS_REQUEST => match proto::VideoFocusRequest::decode(body) {
                Ok(req) => {
                    let focused = req.mode == proto::VideoFocusMode::Projected as i32;
                    self.focused = focused;
                    vec![self.focus_indication(focused, false)]
                }
                Err(e) => {
                    warn!("channel {}: malformed VIDEO_FOCUS_REQUEST: {e}", self.base.channel_id);
                    Vec::new()
                }
            },
            _ => {
                warn!("video channel {}: unexpected message id {message_id:#06x}", self.base.channel_id);
                Vec::new()
            }
        }
    }
}

impl AVHandler for VideoHandler {
    fn on_media_data(&mut self, body: &[u8], timestamp: u64) -> Vec<OutgoingMessage> {
        self.base.media_sink.on_media_frame(self.base.channel_id, body, timestamp);
        self.ack_counter = self.ack_counter.wrapping_add(1);
        vec![self.base.ack(self.ack_counter)]
    }

    fn can_accept_media(&self) -> bool {
        self.base.can_accept_media()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSink;
    impl MediaSink for NullSink {
        fn on_media_frame(&mut self, _channel_id: u8, _body: &[u8], _timestamp: u64) {}
    }

    #[test]
    fn audio_acks_every_ten_frames() {
        let mut h = AudioHandler::new(4, Box::new(NullSink));
        h.on_channel_opened();
        h.on_message(super::super::MSG_AV_SETUP_REQUEST, &[]);
        h.on_message(MSG_AV_START_INDICATION, &proto::AvChannelStartIndication { session: 1, config_index: None }.encode_to_vec());

        let mut acks = 0;
        for _ in 0..25 {
            let out = h.on_media_data(&[0xAA], 0);
            acks += out.len();
        }
        assert_eq!(acks, 2);
        assert_eq!(h.unacked_count, 5);
    }

    #[test]
    fn video_acks_every_frame_with_increasing_counter() {
        let mut h = VideoHandler::new(3, vec![0, 1], Box::new(NullSink));
        h.on_channel_opened();
        let setup_out = h.on_message(super::super::MSG_AV_SETUP_REQUEST, &[]);
        assert_eq!(setup_out.len(), 2);
        assert_eq!(setup_out[1].message_id, MSG_VIDEO_FOCUS_INDICATION);

        let first = h.on_media_data(&[0x01], 0);
        let second = h.on_media_data(&[0x02], 0);
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);

        let first_ack = proto::AvMediaAckIndication::decode(&first[0].body[..]).unwrap();
        let second_ack = proto::AvMediaAckIndication::decode(&second[0].body[..]).unwrap();
        assert_eq!(first_ack.value, 1);
        assert_eq!(second_ack.value, 2);
    }

    #[test]
    fn video_focus_request_is_echoed() {
        let mut h = VideoHandler::new(3, vec![0], Box::new(NullSink));
        let req = proto::VideoFocusRequest { mode: proto::VideoFocusMode::Projected as i32 };
        let out = h.on_message(MSG_VIDEO_FOCUS_REQUEST, &req.encode_to_vec());
        assert_eq!(out.len(), 1);
        let ind = proto::VideoFocusIndication::decode(&out[0].body[..]).unwrap();
        assert_eq!(ind.mode, proto::VideoFocusMode::Projected as i32);
        assert!(!ind.unrequested);
    }
}
