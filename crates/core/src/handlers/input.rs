//! Touch input encoding and key-binding negotiation for the Input channel.

use log::warn;
use prost::Message;

use super::{ChannelHandler, OutgoingMessage, MSG_BINDING_REQUEST, MSG_BINDING_RESPONSE, MSG_INPUT_EVENT_INDICATION};
use crate::proto;

/// One active touch point: screen coordinates plus a stable pointer id.
pub struct TouchPoint {
    pub x: u32,
    pub y: u32,
    pub id: u32,
}

pub struct InputHandler {
    channel_id: u8,
    opened: bool,
    supported_keycodes: Vec<u32>,
    touchscreen_width: u32,
    touchscreen_height: u32,
}

impl InputHandler {
    /// `touchscreen_width`/`height` should match what service discovery
    /// advertised for the input channel (see
    /// `ServiceDiscoveryBuilder::input_touch_dims`) — `BINDING_RESPONSE`
    /// reuses the same descriptor shape and the phone is entitled to expect
    /// consistent dimensions from it.
    pub fn new(channel_id: u8, touchscreen_width: u32, touchscreen_height: u32, supported_keycodes: Vec<u32>) -> Self {
        InputHandler { channel_id, opened: false, supported_keycodes, touchscreen_width, touchscreen_height }
    }

    /// `sendTouchIndication(pointers, actionIndex, action)`.
    pub fn send_touch_indication(
        &self,
        pointers: &[TouchPoint],
        action_index: u32,
        action: proto::TouchAction,
    ) -> OutgoingMessage {
        let ind = proto::TouchEventIndication {
            pointer_data: pointers
                .iter()
                .map(|p| proto::TouchLocation { x: p.x, y: p.y, pointer_id: p.id })
                .collect(),
            action_index,
            action: action as i32,
        };
        OutgoingMessage::new(self.channel_id, MSG_INPUT_EVENT_INDICATION, ind.encode_to_vec())
    }
}

impl ChannelHandler for InputHandler {
    fn channel_id(&self) -> u8 {
        self.channel_id
    }

    fn on_channel_opened(&mut self) -> Vec<OutgoingMessage> {
        self.opened = true;
        Vec::new()
    }

    fn on_channel_closed(&mut self) {
        self.opened = false;
    }

    fn on_message(&mut self, message_id: u16, _body: &[u8]) -> Vec<OutgoingMessage> {
        match message_id {
            MSG_BINDING_REQUEST => {
                let resp = proto::InputChannelDescriptor {
                    touchscreen_width: self.touchscreen_width,
                    touchscreen_height: self.touchscreen_height,
                    supported_keycodes: self.supported_keycodes.clone(),
                };
                vec![OutgoingMessage::new(self.channel_id, MSG_BINDING_RESPONSE, resp.encode_to_vec())]
            }
            _ => {
                warn!("input channel {}: unexpected message id {message_id:#06x}", self.channel_id);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_indication_encodes_pointers() {
        let h = InputHandler::new(1, 800, 480, vec![]);
        let out = h.send_touch_indication(
            &[TouchPoint { x: 100, y: 200, id: 0 }],
            0,
            proto::TouchAction::Down,
        );
        let decoded = proto::TouchEventIndication::decode(&out.body[..]).unwrap();
        assert_eq!(decoded.pointer_data.len(), 1);
        assert_eq!(decoded.pointer_data[0].x, 100);
        assert_eq!(decoded.action, proto::TouchAction::Down as i32);
    }

    #[test]
    fn binding_response_reports_real_touchscreen_dimensions() {
        let mut h = InputHandler::new(1, 800, 480, vec![3, 4, 84]);
        let out = h.on_message(MSG_BINDING_REQUEST, &[]);
        assert_eq!(out.len(), 1);
        let resp = proto::InputChannelDescriptor::decode(&out[0].body[..]).unwrap();
        assert_eq!(resp.touchscreen_width, 800);
        assert_eq!(resp.touchscreen_height, 480);
        assert_eq!(resp.supported_keycodes, vec![3, 4, 84]);
    }
}
