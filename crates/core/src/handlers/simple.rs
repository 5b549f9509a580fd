//! Bluetooth, Wi-Fi, AV-input, Navigation, MediaStatus and PhoneStatus all
//! share the same shallow contract: acknowledge setup, decode whatever
//! indications arrive into parsed events, and emit those upward. None of
//! them carry flow control or session state beyond open/closed, so one
//! handler type serves all six, parametrised by channel id and an upward
//! sink.

use super::{ChannelHandler, OutgoingMessage};

/// Receives every non-setup message a [`SimpleHandler`]'s channel gets, for
/// the caller to decode further (the per-channel indication formats beyond
/// open/close are not pinned by this crate's scope).
pub trait IndicationSink: Send {
    fn on_indication(&mut self, channel_id: u8, message_id: u16, body: &[u8]);
}

pub struct SimpleHandler {
    channel_id: u8,
    opened: bool,
    sink: Box<dyn IndicationSink>,
}

impl SimpleHandler {
    pub fn new(channel_id: u8, sink: Box<dyn IndicationSink>) -> Self {
        SimpleHandler { channel_id, opened: false, sink }
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }
}

impl ChannelHandler for SimpleHandler {
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

    fn on_message(&mut self, message_id: u16, body: &[u8]) -> Vec<OutgoingMessage> {
        self.sink.on_indication(self.channel_id, message_id, body);
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingSink {
        seen: Arc<Mutex<Vec<(u8, u16, Vec<u8>)>>>,
    }

    impl IndicationSink for RecordingSink {
        fn on_indication(&mut self, channel_id: u8, message_id: u16, body: &[u8]) {
            self.seen.lock().unwrap().push((channel_id, message_id, body.to_vec()));
        }
    }

    #[test]
    fn forwards_indications_to_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink { seen: seen.clone() };
        let mut h = SimpleHandler::new(9, Box::new(sink));
        h.on_channel_opened();
        assert!(h.is_opened());
        h.on_message(0x0001, &[0xAB, 0xCD]);

        let recorded = seen.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0], (9, 0x0001, vec![0xAB, 0xCD]));
    }
}
