//! Sensor channel: records the requested sensor type/refresh interval, and
//! turns imperative pushes (currently just night mode) into
//! SENSOR_EVENT_INDICATION messages.

use log::warn;
use prost::Message;

use super::{
    ChannelHandler, ExternalSignal, OutgoingMessage, MSG_SENSOR_EVENT_INDICATION, MSG_SENSOR_START_REQUEST,
    MSG_SENSOR_START_RESPONSE,
};
use crate::proto;

pub struct SensorHandler {
    channel_id: u8,
    opened: bool,
    requested: Vec<(proto::SensorType, u32)>,
}

impl SensorHandler {
    pub fn new(channel_id: u8) -> Self {
        SensorHandler { channel_id, opened: false, requested: Vec::new() }
    }

    /// `pushNightMode(bool)`: emits SENSOR_EVENT_INDICATION iff the phone
    /// has requested NIGHT_DATA.
    pub fn push_night_mode(&self, is_night: bool) -> Vec<OutgoingMessage> {
        if !self.requested.iter().any(|(t, _)| *t == proto::SensorType::NightData) {
            return Vec::new();
        }
        let ind = proto::SensorEventIndication { night_mode: Some(proto::NightModeData { is_night }) };
        vec![OutgoingMessage::new(self.channel_id, MSG_SENSOR_EVENT_INDICATION, ind.encode_to_vec())]
    }
}

impl ChannelHandler for SensorHandler {
    fn channel_id(&self) -> u8 {
        self.channel_id
    }

    fn on_channel_opened(&mut self) -> Vec<OutgoingMessage> {
        self.opened = true;
        Vec::new()
    }

    fn on_channel_closed(&mut self) {
        self.opened = false;
        self.requested.clear();
    }

    fn on_message(&mut self, message_id: u16, body: &[u8]) -> Vec<OutgoingMessage> {
        match message_id {
            MSG_SENSOR_START_REQUEST => match proto::SensorStartRequest::decode(body) {
                Ok(req) => {
                    let sensor_type = match req.sensor_type {
                        0 => proto::SensorType::NightData,
                        1 => proto::SensorType::DrivingStatus,
                        2 => proto::SensorType::Location,
                        _ => {
                            warn!("sensor channel {}: unknown sensor type {}", self.channel_id, req.sensor_type);
                            return Vec::new();
                        }
                    };
                    self.requested.push((sensor_type, req.refresh_interval_ms));
                    let resp = proto::SensorStartResponse { status: proto::Status::Ok as i32 };
                    vec![OutgoingMessage::new(self.channel_id, MSG_SENSOR_START_RESPONSE, resp.encode_to_vec())]
                }
                Err(e) => {
                    warn!("sensor channel {}: malformed SENSOR_START_REQUEST: {e}", self.channel_id);
                    Vec::new()
                }
            },
            _ => {
                warn!("sensor channel {}: unexpected message id {message_id:#06x}", self.channel_id);
                Vec::new()
            }
        }
    }

    fn on_external_signal(&mut self, signal: ExternalSignal) -> Vec<OutgoingMessage> {
        match signal {
            ExternalSignal::NightMode(is_night) => self.push_night_mode(is_night),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_night_mode_requires_prior_subscription() {
        let mut h = SensorHandler::new(2);
        assert!(h.push_night_mode(true).is_empty());

        let req = proto::SensorStartRequest { sensor_type: proto::SensorType::NightData as i32, refresh_interval_ms: 1000 };
        h.on_message(MSG_SENSOR_START_REQUEST, &req.encode_to_vec());

        let out = h.push_night_mode(true);
        assert_eq!(out.len(), 1);
        let ind = proto::SensorEventIndication::decode(&out[0].body[..]).unwrap();
        assert!(ind.night_mode.unwrap().is_night);
    }
}
