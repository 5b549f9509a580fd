//! Optional TSV trace of every message crossing the wire, tapped onto
//! [`crate::messenger::Messenger`] send/receive points. One line per message:
//! elapsed time, direction, channel, message name, size, and a short payload
//! preview. Media frames are never hex-dumped; they're noted as `[video
//! data]`/`[audio data]` instead, since a 64-byte preview of compressed
//! media is noise.

use std::fmt;
use std::fs::File;
use std::io::Write as _;
use std::sync::Mutex;
use std::time::Instant;

use crate::handlers::{
    MSG_AV_MEDIA_ACK_INDICATION, MSG_AV_MEDIA_INDICATION, MSG_AV_MEDIA_WITH_TIMESTAMP, MSG_AV_SETUP_REQUEST,
    MSG_AV_SETUP_RESPONSE, MSG_AV_START_INDICATION, MSG_AV_STOP_INDICATION, MSG_BINDING_REQUEST, MSG_BINDING_RESPONSE,
    MSG_INPUT_EVENT_INDICATION, MSG_SENSOR_EVENT_INDICATION, MSG_SENSOR_START_REQUEST, MSG_SENSOR_START_RESPONSE,
    MSG_VIDEO_FOCUS_INDICATION, MSG_VIDEO_FOCUS_REQUEST,
};
use crate::control_channel::{
    MSG_AUDIO_FOCUS_REQUEST, MSG_AUDIO_FOCUS_RESPONSE, MSG_AUTH_COMPLETE, MSG_CHANNEL_CLOSE, MSG_CHANNEL_OPEN_REQUEST,
    MSG_CHANNEL_OPEN_RESPONSE, MSG_NAV_FOCUS_REQUEST, MSG_NAV_FOCUS_RESPONSE, MSG_PING_REQUEST, MSG_PING_RESPONSE,
    MSG_SERVICE_DISCOVERY_REQUEST, MSG_SERVICE_DISCOVERY_RESPONSE, MSG_SHUTDOWN_REQUEST, MSG_SHUTDOWN_RESPONSE,
    MSG_SSL_HANDSHAKE, MSG_VERSION_REQUEST, MSG_VERSION_RESPONSE, MSG_VOICE_SESSION_REQUEST,
};

const PREVIEW_MAX: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    PhoneToHu,
    HuToPhone,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::PhoneToHu => "Phone->HU",
            Direction::HuToPhone => "HU->Phone",
        })
    }
}

struct OpenFile {
    file: File,
    start: Instant,
}

/// A mutex-guarded sink so it can be shared across the tasks driving
/// multiple sessions without each needing its own log file.
pub struct ProtocolLogger {
    inner: Mutex<Option<OpenFile>>,
}

impl Default for ProtocolLogger {
    fn default() -> Self {
        ProtocolLogger { inner: Mutex::new(None) }
    }
}

impl ProtocolLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, path: &str) -> std::io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(b"TIME\tDIR\tCHANNEL\tMESSAGE\tSIZE\tPAYLOAD_PREVIEW\n")?;
        file.flush()?;
        *self.inner.lock().unwrap() = Some(OpenFile { file, start: Instant::now() });
        Ok(())
    }

    pub fn close(&self) {
        *self.inner.lock().unwrap() = None;
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    pub fn log(&self, direction: Direction, channel_id: u8, message_id: u16, payload: &[u8]) {
        let mut guard = self.inner.lock().unwrap();
        let Some(open) = guard.as_mut() else { return };

        let elapsed = open.start.elapsed().as_secs_f64();
        let preview = preview_for(channel_id, message_id, payload);
        let line = format!(
            "{elapsed:.3}\t{direction}\tch{channel_id}/{}\t{}\t{}\t{preview}\n",
            channel_name(channel_id),
            message_name(channel_id, message_id),
            payload.len(),
        );
        let _ = open.file.write_all(line.as_bytes());
        let _ = open.file.flush();
    }
}

fn is_av_channel(channel_id: u8) -> bool {
    matches!(channel_id, 3 | 4 | 5 | 6 | 7)
}

fn preview_for(channel_id: u8, message_id: u16, payload: &[u8]) -> String {
    let is_media = matches!(message_id, MSG_AV_MEDIA_WITH_TIMESTAMP | MSG_AV_MEDIA_INDICATION) && is_av_channel(channel_id);
    if is_media {
        return format!("[{} data]", if channel_id == 3 { "video" } else { "audio" });
    }
    if payload.is_empty() {
        return String::new();
    }
    let len = payload.len().min(PREVIEW_MAX);
    let mut hex = String::with_capacity(len * 3);
    for (i, b) in payload[..len].iter().enumerate() {
        if i > 0 {
            hex.push(' ');
        }
        hex.push_str(&format!("{b:02x}"));
    }
    if payload.len() > PREVIEW_MAX {
        hex.push_str("...");
    }
    hex
}

fn channel_name(channel_id: u8) -> &'static str {
    match channel_id {
        0 => "CONTROL",
        1 => "INPUT",
        2 => "SENSOR",
        3 => "VIDEO",
        4 => "MEDIA_AUDIO",
        5 => "SPEECH_AUDIO",
        6 => "SYSTEM_AUDIO",
        7 => "AV_INPUT",
        8 => "BLUETOOTH",
        9 => "NAVIGATION",
        10 => "MEDIA_STATUS",
        11 => "PHONE_STATUS",
        14 => "WIFI",
        _ => "UNKNOWN",
    }
}

fn message_name(channel_id: u8, message_id: u16) -> String {
    if message_id == MSG_CHANNEL_OPEN_REQUEST {
        return "CHANNEL_OPEN_REQUEST".to_string();
    }
    if message_id == MSG_CHANNEL_OPEN_RESPONSE {
        return "CHANNEL_OPEN_RESPONSE".to_string();
    }
    if message_id == MSG_CHANNEL_CLOSE {
        return "CHANNEL_CLOSE".to_string();
    }

    if channel_id == 0 {
        let name = match message_id {
            MSG_VERSION_REQUEST => "VERSION_REQUEST",
            MSG_VERSION_RESPONSE => "VERSION_RESPONSE",
            MSG_SSL_HANDSHAKE => "SSL_HANDSHAKE",
            MSG_AUTH_COMPLETE => "AUTH_COMPLETE",
            MSG_SERVICE_DISCOVERY_REQUEST => "SERVICE_DISCOVERY_REQUEST",
            MSG_SERVICE_DISCOVERY_RESPONSE => "SERVICE_DISCOVERY_RESPONSE",
            MSG_PING_REQUEST => "PING_REQUEST",
            MSG_PING_RESPONSE => "PING_RESPONSE",
            MSG_NAV_FOCUS_REQUEST => "NAVIGATION_FOCUS_REQUEST",
            MSG_NAV_FOCUS_RESPONSE => "NAVIGATION_FOCUS_RESPONSE",
            MSG_SHUTDOWN_REQUEST => "SHUTDOWN_REQUEST",
            MSG_SHUTDOWN_RESPONSE => "SHUTDOWN_RESPONSE",
            MSG_VOICE_SESSION_REQUEST => "VOICE_SESSION_REQUEST",
            MSG_AUDIO_FOCUS_REQUEST => "AUDIO_FOCUS_REQUEST",
            MSG_AUDIO_FOCUS_RESPONSE => "AUDIO_FOCUS_RESPONSE",
            _ => return format!("{message_id:#06x}"),
        };
        return name.to_string();
    }

    if is_av_channel(channel_id) {
        let name = match message_id {
            MSG_AV_MEDIA_WITH_TIMESTAMP => "AV_MEDIA_WITH_TIMESTAMP",
            MSG_AV_MEDIA_INDICATION => "AV_MEDIA_INDICATION",
            MSG_AV_SETUP_REQUEST => "AV_SETUP_REQUEST",
            MSG_AV_SETUP_RESPONSE => "AV_SETUP_RESPONSE",
            MSG_AV_START_INDICATION => "AV_START_INDICATION",
            MSG_AV_STOP_INDICATION => "AV_STOP_INDICATION",
            MSG_AV_MEDIA_ACK_INDICATION => "AV_MEDIA_ACK",
            MSG_VIDEO_FOCUS_REQUEST => "VIDEO_FOCUS_REQUEST",
            MSG_VIDEO_FOCUS_INDICATION => "VIDEO_FOCUS_INDICATION",
            _ => return format!("{message_id:#06x}"),
        };
        return name.to_string();
    }

    if channel_id == 1 {
        let name = match message_id {
            MSG_INPUT_EVENT_INDICATION => "INPUT_EVENT_INDICATION",
            MSG_BINDING_REQUEST => "BINDING_REQUEST",
            MSG_BINDING_RESPONSE => "BINDING_RESPONSE",
            _ => return format!("{message_id:#06x}"),
        };
        return name.to_string();
    }

    if channel_id == 2 {
        let name = match message_id {
            MSG_SENSOR_START_REQUEST => "SENSOR_START_REQUEST",
            MSG_SENSOR_START_RESPONSE => "SENSOR_START_RESPONSE",
            MSG_SENSOR_EVENT_INDICATION => "SENSOR_EVENT_INDICATION",
            _ => return format!("{message_id:#06x}"),
        };
        return name.to_string();
    }

    format!("{message_id:#06x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn logs_a_line_with_expected_columns() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("protocol_logger_test_{}.tsv", std::process::id()));
        let path = path.to_str().unwrap();

        let logger = ProtocolLogger::new();
        assert!(!logger.is_open());
        logger.open(path).unwrap();
        assert!(logger.is_open());

        logger.log(Direction::PhoneToHu, 0, MSG_VERSION_REQUEST, &[0x00, 0x01]);
        logger.close();
        assert!(!logger.is_open());

        let mut contents = String::new();
        File::open(path).unwrap().read_to_string(&mut contents).unwrap();
        std::fs::remove_file(path).unwrap();

        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "TIME\tDIR\tCHANNEL\tMESSAGE\tSIZE\tPAYLOAD_PREVIEW");
        assert!(lines[1].contains("Phone->HU"));
        assert!(lines[1].contains("ch0/CONTROL"));
        assert!(lines[1].contains("VERSION_REQUEST"));
        assert!(lines[1].contains("00 01"));
    }

    #[test]
    fn media_payload_is_never_hex_dumped() {
        let preview = preview_for(3, MSG_AV_MEDIA_WITH_TIMESTAMP, &[0xFF; 200]);
        assert_eq!(preview, "[video data]");
        let preview = preview_for(4, MSG_AV_MEDIA_INDICATION, &[0xFF; 200]);
        assert_eq!(preview, "[audio data]");
    }

    #[test]
    fn long_payload_is_truncated_with_ellipsis() {
        let preview = preview_for(0, MSG_SSL_HANDSHAKE, &[0xAB; 100]);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.matches(' ').count(), PREVIEW_MAX - 1);
    }

    #[test]
    fn logging_while_closed_is_a_silent_no_op() {
        let logger = ProtocolLogger::new();
        logger.log(Direction::HuToPhone, 0, MSG_PING_REQUEST, &[]);
    }
}
