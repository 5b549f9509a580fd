//! Byte-stream ↔ message pipeline: fragmentation on send, reassembly on
//! receive, the encryption bracket, and handshake byte routing.
//!
//! Growable receive buffering uses `bytes::BytesMut` the way the reference
//! decoders in this codebase accumulate bytes until a complete frame parses.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use log::warn;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::control_channel::MSG_SSL_HANDSHAKE;
use crate::cryptor::Cryptor;
use crate::error::{Error, Result};
use crate::frame::{self, EncryptionType, FrameType, MessageType, MAX_FRAME_PAYLOAD};
use crate::protocol_logger::{Direction, ProtocolLogger};

/// Upward events the Messenger produces. Session (and tests) implement this
/// to receive them without the Messenger depending on Session.
pub trait MessengerSink {
    fn on_message(&mut self, channel_id: u8, message_id: u16, payload: Bytes, data_offset: usize);
    fn on_ssl_handshake_data(&mut self, channel_id: u8, data: Bytes);
    fn on_error(&mut self, err: Error);
}

struct ReassemblyBuffer {
    expected_total: u32,
    accumulated: BytesMut,
}

/// Composes a byte-oriented transport, a [`Cryptor`], and the frame codec.
pub struct Messenger<T> {
    transport: T,
    cryptor: Option<Cryptor>,
    encrypted: bool,
    recv_buf: BytesMut,
    reassembly: HashMap<u8, ReassemblyBuffer>,
    logger: Option<Arc<ProtocolLogger>>,
}

impl<T> Messenger<T> {
    pub fn new(transport: T) -> Self {
        Messenger {
            transport,
            cryptor: None,
            encrypted: false,
            recv_buf: BytesMut::with_capacity(8192),
            reassembly: HashMap::new(),
            logger: None,
        }
    }

    /// Attaches an optional protocol trace tap. A weak observer: dropping
    /// the `Arc` elsewhere (e.g. the logger is closed and replaced) doesn't
    /// affect the Messenger, which just holds its own clone.
    pub fn attach_logger(&mut self, logger: Arc<ProtocolLogger>) {
        self.logger = Some(logger);
    }

    /// Installs the Cryptor built at `TLSHandshake` entry. Encryption of
    /// traffic itself only begins once [`Messenger::mark_encrypted`] is called
    /// after the handshake completes — the handshake bytes themselves travel
    /// Plain.
    pub fn install_cryptor(&mut self, cryptor: Cryptor) {
        self.cryptor = Some(cryptor);
    }

    pub fn cryptor_mut(&mut self) -> Option<&mut Cryptor> {
        self.cryptor.as_mut()
    }

    pub fn mark_encrypted(&mut self) {
        self.encrypted = true;
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }
}

impl<T: AsyncWrite + Unpin> Messenger<T> {
    /// `sendMessage(channelId, messageId, body)`: prepend the message id,
    /// fragment if needed, encrypt each fragment if the bracket is active,
    /// and write every frame to the transport.
    pub async fn send_message(&mut self, channel_id: u8, message_id: u16, body: &[u8]) -> Result<()> {
        if let Some(logger) = &self.logger {
            logger.log(Direction::HuToPhone, channel_id, message_id, body);
        }

        let mut full_payload = Vec::with_capacity(2 + body.len());
        full_payload.extend_from_slice(&message_id.to_be_bytes());
        full_payload.extend_from_slice(body);

        let message_type = MessageType::for_channel(channel_id);

        if full_payload.len() <= MAX_FRAME_PAYLOAD {
            self.write_fragment(channel_id, FrameType::Bulk, message_type, None, &full_payload)
                .await?;
            return Ok(());
        }

        let total_len = full_payload.len() as u32;
        let chunks: Vec<&[u8]> = full_payload.chunks(MAX_FRAME_PAYLOAD).collect();
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.iter().enumerate() {
            let frame_type = if i == 0 {
                FrameType::First
            } else if i == last {
                FrameType::Last
            } else {
                FrameType::Middle
            };
            let total = if i == 0 { Some(total_len) } else { None };
            self.write_fragment(channel_id, frame_type, message_type, total, chunk).await?;
        }
        Ok(())
    }

    async fn write_fragment(
        &mut self,
        channel_id: u8,
        frame_type: FrameType,
        message_type: MessageType,
        total_len: Option<u32>,
        plaintext: &[u8],
    ) -> Result<()> {
        let encryption = if self.encrypted { EncryptionType::Encrypted } else { EncryptionType::Plain };
        let on_wire: std::borrow::Cow<[u8]> = if self.encrypted {
            let cryptor = self
                .cryptor
                .as_mut()
                .ok_or_else(|| Error::Tls("cannot encrypt before Cryptor is installed".into()))?;
            std::borrow::Cow::Owned(cryptor.encrypt(plaintext)?)
        } else {
            std::borrow::Cow::Borrowed(plaintext)
        };

        let mut out = Vec::new();
        frame::serialize_frame(channel_id, frame_type, message_type, encryption, total_len, &on_wire, &mut out);
        self.transport.write_all(&out).await.map_err(Error::Transport)
    }

    /// Writes raw SSL_HANDSHAKE bytes for `channel_id` as a single Plain
    /// Bulk frame — used while driving the TLS handshake, before
    /// [`Messenger::mark_encrypted`] is ever called.
    pub async fn send_handshake_bytes(&mut self, channel_id: u8, data: &[u8]) -> Result<()> {
        self.send_message(channel_id, MSG_SSL_HANDSHAKE, data).await
    }
}

impl<T: AsyncRead + Unpin> Messenger<T> {
    /// Reads whatever bytes are currently available from the transport into
    /// the receive buffer. Returns `0` on EOF (peer closed the connection).
    pub async fn recv_some(&mut self) -> Result<usize> {
        self.recv_buf.reserve(4096);
        self.transport.read_buf(&mut self.recv_buf).await.map_err(Error::Transport)
    }

    /// Drains as many complete frames as the receive buffer currently holds,
    /// delivering fully reassembled messages (or handshake bytes) to `sink`.
    /// Leaves a trailing partial frame in the buffer for the next read.
    pub fn dispatch_ready(&mut self, sink: &mut dyn MessengerSink) -> Result<()> {
        loop {
            let (header, chunk) = match self.next_frame()? {
                Some(v) => v,
                None => return Ok(()),
            };

            let plaintext = match header.encryption {
                EncryptionType::Plain => chunk,
                EncryptionType::Encrypted => {
                    let cryptor = self
                        .cryptor
                        .as_mut()
                        .ok_or_else(|| Error::Tls("encrypted frame arrived before handshake completed".into()))?;
                    Bytes::from(cryptor.decrypt(&chunk)?)
                }
            };

            self.handle_frame_payload(header.channel_id, header.frame_type, header.total_len, plaintext, sink);
        }
    }

    /// Parses one frame header + payload off the front of the receive
    /// buffer, returning `None` if it doesn't yet hold a complete frame.
    fn next_frame(&mut self) -> Result<Option<(frame::FrameHeader, Bytes)>> {
        let (header, header_len) = match frame::parse_header(&self.recv_buf) {
            Ok((rest, header)) => (header, self.recv_buf.len() - rest.len()),
            Err(nom::Err::Incomplete(_)) => return Ok(None),
            Err(e) => return Err(Error::Framing(format!("malformed frame header: {e}"))),
        };

        let total_len = header_len + header.payload_len as usize;
        if self.recv_buf.len() < total_len {
            return Ok(None);
        }

        let mut frame_bytes = self.recv_buf.split_to(total_len);
        let payload = frame_bytes.split_off(header_len).freeze();
        Ok(Some((header, payload)))
    }

    fn handle_frame_payload(
        &mut self,
        channel_id: u8,
        frame_type: FrameType,
        total_len: Option<u32>,
        payload: Bytes,
        sink: &mut dyn MessengerSink,
    ) {
        match frame_type {
            FrameType::Bulk => self.deliver_message(channel_id, payload, sink),
            FrameType::First => {
                let expected = match total_len {
                    Some(t) => t,
                    None => {
                        sink.on_error(Error::Framing("First frame missing total length".into()));
                        return;
                    }
                };
                let mut accumulated = BytesMut::with_capacity(expected as usize);
                accumulated.extend_from_slice(&payload);
                self.reassembly.insert(channel_id, ReassemblyBuffer { expected_total: expected, accumulated });
            }
            FrameType::Middle => match self.reassembly.get_mut(&channel_id) {
                Some(rb) => rb.accumulated.extend_from_slice(&payload),
                None => warn!("Middle frame on channel {channel_id} with no active reassembly buffer, dropping"),
            },
            FrameType::Last => match self.reassembly.remove(&channel_id) {
                Some(mut rb) => {
                    rb.accumulated.extend_from_slice(&payload);
                    if rb.accumulated.len() as u32 == rb.expected_total {
                        self.deliver_message(channel_id, rb.accumulated.freeze(), sink);
                    } else {
                        warn!(
                            "reassembly length mismatch on channel {channel_id}: expected {} got {}, dropping",
                            rb.expected_total,
                            rb.accumulated.len()
                        );
                        sink.on_error(Error::Protocol(format!(
                            "reassembly length mismatch on channel {channel_id}"
                        )));
                    }
                }
                None => warn!("Last frame on channel {channel_id} with no active reassembly buffer, dropping"),
            },
        }
    }

    fn deliver_message(&mut self, channel_id: u8, payload: Bytes, sink: &mut dyn MessengerSink) {
        if payload.len() < 2 {
            warn!("message on channel {channel_id} shorter than the 2-byte message id, dropping");
            return;
        }
        let message_id = u16::from_be_bytes([payload[0], payload[1]]);
        if let Some(logger) = &self.logger {
            logger.log(Direction::PhoneToHu, channel_id, message_id, &payload[2..]);
        }

        if channel_id == 0 && message_id == MSG_SSL_HANDSHAKE && !self.encrypted {
            let data = payload.slice(2..);
            if let Some(cryptor) = self.cryptor.as_mut() {
                if let Err(e) = cryptor.write_handshake_buffer(&data) {
                    sink.on_error(e);
                    return;
                }
            }
            sink.on_ssl_handshake_data(channel_id, data);
            return;
        }

        sink.on_message(channel_id, message_id, payload, 2);
    }

    /// Drops per-channel reassembly state; called when a session tears down
    /// so buffers don't leak across a fresh `start()`.
    pub fn clear_reassembly(&mut self) {
        self.reassembly.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[derive(Default)]
    struct RecordingSink {
        messages: Vec<(u8, u16, Vec<u8>, usize)>,
        handshake: Vec<(u8, Vec<u8>)>,
        errors: Vec<String>,
    }

    impl MessengerSink for RecordingSink {
        fn on_message(&mut self, channel_id: u8, message_id: u16, payload: Bytes, data_offset: usize) {
            self.messages.push((channel_id, message_id, payload.to_vec(), data_offset));
        }
        fn on_ssl_handshake_data(&mut self, channel_id: u8, data: Bytes) {
            self.handshake.push((channel_id, data.to_vec()));
        }
        fn on_error(&mut self, err: Error) {
            self.errors.push(err.to_string());
        }
    }

    #[tokio::test]
    async fn s1_plain_single_frame_send() {
        let (client, mut server) = duplex(4096);
        let mut messenger = Messenger::new(client);
        messenger.send_message(0, 0x0001, &[0x00, 0x01, 0x00, 0x07]).await.unwrap();
        drop(messenger);

        let mut buf = Vec::new();
        server.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, vec![0x00, 0x03, 0x00, 0x06, 0x00, 0x01, 0x00, 0x01, 0x00, 0x07]);
    }

    #[tokio::test]
    async fn s3_fragmented_send_produces_first_and_last() {
        let (client, mut server) = duplex(1 << 20);
        let mut messenger = Messenger::new(client);
        let body = vec![0xCDu8; 20000];
        messenger.send_message(1, 0x0100, &body).await.unwrap();
        drop(messenger);

        let mut buf = Vec::new();
        server.read_to_end(&mut buf).await.unwrap();

        let (header, payload) = frame::parse_header(&buf).unwrap();
        assert_eq!(header.channel_id, 1);
        assert!(matches!(header.frame_type, FrameType::First));
        assert_eq!(header.payload_len, 16384);
        assert_eq!(header.total_len, Some(20002));

        let rest = &payload[16384..];
        let (header2, payload2) = frame::parse_header(rest).unwrap();
        assert!(matches!(header2.frame_type, FrameType::Last));
        assert_eq!(header2.payload_len, 3618);
        assert!(payload2.is_empty());
    }

    #[tokio::test]
    async fn s4_multi_frame_receive_emits_once() {
        let (mut client, server) = duplex(4096);
        let mut messenger = Messenger::new(server);

        let body = vec![0xABu8; 200];
        let mut full = vec![0x00u8, 0x05];
        full.extend_from_slice(&body);
        let half = full.len() / 2;

        let mut first = Vec::new();
        frame::serialize_frame(3, FrameType::First, MessageType::Control, EncryptionType::Plain, Some(full.len() as u32), &full[..half], &mut first);
        let mut last = Vec::new();
        frame::serialize_frame(3, FrameType::Last, MessageType::Control, EncryptionType::Plain, None, &full[half..], &mut last);

        client.write_all(&first).await.unwrap();
        let mut sink = RecordingSink::default();
        messenger.recv_some().await.unwrap();
        messenger.dispatch_ready(&mut sink).unwrap();
        assert!(sink.messages.is_empty());

        client.write_all(&last).await.unwrap();
        messenger.recv_some().await.unwrap();
        messenger.dispatch_ready(&mut sink).unwrap();

        assert_eq!(sink.messages.len(), 1);
        let (channel_id, message_id, payload, data_offset) = &sink.messages[0];
        assert_eq!(*channel_id, 3);
        assert_eq!(*message_id, 0x0005);
        assert_eq!(*data_offset, 2);
        assert_eq!(&payload[2..], &body[..]);
    }

    #[tokio::test]
    async fn channel_interleaving_emits_one_message_per_channel() {
        let (mut client, server) = duplex(8192);
        let mut messenger = Messenger::new(server);

        let body_a = vec![0x11u8; 100];
        let mut full_a = vec![0x00u8, 0x01];
        full_a.extend_from_slice(&body_a);
        let half_a = full_a.len() / 2;

        let mut a_first = Vec::new();
        frame::serialize_frame(5, FrameType::First, MessageType::Control, EncryptionType::Plain, Some(full_a.len() as u32), &full_a[..half_a], &mut a_first);

        let mut b_full = vec![0x00u8, 0x02, 0x99];
        let mut b_bulk = Vec::new();
        frame::serialize_frame(6, FrameType::Bulk, MessageType::Control, EncryptionType::Plain, None, &mut b_full, &mut b_bulk);

        let mut a_last = Vec::new();
        frame::serialize_frame(5, FrameType::Last, MessageType::Control, EncryptionType::Plain, None, &full_a[half_a..], &mut a_last);

        let mut stream = Vec::new();
        stream.extend_from_slice(&a_first);
        stream.extend_from_slice(&b_bulk);
        stream.extend_from_slice(&a_last);
        client.write_all(&stream).await.unwrap();

        let mut sink = RecordingSink::default();
        messenger.recv_some().await.unwrap();
        messenger.dispatch_ready(&mut sink).unwrap();

        assert_eq!(sink.messages.len(), 2);
        assert_eq!(sink.messages[0].0, 6);
        assert_eq!(sink.messages[1].0, 5);
    }

    #[tokio::test]
    async fn middle_without_first_is_dropped_not_fatal() {
        let (mut client, server) = duplex(4096);
        let mut messenger = Messenger::new(server);

        let mut middle = Vec::new();
        frame::serialize_frame(2, FrameType::Middle, MessageType::Control, EncryptionType::Plain, None, &[0xFF, 0xFF], &mut middle);
        client.write_all(&middle).await.unwrap();

        let mut sink = RecordingSink::default();
        messenger.recv_some().await.unwrap();
        messenger.dispatch_ready(&mut sink).unwrap();

        assert!(sink.messages.is_empty());
        assert!(sink.errors.is_empty());
    }

    #[tokio::test]
    async fn attached_logger_records_outbound_sends() {
        let (client, _server) = duplex(4096);
        let mut messenger = Messenger::new(client);

        let logger = Arc::new(ProtocolLogger::new());
        let path = std::env::temp_dir().join(format!("aa-headunit-test-{:p}.tsv", &logger));
        logger.open(path.to_str().unwrap()).unwrap();
        messenger.attach_logger(logger.clone());

        messenger.send_message(0, 0x0001, &[0x00, 0x01, 0x00, 0x07]).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2); // header + one logged send
        assert!(contents.contains("HU->Phone"));

        logger.close();
        let _ = std::fs::remove_file(&path);
    }
}
