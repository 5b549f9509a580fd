//! A thin adapter over a TLS engine, matching the spec's `Cryptor`
//! contract: feed in ciphertext, drain ciphertext to send, drive the
//! handshake forward, and once done, encrypt/decrypt plaintext.
//!
//! Implemented over `rustls`'s sans-IO `ServerConnection`. Its
//! `read_tls`/`write_tls`/`process_new_packets` API is a near-literal match
//! for this contract: the connection object never owns a socket, so the
//! Messenger stays in charge of all actual I/O, exactly as the spec's
//! ownership summary requires ("Messenger exclusively owns the Cryptor").

use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, ServerConnection};

use crate::error::{Error, Result};

/// Outcome of driving the handshake forward by one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeProgress {
    Done,
    NeedMore,
}

/// Identity material the Cryptor is built from: the HU's own certificate
/// chain and private key (presented to the phone), and the trust anchor
/// used to verify the phone's client certificate (mutual TLS). Provisioning
/// these files is out of scope (§1 Non-goals) — this just reads paths it is
/// told about.
#[derive(Clone)]
pub struct TlsMaterial {
    pub server_config: Arc<ServerConfig>,
}

impl TlsMaterial {
    pub fn load(cert_path: &str, key_path: &str, client_ca_path: &str) -> Result<Self> {
        let certs = load_certs(cert_path)?;
        let key = load_private_key(key_path)?;
        let client_roots = load_certs(client_ca_path)?;

        let mut roots = RootCertStore::empty();
        for cert in client_roots {
            roots
                .add(cert)
                .map_err(|e| Error::Tls(format!("invalid client CA certificate: {e}")))?;
        }
        let client_verifier = WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| Error::Tls(format!("failed to build client verifier: {e}")))?;

        let server_config = ServerConfig::builder()
            .with_client_cert_verifier(client_verifier)
            .with_single_cert(certs, key)
            .map_err(|e| Error::Tls(format!("invalid server certificate/key: {e}")))?;

        Ok(TlsMaterial { server_config: Arc::new(server_config) })
    }
}

fn load_certs(path: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let bytes = std::fs::read(path).map_err(Error::Transport)?;
    rustls_pemfile::certs(&mut Cursor::new(bytes))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(Error::Transport)
}

fn load_private_key(path: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let bytes = std::fs::read(path).map_err(Error::Transport)?;
    rustls_pemfile::private_key(&mut Cursor::new(bytes))
        .map_err(Error::Transport)?
        .ok_or_else(|| Error::Tls(format!("no private key found in {path}")))
}

/// The per-connection Cryptor. A fresh instance is built for every accepted
/// TCP connection; it is never reused across reconnects (§9 design note).
pub struct Cryptor {
    conn: ServerConnection,
}

impl Cryptor {
    /// `beginHandshake()`: seeds the server role. `rustls::ServerConnection`
    /// starts out waiting for a ClientHello as soon as it's constructed, so
    /// there is no separate seeding step to perform — this method exists to
    /// keep the state machine's code reading like the spec's prose.
    pub fn begin_handshake(material: &TlsMaterial) -> Result<Self> {
        let conn = ServerConnection::new(material.server_config.clone())
            .map_err(|e| Error::Tls(format!("failed to start handshake: {e}")))?;
        Ok(Cryptor { conn })
    }

    /// `writeHandshakeBuffer(ciphertext_in)`: feed ciphertext received from the peer.
    pub fn write_handshake_buffer(&mut self, ciphertext_in: &[u8]) -> Result<()> {
        let mut cursor = Cursor::new(ciphertext_in);
        while (cursor.position() as usize) < ciphertext_in.len() {
            self.conn
                .read_tls(&mut cursor)
                .map_err(|e| Error::Tls(format!("failed to ingest handshake bytes: {e}")))?;
        }
        Ok(())
    }

    /// `readHandshakeBuffer() -> ciphertext_out`: drain ciphertext the engine wants to send.
    pub fn read_handshake_buffer(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while self.conn.wants_write() {
            self.conn
                .write_tls(&mut out)
                .map_err(|e| Error::Tls(format!("failed to drain handshake bytes: {e}")))?;
        }
        Ok(out)
    }

    /// `doHandshake() -> Done | NeedMore`: drives the state machine forward.
    /// Must be called after every `write_handshake_buffer`.
    pub fn do_handshake(&mut self) -> Result<HandshakeProgress> {
        self.conn
            .process_new_packets()
            .map_err(|e| Error::Tls(format!("handshake processing failed: {e}")))?;
        if self.conn.is_handshaking() {
            Ok(HandshakeProgress::NeedMore)
        } else {
            Ok(HandshakeProgress::Done)
        }
    }

    /// `encrypt(plaintext) -> ciphertext`. Only valid after the handshake is `Done`.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.conn
            .writer()
            .write_all(plaintext)
            .map_err(|e| Error::Tls(format!("failed to queue plaintext: {e}")))?;
        let mut out = Vec::new();
        while self.conn.wants_write() {
            self.conn
                .write_tls(&mut out)
                .map_err(|e| Error::Tls(format!("failed to emit ciphertext: {e}")))?;
        }
        Ok(out)
    }

    /// `decrypt(ciphertext) -> plaintext`. Raises `TlsError` on any engine failure.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(ciphertext);
        while (cursor.position() as usize) < ciphertext.len() {
            self.conn
                .read_tls(&mut cursor)
                .map_err(|e| Error::Tls(format!("failed to ingest ciphertext: {e}")))?;
        }
        self.conn
            .process_new_packets()
            .map_err(|e| Error::Tls(format!("decrypt failed: {e}")))?;

        let mut plaintext = Vec::new();
        let mut reader = self.conn.reader();
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => plaintext.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(Error::Tls(format!("failed to read plaintext: {e}"))),
            }
        }
        Ok(plaintext)
    }
}
