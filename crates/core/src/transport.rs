//! The byte-oriented, connection-oriented duplex channel the Messenger
//! reads from and writes to.
//!
//! The spec's `Transport` contract (`connect`/`disconnect`/`isConnected`,
//! `write`, and `connected`/`disconnected`/`bytesReceived`/`error` signals)
//! maps directly onto `tokio::io::{AsyncRead, AsyncWrite}`: "connected" is
//! simply having a live stream, "disconnected" is `read()` returning `Ok(0)`
//! or an error, and "write" is `write_all`. `Session`/`Messenger` are
//! generic over any `T: AsyncRead + AsyncWrite + Unpin + Send`, so the
//! production `TcpStream` and the in-memory `tokio::io::duplex()` pair used
//! by tests satisfy the same bound without a hand-rolled trait standing
//! between them and tokio's own I/O traits.

use std::io;
#[cfg(target_os = "linux")]
use std::os::fd::AsRawFd;
use std::time::Duration;

use log::warn;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;

/// Apply the socket options the spec requires: `TCP_NODELAY` (media/input
/// latency is first-order visible to the user) and TCP keepalive tuned so a
/// silent network drop surfaces within ~15s, well under the protocol-level
/// ping timeout.
pub fn configure_tcp_socket(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;

    let sock_ref = SockRef::from(stream);
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(5))
        .with_interval(Duration::from_secs(3));
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let keepalive = keepalive.with_retries(3);
    sock_ref.set_tcp_keepalive(&keepalive)
}

/// Connects to `addr` (used by test harnesses and, in principle, a
/// phone-as-client variant); the production path is always server-side
/// accept, performed by the listener loop in the `aa-headunit` binary.
pub async fn connect(addr: std::net::SocketAddr) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    configure_tcp_socket(&stream)?;
    Ok(stream)
}

/// Polls `TCP_INFO` every 2s while a session is `Active`; aborts the
/// connection if the kernel reports the socket is no longer healthy.
///
/// Linux-only: `TCP_INFO` is a Linux-specific socket option. On other
/// targets this is a no-op that never fires, which is honest about what it
/// does rather than pretending to poll.
pub struct ConnectionWatchdog {
    #[cfg(target_os = "linux")]
    fd: std::os::fd::RawFd,
}

impl ConnectionWatchdog {
    pub fn new(stream: &TcpStream) -> Self {
        #[cfg(target_os = "linux")]
        {
            ConnectionWatchdog { fd: stream.as_raw_fd() }
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = stream;
            ConnectionWatchdog {}
        }
    }

    /// Returns `true` if the connection looks unhealthy enough to abort.
    #[cfg(target_os = "linux")]
    pub fn check(&self) -> bool {
        match read_tcp_info(self.fd) {
            Ok(info) => {
                let established = info.tcpi_state == libc::TCP_ESTABLISHED as u8;
                let backing_off = info.tcpi_backoff >= 3;
                let retransmitting = info.tcpi_retransmits > 4;
                if !established || backing_off || retransmitting {
                    warn!(
                        "connection watchdog: state={} backoff={} retransmits={}",
                        info.tcpi_state, info.tcpi_backoff, info.tcpi_retransmits
                    );
                    return true;
                }
                false
            }
            Err(e) => {
                warn!("connection watchdog: failed to read TCP_INFO: {e}");
                false
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn check(&self) -> bool {
        false
    }
}

#[cfg(target_os = "linux")]
fn read_tcp_info(fd: std::os::fd::RawFd) -> io::Result<libc::tcp_info> {
    let mut info: libc::tcp_info = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::tcp_info>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_INFO,
            &mut info as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn configure_rejects_nothing_on_a_connected_pair() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move { connect(addr).await.unwrap() });
        let (server, _) = listener.accept().await.unwrap();
        configure_tcp_socket(&server).unwrap();
        client.await.unwrap();
    }
}
