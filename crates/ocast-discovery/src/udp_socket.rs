//! UDP datagram socket with a close-safe blocking receive loop (§4.A).

use ocast_core::Error;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::warn;

const RECV_BUFFER_SIZE: usize = 4096;
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Receives events from an open [`UdpSocket`].
pub trait UdpSocketListener: Send + Sync {
    /// A fresh copy of one received datagram, trimmed to its actual length.
    fn on_data_received(&self, data: Vec<u8>, remote: SocketAddr);
    /// Fires once, after the receive loop exits. `None` iff the close was requested by the user.
    fn on_closed(&self, error: Option<Error>);
}

/// A bound UDP socket with its own receive thread.
pub struct UdpSocket {
    socket: Arc<StdUdpSocket>,
    closing: Arc<AtomicBool>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl UdpSocket {
    /// Binds the socket (any port if `port == 0`) and starts the receive thread.
    pub fn open(port: u16, listener: Arc<dyn UdpSocketListener>) -> Result<Self, Error> {
        use socket2::{Domain, Protocol, Socket, Type};

        let socket2_sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| Error::transport(-3, "failed to create UDP socket").with_source(e))?;
        socket2_sock
            .set_reuse_address(true)
            .map_err(|e| Error::transport(-3, "failed to set SO_REUSEADDR").with_source(e))?;
        #[cfg(unix)]
        socket2_sock
            .set_reuse_port(true)
            .map_err(|e| Error::transport(-3, "failed to set SO_REUSEPORT").with_source(e))?;

        let bind_addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, port).into();
        socket2_sock
            .bind(&bind_addr.into())
            .map_err(|e| Error::transport(-3, "failed to bind UDP socket").with_source(e))?;
        socket2_sock
            .set_read_timeout(Some(RECV_POLL_INTERVAL))
            .map_err(|e| Error::transport(-3, "failed to configure UDP socket").with_source(e))?;

        let std_socket: StdUdpSocket = socket2_sock.into();
        let socket = Arc::new(std_socket);
        let closing = Arc::new(AtomicBool::new(false));

        let recv_socket = Arc::clone(&socket);
        let recv_closing = Arc::clone(&closing);
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; RECV_BUFFER_SIZE];
            loop {
                if recv_closing.load(Ordering::Acquire) {
                    listener.on_closed(None);
                    return;
                }
                match recv_socket.recv_from(&mut buf) {
                    Ok((len, remote)) => {
                        listener.on_data_received(buf[..len].to_vec(), remote);
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        if recv_closing.load(Ordering::Acquire) {
                            listener.on_closed(None);
                        } else {
                            warn!(error = %e, "UDP receive failed");
                            listener
                                .on_closed(Some(Error::transport(-3, "UDP receive failed").with_source(e)));
                        }
                        return;
                    }
                }
            }
        });

        Ok(Self {
            socket,
            closing,
            receiver: Mutex::new(Some(handle)),
        })
    }

    /// Joins an IPv4 multicast group on this socket.
    pub fn join_multicast_v4(&self, group: Ipv4Addr) -> Result<(), Error> {
        self.socket
            .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
            .map_err(|e| Error::transport(-3, "failed to join multicast group").with_source(e))
    }

    pub fn set_multicast_ttl_v4(&self, ttl: u32) -> Result<(), Error> {
        self.socket
            .set_multicast_ttl_v4(ttl)
            .map_err(|e| Error::transport(-3, "failed to set multicast TTL").with_source(e))
    }

    /// Fails with a "not open" transport error once the socket has been closed.
    pub fn send(&self, payload: &[u8], host: &str, port: u16) -> Result<(), Error> {
        if self.closing.load(Ordering::Acquire) {
            return Err(Error::transport(-3, "socket not open"));
        }
        self.socket
            .send_to(payload, (host, port))
            .map(|_| ())
            .map_err(|e| Error::transport(-3, "UDP send failed").with_source(e))
    }

    /// Idempotent: terminates the in-progress blocking receive and joins the receiver thread.
    pub fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.receiver.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for UdpSocket {
    fn drop(&mut self) {
        self.close();
    }
}
