use std::{
    io::{self, ErrorKind, Read, Write},
    net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream, UdpSocket},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use log::{debug, error, info, trace, warn};
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};

use crate::config::ClientConfig;

use super::{ConnectionStatus, Link, TransportError, TransportKind, resolver, sys};

/// Read timeout once part of a message has arrived.
pub const BURST_TIMEOUT: Duration = Duration::from_millis(500);
/// Read timeout after [`Link::interrupt`].
pub const STOP_TIMEOUT: Duration = Duration::from_millis(100);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
enum Channel {
    Tcp(TcpStream),
    Udp { socket: UdpSocket, peer: SocketAddr },
}

impl Channel {
    fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        match self {
            Channel::Tcp(stream) => stream.set_read_timeout(Some(timeout)),
            Channel::Udp { socket, .. } => socket.set_read_timeout(Some(timeout)),
        }
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Channel::Tcp(stream) => {
                let mut stream = stream;
                stream.read(buf)
            }
            Channel::Udp { socket, .. } => socket.recv_from(buf).map(|(n, _)| n),
        }
    }

    fn write(&self, data: &[u8]) -> io::Result<usize> {
        match self {
            Channel::Tcp(stream) => {
                let mut stream = stream;
                stream.write(data)
            }
            Channel::Udp { socket, peer } => socket.send_to(data, peer),
        }
    }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        let res = match self {
            Channel::Tcp(stream) => stream.shutdown(how),
            Channel::Udp { socket, .. } => SockRef::from(socket).shutdown(how),
        };
        match res {
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            res => res,
        }
    }
}

/// Owner of the single TCP or UDP socket of a client.
///
/// The socket lives in a mutex-guarded slot. Reads clone the handle out of the slot and
/// block without the lock held, so a long idle read never stalls a sender; closing the
/// slot shuts the socket down, which wakes any such read.
#[derive(Debug)]
pub struct Transport {
    config: ClientConfig,
    slot: Mutex<Option<Arc<Channel>>>,
    interrupted: AtomicBool,
    /// Set when a TCP read sees end of stream; cleared by the next connect.
    peer_closed: AtomicBool,
    sent: AtomicU64,
}

impl Transport {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            slot: Mutex::new(None),
            interrupted: AtomicBool::new(false),
            peer_closed: AtomicBool::new(false),
            sent: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn kind(&self) -> TransportKind {
        self.config.kind
    }

    /// Address of the peer the current socket talks to.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match self.lock().as_deref()? {
            Channel::Tcp(stream) => stream.peer_addr().ok(),
            Channel::Udp { peer, .. } => Some(*peer),
        }
    }

    /// Local address of the current socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.lock().as_deref()? {
            Channel::Tcp(stream) => stream.local_addr().ok(),
            Channel::Udp { socket, .. } => socket.local_addr().ok(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<Channel>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self, addr: SocketAddr) -> Result<Channel, TransportError> {
        let domain = Domain::for_address(addr);
        match self.config.kind {
            TransportKind::Tcp => {
                let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
                debug!("connecting TCP socket to {addr}");
                socket.connect_timeout(&addr.into(), CONNECT_TIMEOUT)?;
                if let Some(idle) = self.config.keep_alive_interval() {
                    socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(idle))?;
                    debug!("keep-alive enabled every {}s", idle.as_secs());
                }
                Ok(Channel::Tcp(socket.into()))
            }
            TransportKind::Udp => {
                let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
                let unspecified = match addr.ip() {
                    IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                };
                socket.bind(&SocketAddr::new(unspecified, 0).into())?;
                Ok(Channel::Udp {
                    socket: socket.into(),
                    peer: addr,
                })
            }
        }
    }
}

impl Link for Transport {
    fn connect(&self) -> Result<(), TransportError> {
        let mut slot = self.lock();
        if let Some(stale) = slot.take() {
            if let Err(e) = stale.shutdown(Shutdown::Both) {
                debug!("closing stale socket: {e}");
            }
        }
        self.sent.store(0, Ordering::SeqCst);

        let addr = resolver::resolve(
            self.config.ip.as_deref(),
            self.config.port,
            self.config.domain.as_deref(),
        )?;
        let channel = self.open(addr)?;

        self.interrupted.store(false, Ordering::SeqCst);
        self.peer_closed.store(false, Ordering::SeqCst);
        *slot = Some(Arc::new(channel));
        info!("{} link open to {addr}", self.config.kind);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        let mut slot = self.lock();
        let Some(channel) = slot.take() else {
            return Ok(());
        };
        channel.shutdown(Shutdown::Both)?;
        info!("{} link closed", self.config.kind);
        Ok(())
    }

    fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let slot = self.lock();
        let channel = slot.as_ref().ok_or(TransportError::NotConnected)?;

        let written = channel.write(data).inspect_err(|e| {
            error!("{} send failed: {e}", self.config.kind);
        })?;
        self.sent.fetch_add(written as u64, Ordering::SeqCst);

        if written != data.len() {
            return Err(TransportError::ShortWrite {
                written,
                expected: data.len(),
            });
        }
        trace!("sent {written} bytes");
        Ok(())
    }

    fn read(&self, bufsize: usize) -> Vec<u8> {
        let Some(channel) = self.lock().clone() else {
            return Vec::new();
        };

        let bufsize = bufsize.max(1);
        let mut buf = vec![0u8; bufsize];
        let mut data = Vec::new();
        loop {
            let timeout = if !data.is_empty() {
                BURST_TIMEOUT
            } else if self.interrupted.load(Ordering::SeqCst) {
                STOP_TIMEOUT
            } else {
                self.config.idle_timeout
            };
            if let Err(e) = channel.set_read_timeout(timeout) {
                error!("{} read timeout: {e}", self.config.kind);
                break;
            }

            match channel.recv(&mut buf[..bufsize - data.len()]) {
                Ok(0) => {
                    if matches!(*channel, Channel::Tcp(_))
                        && !self.interrupted.load(Ordering::SeqCst)
                    {
                        debug!("peer closed the TCP stream");
                        self.peer_closed.store(true, Ordering::SeqCst);
                    }
                    break;
                }
                Ok(n) => {
                    trace!("read {n} bytes");
                    data.extend_from_slice(&buf[..n]);
                    if data.len() >= bufsize {
                        break;
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("{} read failed: {e}", self.config.kind);
                    break;
                }
            }
        }
        data
    }

    fn status(&self) -> ConnectionStatus {
        let slot = self.lock();
        match slot.as_deref() {
            None => ConnectionStatus::Error,
            Some(Channel::Udp { .. }) => ConnectionStatus::Connected,
            Some(Channel::Tcp(_)) if self.peer_closed.load(Ordering::SeqCst) => {
                ConnectionStatus::Disconnected
            }
            Some(Channel::Tcp(stream)) => match sys::tcp_state(stream) {
                Ok(state) => state.status,
                Err(e) => {
                    warn!("TCP status query failed: {e}");
                    ConnectionStatus::Error
                }
            },
        }
    }

    fn acked_bytes(&self) -> u64 {
        let slot = self.lock();
        match slot.as_deref() {
            Some(Channel::Tcp(stream)) => sys::tcp_state(stream)
                .ok()
                .and_then(|state| state.bytes_acked)
                .unwrap_or_else(|| self.sent.load(Ordering::SeqCst)),
            Some(Channel::Udp { .. }) => self.sent.load(Ordering::SeqCst),
            None => 0,
        }
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        if let Some(channel) = self.lock().as_ref() {
            let _ = channel.set_read_timeout(STOP_TIMEOUT);
            if let Err(e) = channel.shutdown(Shutdown::Read) {
                debug!("interrupting read: {e}");
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            warn!("failed to close link on drop: {e}");
        }
    }
}
