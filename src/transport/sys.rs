//! Native TCP connection state.
//!
//! On Linux the kernel exposes the connection state and the acknowledged byte count
//! through the `TCP_INFO` socket option. Other targets fall back to a peer address
//! query for the state and report no acknowledgment information.
use std::net::TcpStream;

use super::ConnectionStatus;

/// Snapshot of the native state of a TCP socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TcpState {
    pub status: ConnectionStatus,
    /// Bytes acknowledged by the peer, if the platform reports it.
    pub bytes_acked: Option<u64>,
}

#[cfg(target_os = "linux")]
mod linux {
    use std::{io, mem, net::TcpStream, os::fd::AsRawFd};

    use super::{ConnectionStatus, TcpState};

    // Linux tcp_states.h
    const TCP_ESTABLISHED: u8 = 1;
    const TCP_SYN_SENT: u8 = 2;
    const TCP_SYN_RECV: u8 = 3;
    const TCP_FIN_WAIT1: u8 = 4;
    const TCP_CLOSING: u8 = 11;

    /// Prefix of `struct tcp_info` up to `tcpi_bytes_acked` (Linux 4.1+).
    #[repr(C)]
    #[derive(Default)]
    struct TcpInfo {
        state: u8,
        ca_state: u8,
        retransmits: u8,
        probes: u8,
        backoff: u8,
        options: u8,
        wscale: u8,
        app_limited: u8,
        // rto .. total_retrans
        counters: [u32; 24],
        pacing_rate: u64,
        max_pacing_rate: u64,
        bytes_acked: u64,
    }

    const BYTES_ACKED_END: usize = mem::size_of::<TcpInfo>();

    pub(crate) fn tcp_state(stream: &TcpStream) -> io::Result<TcpState> {
        let mut info = TcpInfo::default();
        let mut len = mem::size_of::<TcpInfo>() as libc::socklen_t;

        // SAFETY: `info` is a plain repr(C) buffer of `len` bytes and the kernel writes at
        // most `len` bytes into it.
        let rc = unsafe {
            libc::getsockopt(
                stream.as_raw_fd(),
                libc::IPPROTO_TCP,
                libc::TCP_INFO,
                (&mut info as *mut TcpInfo).cast::<libc::c_void>(),
                &mut len,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }

        let bytes_acked = (len as usize >= BYTES_ACKED_END).then_some(info.bytes_acked);
        Ok(TcpState {
            status: status_from_native(info.state),
            bytes_acked,
        })
    }

    fn status_from_native(state: u8) -> ConnectionStatus {
        match state {
            TCP_ESTABLISHED => ConnectionStatus::Connected,
            TCP_SYN_SENT | TCP_SYN_RECV => ConnectionStatus::Connecting,
            TCP_FIN_WAIT1..=TCP_CLOSING => ConnectionStatus::Disconnected,
            _ => ConnectionStatus::Error,
        }
    }

}

#[cfg(target_os = "linux")]
pub(crate) fn tcp_state(stream: &TcpStream) -> std::io::Result<TcpState> {
    linux::tcp_state(stream)
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn tcp_state(stream: &TcpStream) -> std::io::Result<TcpState> {
    use std::io::ErrorKind;

    if let Some(err) = stream.take_error()? {
        return Err(err);
    }
    let status = match stream.peer_addr() {
        Ok(_) => ConnectionStatus::Connected,
        Err(e) if e.kind() == ErrorKind::NotConnected => ConnectionStatus::Disconnected,
        Err(e) => return Err(e),
    };
    Ok(TcpState {
        status,
        bytes_acked: None,
    })
}
