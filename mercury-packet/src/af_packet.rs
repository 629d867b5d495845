//! Linux AF_PACKET capture.
//!
//! One raw socket per worker, bound to the interface. With more than one
//! worker the sockets join a fanout group in hash mode, so the kernel steers
//! every packet of a flow to the same socket.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, OwnedFd};
use std::time::Duration;

use libc::{c_int, c_void, socklen_t};
use mercury_clock::{Clock, SystemClock};
use nix::errno::Errno;
use nix::net::if_::if_nametoindex;
use nix::sys::socket::{
    recv, setsockopt, socket, sockopt, AddressFamily, MsgFlags, SockFlag, SockProtocol, SockType,
};
use nix::sys::time::TimeVal;

use crate::capture::{CaptureBinder, CaptureBinding, CaptureError};
use crate::RawPacket;

const PACKET_FANOUT: c_int = 18;
const PACKET_FANOUT_HASH: c_int = 0;

/// Largest frame read from the socket; longer frames are truncated and
/// keep their wire length in `orig_len`.
const SNAPLEN: usize = 65_535;

/// Binds AF_PACKET sockets.
#[derive(Debug, Clone, Copy)]
pub struct AfPacketBinder {
    /// Kernel receive buffer requested per socket.
    pub rcvbuf_bytes: usize,
    /// Receive timeout; bounds how long a worker waits before rechecking stop.
    pub timeout: Duration,
    fanout_group: u16,
}

impl AfPacketBinder {
    pub fn new(rcvbuf_bytes: usize) -> Self {
        Self {
            rcvbuf_bytes,
            timeout: Duration::from_millis(100),
            fanout_group: (std::process::id() & 0xffff) as u16,
        }
    }

    fn receive_timeout(&self) -> TimeVal {
        TimeVal::new(
            self.timeout.as_secs() as libc::time_t,
            self.timeout.subsec_micros() as libc::suseconds_t,
        )
    }

    fn fanout_option(&self) -> c_int {
        c_int::from(self.fanout_group) | (PACKET_FANOUT_HASH << 16)
    }
}

/// Bind `fd` to the interface with index `ifindex`.
///
/// nix offers no constructor for a link-layer address, so this goes through
/// libc directly.
fn bind_to_interface(fd: &OwnedFd, ifindex: u32) -> io::Result<()> {
    // SAFETY: sockaddr_ll is plain old data; all-zero is a valid value.
    let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
    addr.sll_family = libc::AF_PACKET as u16;
    addr.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
    addr.sll_ifindex = ifindex as c_int;
    // SAFETY: `addr` is a valid sockaddr_ll and the length matches it.
    let rc = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_ll>() as socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Join the PACKET_FANOUT group described by `value`; nix has no sockopt for it.
fn join_fanout(fd: &OwnedFd, value: c_int) -> io::Result<()> {
    // SAFETY: `value` is a live c_int and the length passed is its size.
    let rc = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_PACKET,
            PACKET_FANOUT,
            &value as *const c_int as *const c_void,
            mem::size_of::<c_int>() as socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

impl CaptureBinder for AfPacketBinder {
    fn bind(
        &self,
        interface: &str,
        _worker: usize,
        workers: usize,
    ) -> Result<Box<dyn CaptureBinding>, CaptureError> {
        let bind_err = |source: io::Error| CaptureError::Bind {
            interface: interface.to_string(),
            source,
        };
        let ifindex = if_nametoindex(interface).map_err(|_| CaptureError::InterfaceNotFound {
            interface: interface.to_string(),
        })?;

        let fd = socket(
            AddressFamily::Packet,
            SockType::Raw,
            SockFlag::SOCK_CLOEXEC,
            SockProtocol::EthAll,
        )
        .map_err(|e| bind_err(e.into()))?;
        setsockopt(&fd, sockopt::RcvBuf, &self.rcvbuf_bytes).map_err(|e| bind_err(e.into()))?;
        setsockopt(&fd, sockopt::ReceiveTimeout, &self.receive_timeout())
            .map_err(|e| bind_err(e.into()))?;
        bind_to_interface(&fd, ifindex).map_err(bind_err)?;

        if workers > 1 {
            join_fanout(&fd, self.fanout_option()).map_err(bind_err)?;
        }

        Ok(Box::new(AfPacketSocket {
            fd,
            buf: vec![0u8; SNAPLEN],
            clock: SystemClock,
        }))
    }
}

struct AfPacketSocket {
    fd: OwnedFd,
    buf: Vec<u8>,
    clock: SystemClock,
}

impl CaptureBinding for AfPacketSocket {
    fn next_packet(&mut self) -> Result<Option<RawPacket>, CaptureError> {
        // MSG_TRUNC reports the full frame length even when it exceeds the buffer.
        let wire_len = match recv(self.fd.as_raw_fd(), &mut self.buf, MsgFlags::MSG_TRUNC) {
            Ok(n) => n,
            Err(Errno::EAGAIN | Errno::EINTR | Errno::ETIMEDOUT) => return Ok(None),
            Err(e) => return Err(CaptureError::Receive(e.into())),
        };
        let captured = wire_len.min(self.buf.len());
        Ok(Some(RawPacket {
            timestamp: self.clock.now(),
            data: self.buf[..captured].to_vec(),
            orig_len: u32::try_from(wire_len).unwrap_or(u32::MAX),
        }))
    }
}
