//! Transport-specific send/recv plumbing. Each variant owns whatever
//! platform resource backs it; [`Transport::send_raw`] /
//! [`Transport::recv_raw`] are the only operations the rest of the crate
//! needs from any of them.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
#[cfg(unix)]
use std::os::fd::{AsRawFd, RawFd};
#[cfg(unix)]
use std::os::unix::net::UnixDatagram;
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;

use vnetfab_ring::{FrameRing, PopError, PushError, RingBuffer};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("no port free in the requested auto-allocation range")]
    NoFreePort,
    #[error("operation not supported by this transport")]
    Unsupported,
    #[error("would block")]
    WouldBlock,
    #[error("ring error: {0:?}")]
    Ring(PopError),
}

/// One end of an in-process FIFO cross-connect: sends land on the peer's
/// queue, receives drain this endpoint's own queue.
pub struct FifoEndpoint {
    pub outbound: Arc<RingBuffer>,
    pub inbound: Arc<RingBuffer>,
}

impl FifoEndpoint {
    /// Builds both ends of a cross-connected pair: `a`'s outbound is `b`'s
    /// inbound and vice versa, mirroring the reference NIO's symmetric
    /// wiring.
    pub fn pair(capacity_bytes: usize) -> (FifoEndpoint, FifoEndpoint) {
        let a_to_b = Arc::new(RingBuffer::new(capacity_bytes));
        let b_to_a = Arc::new(RingBuffer::new(capacity_bytes));
        (
            FifoEndpoint { outbound: a_to_b.clone(), inbound: b_to_a.clone() },
            FifoEndpoint { outbound: b_to_a, inbound: a_to_b },
        )
    }
}

pub enum Transport {
    Udp { socket: UdpSocket, remote: Option<SocketAddr> },
    Multicast { socket: UdpSocket, group: SocketAddr },
    #[cfg(unix)]
    Unix { socket: UnixDatagram, remote: Option<std::path::PathBuf> },
    #[cfg(unix)]
    Tap { file: std::fs::File },
    TcpClient { stream: TcpStream },
    TcpServer { listener: TcpListener, accepted: Option<TcpStream> },
    #[cfg(unix)]
    Pcap { capture: pcap::Capture<pcap::Active> },
    Fifo { endpoint: FifoEndpoint },
    Null,
}

impl Transport {
    pub fn udp(bind: SocketAddr, remote: Option<SocketAddr>) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(bind)?;
        if let Some(addr) = remote {
            socket.connect(addr)?;
        }
        socket.set_nonblocking(true)?;
        Ok(Transport::Udp { socket, remote })
    }

    /// Binds the first free port in `[start, end]` on `host`.
    pub fn udp_auto(host: std::net::IpAddr, start: u16, end: u16) -> Result<Self, TransportError> {
        for port in start..=end {
            if let Ok(socket) = UdpSocket::bind(SocketAddr::new(host, port)) {
                socket.set_nonblocking(true)?;
                return Ok(Transport::Udp { socket, remote: None });
            }
        }
        Err(TransportError::NoFreePort)
    }

    pub fn multicast(group: SocketAddr, ttl: u32) -> Result<Self, TransportError> {
        let domain = if group.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        match group {
            SocketAddr::V4(v4) => {
                socket.join_multicast_v4(v4.ip(), &std::net::Ipv4Addr::UNSPECIFIED)?;
                socket.set_multicast_ttl_v4(ttl)?;
                socket.bind(&SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), v4.port()).into())?;
            }
            SocketAddr::V6(v6) => {
                socket.join_multicast_v6(v6.ip(), 0)?;
                socket.set_multicast_hops_v6(ttl)?;
                socket.bind(&SocketAddr::new(std::net::IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), v6.port()).into())?;
            }
        }
        socket.set_nonblocking(true)?;
        Ok(Transport::Multicast { socket: socket.into(), group })
    }

    #[cfg(unix)]
    pub fn unix_datagram(
        local: &std::path::Path,
        remote: Option<std::path::PathBuf>,
    ) -> Result<Self, TransportError> {
        let _ = std::fs::remove_file(local);
        let socket = UnixDatagram::bind(local)?;
        socket.set_nonblocking(true)?;
        Ok(Transport::Unix { socket, remote })
    }

    #[cfg(unix)]
    pub fn tap(ifname: &str) -> Result<Self, TransportError> {
        use std::os::unix::io::FromRawFd;

        const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
        const IFF_TAP: libc::c_short = 0x0002;
        const IFF_NO_PI: libc::c_short = 0x1000;

        #[repr(C)]
        struct IfReq {
            ifr_name: [libc::c_char; libc::IFNAMSIZ],
            ifr_flags: libc::c_short,
            _pad: [u8; 22],
        }

        let fd = unsafe { libc::open(c"/dev/net/tun".as_ptr(), libc::O_RDWR) };
        if fd < 0 {
            return Err(TransportError::Io(io::Error::last_os_error()));
        }

        let mut req: IfReq = unsafe { std::mem::zeroed() };
        for (dst, src) in req.ifr_name.iter_mut().zip(ifname.bytes()) {
            *dst = src as libc::c_char;
        }
        req.ifr_flags = IFF_TAP | IFF_NO_PI;

        let rc = unsafe { libc::ioctl(fd, TUNSETIFF, &mut req as *mut IfReq) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(TransportError::Io(err));
        }

        let file = unsafe { std::fs::File::from_raw_fd(fd) };
        Ok(Transport::Tap { file })
    }

    pub fn tcp_client(remote: SocketAddr) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(remote)?;
        stream.set_nonblocking(true)?;
        Ok(Transport::TcpClient { stream })
    }

    pub fn tcp_server(bind: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(bind)?;
        listener.set_nonblocking(true)?;
        Ok(Transport::TcpServer { listener, accepted: None })
    }

    #[cfg(unix)]
    pub fn pcap(device: &str) -> Result<Self, TransportError> {
        let capture = pcap::Capture::from_device(device)
            .map_err(|_| TransportError::Unsupported)?
            .promisc(true)
            .immediate_mode(true)
            .open()
            .map_err(|_| TransportError::Unsupported)?;
        Ok(Transport::Pcap { capture })
    }

    pub fn fifo(endpoint: FifoEndpoint) -> Self {
        Transport::Fifo { endpoint }
    }

    pub fn null() -> Self {
        Transport::Null
    }

    pub fn send_raw(&mut self, pkt: &[u8]) -> Result<usize, TransportError> {
        match self {
            Transport::Udp { socket, remote } => {
                if let Some(addr) = remote {
                    Ok(socket.send_to(pkt, *addr)?)
                } else {
                    Ok(socket.send(pkt)?)
                }
            }
            Transport::Multicast { socket, group } => Ok(socket.send_to(pkt, *group)?),
            #[cfg(unix)]
            Transport::Unix { socket, remote } => match remote {
                Some(path) => Ok(socket.send_to(pkt, path)?),
                None => Ok(socket.send(pkt)?),
            },
            #[cfg(unix)]
            Transport::Tap { file } => {
                use std::io::Write;
                Ok(file.write(pkt)?)
            }
            Transport::TcpClient { stream } => {
                use std::io::Write;
                Ok(stream.write(pkt)?)
            }
            Transport::TcpServer { accepted, .. } => match accepted {
                Some(stream) => {
                    use std::io::Write;
                    Ok(stream.write(pkt)?)
                }
                None => Err(TransportError::WouldBlock),
            },
            #[cfg(unix)]
            Transport::Pcap { capture } => {
                capture.sendpacket(pkt).map_err(|_| TransportError::Unsupported)?;
                Ok(pkt.len())
            }
            Transport::Fifo { endpoint } => match endpoint.outbound.try_push(pkt) {
                Ok(()) => Ok(pkt.len()),
                Err(PushError::Full) => Err(TransportError::WouldBlock),
                Err(PushError::TooLarge) => Err(TransportError::Unsupported),
            },
            Transport::Null => Ok(pkt.len()),
        }
    }

    /// Attempts one non-blocking receive. `Ok(None)` means no frame was
    /// ready right now (the caller should treat this like EAGAIN).
    pub fn try_recv_raw(&mut self, buf: &mut [u8]) -> Result<Option<usize>, TransportError> {
        match self {
            Transport::Udp { socket, .. } => match socket.recv(buf) {
                Ok(n) => Ok(Some(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(e) => Err(e.into()),
            },
            Transport::Multicast { socket, .. } => match socket.recv(buf) {
                Ok(n) => Ok(Some(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(e) => Err(e.into()),
            },
            #[cfg(unix)]
            Transport::Unix { socket, .. } => match socket.recv(buf) {
                Ok(n) => Ok(Some(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(e) => Err(e.into()),
            },
            #[cfg(unix)]
            Transport::Tap { file } => {
                use std::io::Read;
                match file.read(buf) {
                    Ok(n) => Ok(Some(n)),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
            Transport::TcpClient { stream } => {
                use std::io::Read;
                match stream.read(buf) {
                    Ok(n) => Ok(Some(n)),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
            Transport::TcpServer { listener, accepted } => {
                if accepted.is_none() {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            stream.set_nonblocking(true)?;
                            *accepted = Some(stream);
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                        Err(e) => return Err(e.into()),
                    }
                }
                use std::io::Read;
                match accepted.as_mut().unwrap().read(buf) {
                    Ok(n) => Ok(Some(n)),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
            #[cfg(unix)]
            Transport::Pcap { capture } => match capture.next_packet() {
                Ok(packet) => {
                    let n = packet.data.len().min(buf.len());
                    buf[..n].copy_from_slice(&packet.data[..n]);
                    Ok(Some(n))
                }
                Err(pcap::Error::TimeoutExpired) => Ok(None),
                Err(_) => Err(TransportError::Unsupported),
            },
            Transport::Fifo { endpoint } => match endpoint.inbound.try_pop() {
                Ok(frame) => {
                    let n = frame.len().min(buf.len());
                    buf[..n].copy_from_slice(&frame[..n]);
                    Ok(Some(n))
                }
                Err(PopError::Empty) => Ok(None),
                Err(e) => Err(TransportError::Ring(e)),
            },
            // Null never signals data; the dedicated listener thread just
            // never wakes up for it.
            Transport::Null => Ok(None),
        }
    }

    #[cfg(unix)]
    pub fn raw_fd(&self) -> Option<RawFd> {
        match self {
            Transport::Udp { socket, .. } => Some(socket.as_raw_fd()),
            Transport::Multicast { socket, .. } => Some(socket.as_raw_fd()),
            Transport::Unix { socket, .. } => Some(socket.as_raw_fd()),
            Transport::Tap { file } => Some(file.as_raw_fd()),
            Transport::TcpClient { stream } => Some(stream.as_raw_fd()),
            Transport::TcpServer { listener, .. } => Some(listener.as_raw_fd()),
            Transport::Pcap { capture } => Some(capture.as_raw_fd()),
            Transport::Fifo { .. } | Transport::Null => None,
        }
    }

    #[cfg(not(unix))]
    pub fn raw_fd(&self) -> Option<i32> {
        None
    }

    /// Whether this transport has no pollable fd and needs a dedicated
    /// listener thread instead of sharing the `select`-style multiplexer.
    pub fn needs_dedicated_thread(&self) -> bool {
        matches!(self, Transport::Fifo { .. } | Transport::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_pair_delivers_in_both_directions() {
        let (a, b) = FifoEndpoint::pair(64 * 1024);
        let mut transport_a = Transport::fifo(a);
        let mut transport_b = Transport::fifo(b);

        transport_a.send_raw(b"from a").unwrap();
        let mut buf = [0u8; 64];
        let n = transport_b.try_recv_raw(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"from a");

        transport_b.send_raw(b"from b").unwrap();
        let n = transport_a.try_recv_raw(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"from b");
    }

    #[test]
    fn null_transport_accepts_sends_and_never_has_data() {
        let mut t = Transport::null();
        assert_eq!(t.send_raw(b"anything").unwrap(), 8);
        let mut buf = [0u8; 16];
        assert_eq!(t.try_recv_raw(&mut buf).unwrap(), None);
    }

    #[test]
    fn udp_loopback_round_trips() {
        let mut a = Transport::udp("127.0.0.1:0".parse().unwrap(), None).unwrap();
        let a_addr = match &a {
            Transport::Udp { socket, .. } => socket.local_addr().unwrap(),
            _ => unreachable!(),
        };
        let mut b = Transport::udp("127.0.0.1:0".parse().unwrap(), Some(a_addr)).unwrap();
        b.send_raw(b"ping").unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        let mut buf = [0u8; 16];
        let n = a.try_recv_raw(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"ping");
    }
}
