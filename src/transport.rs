//! Multicast UDP plumbing.
//!
//! Owns the mDNS group sockets and the reader threads that decode incoming
//! packets. Readers never touch engine state; each decoded message is handed
//! to a callback (in practice, a channel into the engine loop), so all
//! protocol logic stays single-threaded.

use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use socket2::{Domain, Protocol, Socket, Type};

use crate::{
    packet::{decoder::Message, MAX_PACKET_SIZE},
    MDNS_GROUP_V4, MDNS_GROUP_V6, MDNS_PORT,
};

/// Which address families to browse on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpVersion {
    #[default]
    V4Only,
    V6Only,
    Both,
}

impl IpVersion {
    fn v4(self) -> bool {
        matches!(self, IpVersion::V4Only | IpVersion::Both)
    }

    fn v6(self) -> bool {
        matches!(self, IpVersion::V6Only | IpVersion::Both)
    }
}

/// How often reader threads wake up to check the stop flag.
const READ_TIMEOUT: Duration = Duration::from_millis(250);

/// The bound mDNS group sockets, one per enabled address family.
pub(crate) struct MulticastTransport {
    sockets: Vec<GroupSocket>,
    stop: Arc<AtomicBool>,
    readers: Vec<thread::JoinHandle<()>>,
}

struct GroupSocket {
    sock: UdpSocket,
    group: SocketAddr,
}

impl MulticastTransport {
    /// Binds and joins the multicast groups for `ip_version`.
    pub(crate) fn open(ip_version: IpVersion) -> io::Result<Self> {
        let interfaces = if_addrs::get_if_addrs().unwrap_or_else(|err| {
            log::warn!("cannot enumerate interfaces, using defaults: {}", err);
            Vec::new()
        });

        let mut sockets = Vec::new();
        if ip_version.v4() {
            sockets.push(GroupSocket {
                sock: open_v4(&interfaces)?,
                group: SocketAddrV4::new(MDNS_GROUP_V4, MDNS_PORT).into(),
            });
        }
        if ip_version.v6() {
            sockets.push(GroupSocket {
                sock: open_v6(&interfaces)?,
                group: SocketAddrV6::new(MDNS_GROUP_V6, MDNS_PORT, 0, 0).into(),
            });
        }

        Ok(Self {
            sockets,
            stop: Arc::new(AtomicBool::new(false)),
            readers: Vec::new(),
        })
    }

    /// Spawns one reader thread per socket. Each decoded message is passed to
    /// a clone of `on_packet`.
    pub(crate) fn start<F>(&mut self, on_packet: F) -> io::Result<()>
    where
        F: Fn(Message) + Send + Clone + 'static,
    {
        for gs in &self.sockets {
            let sock = gs.sock.try_clone()?;
            let group = gs.group;
            let stop = self.stop.clone();
            let on_packet = on_packet.clone();
            let name = format!("mdns-recv-{}", gs.group.ip());
            let handle = thread::Builder::new()
                .name(name)
                .spawn(move || reader_loop(sock, group, stop, on_packet))?;
            self.readers.push(handle);
        }
        Ok(())
    }

    /// Multicasts `buf` on every enabled family. A failure on one socket is
    /// logged and does not prevent the others from sending.
    pub(crate) fn send(&self, buf: &[u8]) {
        for gs in &self.sockets {
            match gs.sock.send_to(buf, gs.group) {
                Ok(_) => log::trace!("sent {} bytes to {}", buf.len(), gs.group),
                Err(err) => log::warn!("failed to send to {}: {}", gs.group, err),
            }
        }
    }

    /// Stops and joins the reader threads. Returns once no further callbacks
    /// will be made.
    pub(crate) fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.readers.drain(..) {
            if handle.join().is_err() {
                log::warn!("reader thread panicked");
            }
        }
    }
}

fn open_v4(interfaces: &[if_addrs::Interface]) -> io::Result<UdpSocket> {
    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_reuse_address(true)?;
    #[cfg(unix)]
    sock.set_reuse_port(true)?;
    sock.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MDNS_PORT).into())?;

    let sock = UdpSocket::from(sock);
    let mut joined = 0;
    for iface in interfaces {
        if iface.is_loopback() {
            continue;
        }
        let IpAddr::V4(addr) = iface.ip() else {
            continue;
        };
        match sock.join_multicast_v4(&MDNS_GROUP_V4, &addr) {
            Ok(()) => joined += 1,
            Err(err) => log::debug!("cannot join {} on {}: {}", MDNS_GROUP_V4, addr, err),
        }
    }
    if joined == 0 {
        // No usable interface found; let the OS pick one.
        sock.join_multicast_v4(&MDNS_GROUP_V4, &Ipv4Addr::UNSPECIFIED)?;
    }
    sock.set_multicast_loop_v4(true)?;
    sock.set_read_timeout(Some(READ_TIMEOUT))?;
    Ok(sock)
}

fn open_v6(interfaces: &[if_addrs::Interface]) -> io::Result<UdpSocket> {
    let sock = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_only_v6(true)?;
    sock.set_reuse_address(true)?;
    #[cfg(unix)]
    sock.set_reuse_port(true)?;
    sock.bind(&SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, MDNS_PORT, 0, 0).into())?;

    let sock = UdpSocket::from(sock);
    let mut joined = 0;
    for iface in interfaces {
        if iface.is_loopback() || !iface.ip().is_ipv6() {
            continue;
        }
        let Some(index) = iface.index else {
            continue;
        };
        match sock.join_multicast_v6(&MDNS_GROUP_V6, index) {
            Ok(()) => joined += 1,
            Err(err) => log::debug!(
                "cannot join {} on interface {}: {}",
                MDNS_GROUP_V6,
                index,
                err
            ),
        }
    }
    if joined == 0 {
        sock.join_multicast_v6(&MDNS_GROUP_V6, 0)?;
    }
    sock.set_multicast_loop_v6(true)?;
    sock.set_read_timeout(Some(READ_TIMEOUT))?;
    Ok(sock)
}

fn reader_loop<F: Fn(Message)>(
    sock: UdpSocket,
    group: SocketAddr,
    stop: Arc<AtomicBool>,
    on_packet: F,
) {
    let mut buf = [0; MAX_PACKET_SIZE];
    while !stop.load(Ordering::Relaxed) {
        let (len, addr) = match sock.recv_from(&mut buf) {
            Ok(res) => res,
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(err) => {
                log::warn!("recv error: {}", err);
                thread::sleep(READ_TIMEOUT);
                // Interface churn can silently drop group membership;
                // rejoining is a no-op if it didn't.
                let res = match group.ip() {
                    IpAddr::V4(group) => sock.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED),
                    IpAddr::V6(group) => sock.join_multicast_v6(&group, 0),
                };
                if let Err(err) = res {
                    log::debug!("rejoin of {} failed: {}", group, err);
                }
                continue;
            }
        };

        match Message::decode(&buf[..len]) {
            Ok(msg) => {
                log::trace!("packet from {}: {} bytes", addr, len);
                on_packet(msg);
            }
            Err(err) => {
                log::debug!("dropping malformed packet from {}: {:?}", addr, err);
            }
        }
    }
    log::debug!("reader thread for {:?} exiting", sock.local_addr());
}
