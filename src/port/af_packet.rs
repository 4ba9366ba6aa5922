//! AF_PACKET port
//!
//! Frames are read whole into a per-port scratch buffer sized for the largest
//! IPv4 datagram plus an 802.1Q Ethernet header. The kernel reports the real
//! length (`MSG_TRUNC`), so a longer frame (a GRO super-packet, say) is
//! released with [`Error::FrameTooLarge`] instead of being cut short.
//!
//! With rx VLAN offload, which most NICs enable by default, the kernel strips
//! the 802.1Q tag before the socket sees the frame and reports it in
//! `PACKET_AUXDATA`. The tag is written back into the frame so VLAN traffic is
//! classified and reflected with its tag intact.

use super::{PacketBuf, Port};
use crate::protocol::EtherType;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::ffi::CString;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

/// Ethernet header with one VLAN tag, plus the largest IPv4 datagram
pub const MAX_FRAME_SIZE: usize = 14 + 4 + 65535;

const PACKET_AUXDATA: libc::c_int = 8;
const TP_STATUS_VLAN_VALID: u32 = 1 << 4;
const TP_STATUS_VLAN_TPID_VALID: u32 = 1 << 6;

/// `struct tpacket_auxdata` from linux/if_packet.h
#[repr(C)]
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
struct AuxData {
    tp_status: u32,
    tp_len: u32,
    tp_snaplen: u32,
    tp_mac: u16,
    tp_net: u16,
    tp_vlan_tci: u16,
    tp_vlan_tpid: u16,
}

/// Raw socket bound to one interface, driven without blocking
pub struct AfPacketPort {
    fd: RawFd,
    ifindex: i32,
    name: String,
    promiscuous: bool,
    /// Receive buffer, reused across reads
    scratch: Mutex<Box<[u8]>>,
}

impl AfPacketPort {
    /// Open a raw socket on `ifname`, optionally enabling promiscuous mode
    pub fn open(ifname: &str, promiscuous: bool) -> Result<Self> {
        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                (libc::ETH_P_ALL as u16).to_be() as i32,
            )
        };
        if fd < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        // Close on any setup failure from here on
        let mut port = Self {
            fd,
            ifindex: 0,
            name: ifname.to_string(),
            promiscuous: false,
            scratch: Mutex::new(vec![0u8; MAX_FRAME_SIZE].into_boxed_slice()),
        };

        port.ifindex = Self::get_ifindex(fd, ifname)?;

        let sockaddr = libc::sockaddr_ll {
            sll_family: libc::AF_PACKET as u16,
            sll_protocol: (libc::ETH_P_ALL as u16).to_be(),
            sll_ifindex: port.ifindex,
            sll_hatype: 0,
            sll_pkttype: 0,
            sll_halen: 0,
            sll_addr: [0; 8],
        };

        let ret = unsafe {
            libc::bind(
                fd,
                &sockaddr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as u32,
            )
        };
        if ret < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        Self::enable_auxdata(fd)?;

        if promiscuous {
            Self::set_promisc(fd, port.ifindex, true)?;
            port.promiscuous = true;
        }

        tracing::info!(
            interface = ifname,
            ifindex = port.ifindex,
            promiscuous,
            "port opened"
        );

        Ok(port)
    }

    fn get_ifindex(fd: RawFd, ifname: &str) -> Result<i32> {
        let ifname_c = CString::new(ifname).map_err(|_| Error::InterfaceNotFound {
            name: ifname.to_string(),
        })?;

        let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
        let name_bytes = ifname_c.as_bytes_with_nul();
        if name_bytes.len() > ifr.ifr_name.len() {
            return Err(Error::InterfaceNotFound {
                name: ifname.to_string(),
            });
        }
        for (dst, &src) in ifr.ifr_name.iter_mut().zip(name_bytes) {
            *dst = src as libc::c_char;
        }

        let ret = unsafe { libc::ioctl(fd, libc::SIOCGIFINDEX, &mut ifr) };
        if ret < 0 {
            return Err(Error::InterfaceNotFound {
                name: ifname.to_string(),
            });
        }

        Ok(unsafe { ifr.ifr_ifru.ifru_ifindex })
    }

    fn set_promisc(fd: RawFd, ifindex: i32, enable: bool) -> Result<()> {
        let mreq = libc::packet_mreq {
            mr_ifindex: ifindex,
            mr_type: libc::PACKET_MR_PROMISC as u16,
            mr_alen: 0,
            mr_address: [0; 8],
        };

        let optname = if enable {
            libc::PACKET_ADD_MEMBERSHIP
        } else {
            libc::PACKET_DROP_MEMBERSHIP
        };

        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_PACKET,
                optname,
                &mreq as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::packet_mreq>() as u32,
            )
        };
        if ret < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        Ok(())
    }

    fn enable_auxdata(fd: RawFd) -> Result<()> {
        let on: libc::c_int = 1;
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_PACKET,
                PACKET_AUXDATA,
                &on as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as u32,
            )
        };
        if ret < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Read one frame. `None` when the socket has nothing queued.
    fn recv_one(&self) -> Result<Option<PacketBuf>> {
        let mut scratch = self.scratch.lock();
        loop {
            let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
            let mut control = [0u64; 8];
            let mut iov = libc::iovec {
                iov_base: scratch.as_mut_ptr() as *mut libc::c_void,
                iov_len: scratch.len(),
            };

            let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
            msg.msg_name = &mut addr as *mut _ as *mut libc::c_void;
            msg.msg_namelen = std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
            msg.msg_iov = &mut iov;
            msg.msg_iovlen = 1;
            msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
            msg.msg_controllen = std::mem::size_of_val(&control) as _;

            // MSG_TRUNC: return the real frame length even when it did not fit
            let n = unsafe {
                libc::recvmsg(self.fd, &mut msg, libc::MSG_DONTWAIT | libc::MSG_TRUNC)
            };

            if n < 0 {
                let err = io::Error::last_os_error();
                return match err.kind() {
                    io::ErrorKind::WouldBlock => Ok(None),
                    io::ErrorKind::Interrupted => continue,
                    _ => Err(Error::Io(err)),
                };
            }

            // The socket also sees frames this host sends, including our own
            if addr.sll_pkttype == libc::PACKET_OUTGOING as u8 {
                continue;
            }

            let len = received_len(n as usize, scratch.len())?;
            let mut frame = scratch[..len].to_vec();
            if let Some((tpid, tci)) = unsafe { vlan_from_auxdata(&msg) } {
                restore_vlan_tag(&mut frame, tpid, tci);
            }
            return Ok(Some(frame));
        }
    }

    pub fn ifindex(&self) -> i32 {
        self.ifindex
    }
}

/// Length of a received frame, or an error when it overran the buffer
fn received_len(len: usize, capacity: usize) -> Result<usize> {
    if len > capacity {
        return Err(Error::FrameTooLarge {
            len,
            max: capacity,
        });
    }
    Ok(len)
}

/// TPID and TCI of a tag the kernel stripped, if any.
///
/// # Safety
///
/// `msg` must describe a control buffer filled in by `recvmsg`.
unsafe fn vlan_from_auxdata(msg: &libc::msghdr) -> Option<(u16, u16)> {
    let mut cmsg = libc::CMSG_FIRSTHDR(msg);
    while !cmsg.is_null() {
        let hdr = &*cmsg;
        if hdr.cmsg_level == libc::SOL_PACKET && hdr.cmsg_type == PACKET_AUXDATA {
            let aux = std::ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const AuxData);
            if aux.tp_status & TP_STATUS_VLAN_VALID == 0 {
                return None;
            }
            let tpid = if aux.tp_status & TP_STATUS_VLAN_TPID_VALID != 0 {
                aux.tp_vlan_tpid
            } else {
                EtherType::Vlan as u16
            };
            return Some((tpid, aux.tp_vlan_tci));
        }
        cmsg = libc::CMSG_NXTHDR(msg, cmsg);
    }
    None
}

/// Put an 802.1Q tag back between the MAC addresses and the EtherType
fn restore_vlan_tag(frame: &mut PacketBuf, tpid: u16, tci: u16) {
    if frame.len() < 12 {
        return;
    }
    let mut tag = [0u8; 4];
    tag[..2].copy_from_slice(&tpid.to_be_bytes());
    tag[2..].copy_from_slice(&tci.to_be_bytes());
    frame.splice(12..12, tag);
}

impl Port for AfPacketPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn rx_burst(&self, out: &mut Vec<PacketBuf>, max: usize) -> Result<usize> {
        let mut received = 0;
        while received < max {
            match self.recv_one()? {
                Some(frame) => {
                    out.push(frame);
                    received += 1;
                }
                None => break,
            }
        }
        Ok(received)
    }

    fn tx_burst(&self, pkts: &mut Vec<PacketBuf>) -> Result<usize> {
        let mut sent = 0;
        for frame in pkts.iter() {
            let n = unsafe {
                libc::send(
                    self.fd,
                    frame.as_ptr() as *const libc::c_void,
                    frame.len(),
                    libc::MSG_DONTWAIT,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    // Queue full: leave the rest for the caller
                    Some(libc::EAGAIN) | Some(libc::ENOBUFS) => break,
                    _ => {
                        pkts.drain(..sent);
                        return Err(Error::Io(err));
                    }
                }
            }
            sent += 1;
        }

        pkts.drain(..sent);
        Ok(sent)
    }
}

impl AsRawFd for AfPacketPort {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for AfPacketPort {
    fn drop(&mut self) {
        if self.promiscuous {
            let _ = Self::set_promisc(self.fd, self.ifindex, false);
        }
        unsafe { libc::close(self.fd) };
    }
}
