// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! `SocketAddr` <-> `sockaddr_storage` conversion for raw `connect(2)` calls.
//!
//! Mirrors the teacher's `sockaddr_to_std` helper in spirit (AF_INET /
//! AF_INET6 only), but in the opposite direction: we only ever need to turn
//! a `std::net::SocketAddr` into bytes the kernel understands.

use std::mem;
use std::net::{IpAddr, SocketAddr};

pub(crate) fn socketaddr_to_sockaddr(addr: SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    // SAFETY: a zeroed sockaddr_storage is a valid bit pattern (all-zero is
    // a legal, if meaningless, representation for every field below).
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };

    match addr.ip() {
        IpAddr::V4(ip) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: addr.port().to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(ip.octets()),
                },
                sin_zero: [0; 8],
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, sin);
            }
            (storage, mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
        }
        IpAddr::V6(ip) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: addr.port().to_be(),
                sin6_flowinfo: 0,
                sin6_addr: libc::in6_addr { s6_addr: ip.octets() },
                sin6_scope_id: 0,
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, sin6);
            }
            (storage, mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_round_trips_port_and_family() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let (storage, len) = socketaddr_to_sockaddr(addr);
        assert_eq!(len as usize, mem::size_of::<libc::sockaddr_in>());
        assert_eq!(storage.ss_family as i32, libc::AF_INET);
    }

    #[test]
    fn v6_round_trips_family() {
        let addr: SocketAddr = "[::1]:9090".parse().unwrap();
        let (storage, len) = socketaddr_to_sockaddr(addr);
        assert_eq!(len as usize, mem::size_of::<libc::sockaddr_in6>());
        assert_eq!(storage.ss_family as i32, libc::AF_INET6);
    }
}
