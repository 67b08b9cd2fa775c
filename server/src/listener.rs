//! Listening socket construction
//!
//! Candidates are tried in resolution order; for each one the socket is
//! created, marked reusable and non-blocking, bound and put into listening
//! mode. The first candidate that passes all four steps wins. A socket that
//! fails a step is dropped (and so closed) before the next candidate is tried.

use crate::error::{BindFailure, BindStage};
use log::{debug, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, ToSocketAddrs};

/// Addresses to try for `host:port`, in the order they should be attempted.
///
/// An absent or empty host means "any interface": IPv4 first, then IPv6.
pub fn candidate_addrs(host: Option<&str>, port: u16) -> Result<Vec<SocketAddr>, BindFailure> {
    match host.map(str::trim).filter(|h| !h.is_empty()) {
        None => Ok(vec![
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
        ]),
        Some(host) => {
            let addrs: Vec<SocketAddr> = (host, port)
                .to_socket_addrs()
                .map_err(|e| BindFailure::new(BindStage::Resolve, None, e))?
                .collect();

            if addrs.is_empty() {
                return Err(BindFailure::new(
                    BindStage::Resolve,
                    None,
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("{} resolved to no addresses", host),
                    ),
                ));
            }
            Ok(addrs)
        }
    }
}

/// Binds the first usable candidate for `host:port`.
///
/// The returned listener is already non-blocking so it can be handed to the
/// async runtime.
pub fn bind_listener(
    host: Option<&str>,
    port: u16,
    backlog: i32,
) -> Result<TcpListener, BindFailure> {
    let candidates = candidate_addrs(host, port)?;
    let mut last_failure = None;

    for addr in candidates {
        match bind_candidate(addr, backlog) {
            Ok(listener) => {
                let local = listener.local_addr().unwrap_or(addr);
                info!("Listening on {}", local);
                return Ok(listener);
            }
            Err(failure) => {
                debug!("Candidate {} failed: {}", addr, failure);
                last_failure = Some(failure);
            }
        }
    }

    let failure = last_failure.unwrap_or_else(|| {
        BindFailure::new(
            BindStage::Resolve,
            None,
            io::Error::new(io::ErrorKind::NotFound, "no candidate addresses"),
        )
    });
    warn!("Could not establish a listening socket: {}", failure);
    Err(failure)
}

fn bind_candidate(addr: SocketAddr, backlog: i32) -> Result<TcpListener, BindFailure> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(failed_at(addr, BindStage::Create))?;

    socket
        .set_reuse_address(true)
        .map_err(failed_at(addr, BindStage::SetOptions))?;
    socket
        .set_nonblocking(true)
        .map_err(failed_at(addr, BindStage::SetOptions))?;

    socket
        .bind(&addr.into())
        .map_err(failed_at(addr, BindStage::Bind))?;
    socket.listen(backlog).map_err(failed_at(addr, BindStage::Listen))?;

    Ok(socket.into())
}

fn failed_at(addr: SocketAddr, stage: BindStage) -> impl Fn(io::Error) -> BindFailure {
    move |e| BindFailure::new(stage, Some(addr), e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_candidates_prefer_ipv4() {
        let addrs = candidate_addrs(None, 3490).unwrap();
        assert_eq!(addrs.len(), 2);
        assert!(addrs[0].is_ipv4());
        assert!(addrs[0].ip().is_unspecified());
        assert!(addrs[1].is_ipv6());
        assert_eq!(addrs[1].port(), 3490);
    }

    #[test]
    fn test_empty_host_means_wildcard() {
        assert_eq!(
            candidate_addrs(Some("  "), 1).unwrap(),
            candidate_addrs(None, 1).unwrap()
        );
    }

    #[test]
    fn test_literal_host_resolves_to_itself() {
        let addrs = candidate_addrs(Some("127.0.0.1"), 4000).unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:4000".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_unresolvable_host_fails_at_resolve_stage() {
        let failure = candidate_addrs(Some("host.invalid"), 4000).unwrap_err();
        assert_eq!(failure.stage, BindStage::Resolve);
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let listener = bind_listener(Some("127.0.0.1"), 0, 4).unwrap();
        let local = listener.local_addr().unwrap();
        assert!(local.ip().is_loopback());
        assert_ne!(local.port(), 0);

        // Non-blocking: nothing pending, so accept must not hang.
        let err = listener.accept().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_port_in_use_reports_bind_stage() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let failure = bind_listener(Some("127.0.0.1"), port, 4).unwrap_err();
        assert_eq!(failure.stage, BindStage::Bind);
        assert_eq!(failure.address.map(|a| a.port()), Some(port));
    }
}
