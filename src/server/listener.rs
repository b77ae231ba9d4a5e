//! Binding a [`TcpListener`] with an explicit listen backlog.
//!
//! `tokio::net::TcpListener::bind` always asks the OS for a fixed backlog
//! (1024 on most platforms). [`bind_with_backlog`] goes through [`socket2`]
//! instead so the backlog in [`ServerLimits::listen_backlog`] is actually honored,
//! which matters for the 503-on-overflow behavior described in [`ServerLimits`].

use crate::limits::ServerLimits;
use socket2::{Domain, Socket, Type};
use std::{io, net::SocketAddr};
use tokio::net::TcpListener;

/// Binds and listens on `addr`, using [`ServerLimits::listen_backlog`] as the
/// OS-level accept queue size.
///
/// # Examples
/// ```no_run
/// # #[tokio::main]
/// # async fn main() -> std::io::Result<()> {
/// use pinion::{limits::ServerLimits, bind_with_backlog};
///
/// let listener = bind_with_backlog("127.0.0.1:8080".parse().unwrap(), &ServerLimits::default())?;
/// # let _ = listener;
/// # Ok(())
/// # }
/// ```
pub fn bind_with_backlog(addr: SocketAddr, limits: &ServerLimits) -> io::Result<TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };

    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(limits.listen_backlog)?;

    TcpListener::from_std(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_ephemeral_port() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let listener =
                bind_with_backlog("127.0.0.1:0".parse().unwrap(), &ServerLimits::default())
                    .unwrap();
            assert!(listener.local_addr().unwrap().port() > 0);
        });
    }
}
