use std::{fmt, net::SocketAddr};

/// Identifies one client connection in log output. Passed down explicitly to
/// everything the connection's task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionContext {
    pub id: u64,
    pub peer: Option<SocketAddr>,
}

impl ConnectionContext {
    #[must_use]
    pub const fn new(id: u64, peer: Option<SocketAddr>) -> Self {
        Self { id, peer }
    }
}

impl fmt::Display for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.peer {
            Some(peer) => write!(f, "[conn {} {peer}]", self.id),
            None => write!(f, "[conn {}]", self.id),
        }
    }
}
