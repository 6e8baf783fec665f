//! Outward seam to the master.

use std::fmt;

use crate::core::StatusUpdate;

/// Address of a master or agent endpoint, opaque to this crate.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({:?})", self.0)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport used to convey status updates to the master.
///
/// Sends are fire-and-forget: delivery reliability is the manager's
/// responsibility through retransmission, so implementations must not
/// block on delivery or surface transient failures.
pub trait MasterTransport {
    /// Send `update` to `master`, with `from` as the agent's reply-to
    /// address for the acknowledgement path.
    fn send(&self, master: &Endpoint, from: &Endpoint, update: &StatusUpdate);
}
