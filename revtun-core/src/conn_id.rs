//! Per-agent connection id allocation

use revtun_common::{Result, TunnelError};
use revtun_protocol::ConnectionId;
use std::sync::{Arc, Mutex, PoisonError};

/// Monotonic id source shared by every tunnel of one agent.
///
/// Clones share the same counter. Ids are never reused within one agent
/// session; running out of the 64-bit space is reported rather than wrapping.
#[derive(Debug, Clone, Default)]
pub struct ConnIdAllocator {
    next: Arc<Mutex<u64>>,
}

impl ConnIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> Result<ConnectionId> {
        let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
        let id = *next;
        *next = id.checked_add(1).ok_or(TunnelError::IdExhausted)?;
        Ok(ConnectionId(id))
    }

    #[cfg(test)]
    fn starting_at(first: u64) -> Self {
        Self {
            next: Arc::new(Mutex::new(first)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_across_clones() {
        let ids = ConnIdAllocator::new();
        let other = ids.clone();
        assert_eq!(ids.next_id().unwrap(), ConnectionId(0));
        assert_eq!(other.next_id().unwrap(), ConnectionId(1));
        assert_eq!(ids.next_id().unwrap(), ConnectionId(2));
    }

    #[test]
    fn test_exhaustion_reported() {
        let ids = ConnIdAllocator::starting_at(u64::MAX - 1);
        assert_eq!(ids.next_id().unwrap(), ConnectionId(u64::MAX - 1));
        assert!(matches!(ids.next_id(), Err(TunnelError::IdExhausted)));
        assert!(matches!(ids.next_id(), Err(TunnelError::IdExhausted)));
    }

    #[test]
    fn test_independent_allocators() {
        let a = ConnIdAllocator::new();
        let b = ConnIdAllocator::new();
        assert_eq!(a.next_id().unwrap(), ConnectionId(0));
        assert_eq!(b.next_id().unwrap(), ConnectionId(0));
    }
}
