// SPDX-License-Identifier: Apache-2.0

//! Client selection policies.
//!
//! The dispatcher owns nothing but its cursor; the registry order is the
//! tie-break everywhere. Clients are considered in insertion order, the
//! round-robin cursor advances past each successful pick, and the sticky
//! cursor stays pinned until its client disconnects or is saturated while
//! events wait.

use crate::clients::{Client, ClientRegistry};

/// How the next `(event, client)` pairing is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPolicy {
    /// Rotate over clients, picking the first with free capacity after the
    /// cursor.
    RoundRobin,
    /// Prefer one client until it saturates; only then fall through to the
    /// next client in insertion order, and only for events that would
    /// otherwise wait.
    DispatchToSingle,
}

/// Picks dispatch targets according to the configured policy.
#[derive(Debug)]
pub struct Dispatcher {
    policy: DispatchPolicy,
    cursor: usize,
}

impl Dispatcher {
    /// Creates a dispatcher for the given policy with its cursor at the first
    /// client.
    #[must_use]
    pub fn new(policy: DispatchPolicy) -> Self {
        Self { policy, cursor: 0 }
    }

    /// The configured policy.
    #[must_use]
    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// Selects the index of the next client to dispatch to, or `None` when no
    /// client has free capacity.
    pub fn select(&mut self, clients: &ClientRegistry) -> Option<usize> {
        let count = clients.count();
        if count == 0 {
            return None;
        }
        if self.cursor >= count {
            self.cursor = 0;
        }
        match self.policy {
            DispatchPolicy::RoundRobin => {
                for offset in 0..count {
                    let index = (self.cursor + offset) % count;
                    if clients.get(index).is_some_and(Client::has_capacity) {
                        self.cursor = (index + 1) % count;
                        return Some(index);
                    }
                }
                None
            }
            DispatchPolicy::DispatchToSingle => {
                if clients.get(self.cursor).is_some_and(Client::has_capacity) {
                    return Some(self.cursor);
                }
                // Sticky client saturated: fall through in insertion order
                // without moving the pin.
                (0..count).find(|&index| {
                    index != self.cursor && clients.get(index).is_some_and(Client::has_capacity)
                })
            }
        }
    }

    /// Adjusts the cursor after the client at `index` was removed.
    pub fn on_client_removed(&mut self, index: usize, remaining: usize) {
        if remaining == 0 {
            self.cursor = 0;
            return;
        }
        if index < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= remaining {
            self.cursor = 0;
        }
    }
}
