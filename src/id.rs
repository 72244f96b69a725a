//! Opaque identifiers for newly created rows.
//!
//! An identifier is `<PREFIX>-<tick>-<node>`: `tick` is a nanosecond
//! timestamp forced to be strictly increasing per [`Generator`], so callers
//! sharing a generator never collide even when the clock does not advance
//! between calls, and `node` is a random tag distinguishing generators in
//! different processes. Line items append `-ITEM-<n>` to their ticket's id.

use std::sync::atomic::{AtomicU64, Ordering};

use derive_more::derive::Display;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Kind {
    #[display("CUST")]
    Customer,

    #[display("DEV")]
    Device,

    #[display("TICKET")]
    Ticket,
}

#[derive(Debug)]
pub struct Generator {
    last_tick: AtomicU64,
    node: u16,
}

impl Generator {
    pub fn new() -> Self {
        Self {
            last_tick: AtomicU64::new(0),
            node: Uuid::new_v4().as_u128() as u16,
        }
    }

    pub fn next(&self, kind: Kind) -> String {
        format!("{kind}-{}-{:04x}", self.tick(), self.node)
    }

    fn tick(&self) -> u64 {
        let now = u64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos())
            .unwrap_or_default();
        let prev = self
            .last_tick
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(prev + 1)
    }
}

impl Default for Generator {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifier of the `position`-th (1-based) line item of a ticket.
pub fn line_item(ticket: &str, position: usize) -> String {
    format!("{ticket}-ITEM-{position}")
}
