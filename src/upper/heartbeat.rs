//! Heartbeat messages, publication and subscription.
//!
//! Heartbeat is the control message 0x0A:
//!
//! ```text
//! [RFU:1|InitTTL:7][Features:16 BE]
//! ```
//!
//! Counts and periods travel as logarithms: a log value `n` in
//! `1..=0x10` stands for `2^(n-1)`.

use std::fmt;

use crate::lower::ControlMessage;
use crate::model::{Address, Features, KeyIndex};

/// Control opcode of Heartbeat messages.
pub const HEARTBEAT_OPCODE: u8 = 0x0A;

/// Publication count meaning "publish indefinitely".
const INFINITE_COUNT: u16 = 0xFFFF;

/// A received Heartbeat.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatMessage {
    pub source: Address,
    pub destination: Address,
    pub init_ttl: u8,
    pub received_ttl: u8,
    pub features: Features,
}

impl HeartbeatMessage {
    pub fn decode(message: &ControlMessage) -> Option<Self> {
        if message.opcode != HEARTBEAT_OPCODE || message.parameters.len() != 3 {
            return None;
        }
        let params = &message.parameters;
        Some(Self {
            source: message.source,
            destination: message.destination,
            init_ttl: params[0] & 0x7F,
            received_ttl: message.ttl,
            features: Features::from_bits(u16::from_be_bytes([params[1], params[2]])),
        })
    }

    /// Parameters of an outgoing Heartbeat.
    pub fn parameters(init_ttl: u8, features: Features) -> Vec<u8> {
        let bits = features.bits().to_be_bytes();
        vec![init_ttl & 0x7F, bits[0], bits[1]]
    }

    /// Number of hops the message travelled.
    pub fn hops(&self) -> u8 {
        self.init_ttl.saturating_sub(self.received_ttl).saturating_add(1)
    }
}

impl fmt::Debug for HeartbeatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heartbeat")
            .field("src", &self.source)
            .field("dst", &self.destination)
            .field("hops", &self.hops())
            .field("features", &self.features.bits())
            .finish()
    }
}

// ============================================================================
// Logarithmic encodings
// ============================================================================

/// Publication count for a count log. `None` for prohibited values.
pub fn count_log_to_count(count_log: u8) -> Option<u16> {
    match count_log {
        0x00 => Some(0),
        0x01..=0x10 => Some(1 << (count_log - 1)),
        0x11 => Some(0xFFFE),
        0xFF => Some(INFINITE_COUNT),
        _ => None,
    }
}

/// Smallest log `n` with `2^(n-1) >= count`.
pub fn publication_count_log(count: u16) -> u8 {
    match count {
        0 => 0x00,
        INFINITE_COUNT => 0xFF,
        _ => (16 - (count - 1).leading_zeros()) as u8 + 1,
    }
}

/// Log of a received heartbeat count: `floor(log2(count)) + 1`.
pub fn subscription_count_log(count: u16) -> u8 {
    match count {
        0 => 0x00,
        0xFFFF => 0xFF,
        _ => (16 - count.leading_zeros()) as u8,
    }
}

/// Period in seconds for a period log. `None` for prohibited values.
pub fn period_log_to_secs(period_log: u8) -> Option<u16> {
    match period_log {
        0x00 => Some(0),
        0x01..=0x10 => Some(1 << (period_log - 1)),
        0x11 => Some(0xFFFF),
        _ => None,
    }
}

/// Log of a remaining period in seconds.
pub fn secs_to_period_log(secs: u64) -> u8 {
    match secs {
        0 => 0x00,
        0xFFFF.. => 0x11,
        _ => (64 - secs.leading_zeros()) as u8,
    }
}

// ============================================================================
// Publication
// ============================================================================

/// A Heartbeat that is due to be sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatDue {
    pub destination: Address,
    pub ttl: u8,
    pub network_key: KeyIndex,
    pub features: Features,
}

/// Heartbeat Publication state of the local node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeartbeatPublication {
    pub destination: Address,
    pub period_log: u8,
    pub ttl: u8,
    pub network_key: KeyIndex,
    pub features: Features,
    remaining: u16,
    next_at_ms: Option<u64>,
}

impl HeartbeatPublication {
    /// Start publishing. Returns `None` for prohibited log values.
    pub fn new(
        destination: Address,
        count_log: u8,
        period_log: u8,
        ttl: u8,
        network_key: KeyIndex,
        features: Features,
        now_ms: u64,
    ) -> Option<Self> {
        let remaining = count_log_to_count(count_log)?;
        let period_secs = period_log_to_secs(period_log)?;
        if ttl > 0x7F {
            return None;
        }
        let periodic = !destination.is_unassigned() && remaining > 0 && period_secs > 0;
        Some(Self {
            destination,
            period_log,
            ttl,
            network_key,
            features,
            remaining,
            next_at_ms: periodic.then(|| now_ms + u64::from(period_secs) * 1_000),
        })
    }

    pub fn is_enabled(&self) -> bool {
        !self.destination.is_unassigned()
    }

    /// Current count log, decreasing as Heartbeats are sent.
    pub fn count_log(&self) -> u8 {
        publication_count_log(self.remaining)
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.next_at_ms
    }

    /// Return the Heartbeat to send when the period elapsed.
    pub fn poll(&mut self, now_ms: u64) -> Option<HeartbeatDue> {
        let at = self.next_at_ms?;
        if now_ms < at {
            return None;
        }
        if self.remaining != INFINITE_COUNT {
            self.remaining = self.remaining.saturating_sub(1);
        }
        let period_ms = u64::from(period_log_to_secs(self.period_log).unwrap_or(0)) * 1_000;
        self.next_at_ms = (self.remaining > 0 && period_ms > 0).then(|| now_ms + period_ms);
        Some(HeartbeatDue {
            destination: self.destination,
            ttl: self.ttl,
            network_key: self.network_key,
            features: self.features,
        })
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Heartbeat Subscription state of the local node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeartbeatSubscription {
    pub source: Address,
    pub destination: Address,
    started_ms: u64,
    period_ms: u64,
    count: u16,
    min_hops: u8,
    max_hops: u8,
}

impl HeartbeatSubscription {
    /// Start counting. Returns `None` for a prohibited period log.
    pub fn new(source: Address, destination: Address, period_log: u8, now_ms: u64) -> Option<Self> {
        let period_secs = period_log_to_secs(period_log)?;
        Some(Self {
            source,
            destination,
            started_ms: now_ms,
            period_ms: u64::from(period_secs) * 1_000,
            count: 0,
            min_hops: 0x7F,
            max_hops: 0,
        })
    }

    pub fn is_active(&self, now_ms: u64) -> bool {
        !self.source.is_unassigned()
            && !self.destination.is_unassigned()
            && now_ms < self.started_ms + self.period_ms
    }

    /// Count `heartbeat` if it matches. Returns true when counted.
    pub fn update(&mut self, heartbeat: &HeartbeatMessage, now_ms: u64) -> bool {
        if !self.is_active(now_ms)
            || heartbeat.source != self.source
            || heartbeat.destination != self.destination
        {
            return false;
        }
        self.count = self.count.saturating_add(1);
        self.min_hops = self.min_hops.min(heartbeat.hops());
        self.max_hops = self.max_hops.max(heartbeat.hops());
        true
    }

    pub fn count(&self) -> u16 {
        self.count
    }

    pub fn count_log(&self) -> u8 {
        subscription_count_log(self.count)
    }

    /// Log of the remaining subscription period.
    pub fn period_log(&self, now_ms: u64) -> u8 {
        let end = self.started_ms + self.period_ms;
        secs_to_period_log(end.saturating_sub(now_ms).div_ceil(1_000))
    }

    /// Minimum hops observed, 0 when nothing was received.
    pub fn min_hops(&self) -> u8 {
        if self.count == 0 { 0 } else { self.min_hops }
    }

    pub fn max_hops(&self) -> u8 {
        self.max_hops
    }
}
