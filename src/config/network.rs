//! Network parameters (`network.*` and `network.sar.*`).
//!
//! Timing policy shared by the Network, Lower Transport and Access layers.

use serde::{Deserialize, Serialize};

use crate::cache::{DEFAULT_PDU_CACHE_SIZE, DEFAULT_PDU_CACHE_TTL_MS};

/// Lowest TTL usable for relayed messages.
const MIN_TTL: u8 = 2;
/// Highest TTL allowed.
const MAX_TTL: u8 = 127;
/// Lower bound of the acknowledged message timeout.
const MIN_ACK_TIMEOUT_MS: u64 = 30_000;
/// Lower bound of the acknowledged message retry interval.
const MIN_ACK_INTERVAL_MS: u64 = 2_000;

/// Network Transmit state (`network.network_transmit.*`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkTransmitConfig {
    /// Number of transmissions of each Network PDU, 1..=8 (`count`).
    #[serde(default = "NetworkTransmitConfig::default_count")]
    pub count: u8,
    /// Interval between transmissions (`interval_ms`).
    #[serde(default = "NetworkTransmitConfig::default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for NetworkTransmitConfig {
    fn default() -> Self {
        Self {
            count: 2,
            interval_ms: 20,
        }
    }
}

impl NetworkTransmitConfig {
    fn default_count() -> u8 { 2 }
    fn default_interval_ms() -> u64 { 20 }

    /// Transmission count clamped to the valid range.
    pub fn transmissions(&self) -> u8 {
        self.count.clamp(1, 8)
    }
}

/// Segmentation and reassembly parameters (`network.sar.*`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SarConfig {
    /// Interval between outgoing segments (`segment_interval_ms`).
    #[serde(default = "SarConfig::default_segment_interval_ms")]
    pub segment_interval_ms: u64,
    /// Retransmissions of unacked segments to a unicast destination.
    #[serde(default = "SarConfig::default_unicast_retrans_count")]
    pub unicast_retrans_count: u8,
    /// Retransmissions allowed without any newly acknowledged segment.
    #[serde(default = "SarConfig::default_unicast_retrans_without_progress_count")]
    pub unicast_retrans_without_progress_count: u8,
    /// Base unicast retransmission interval (`unicast_retrans_interval_ms`).
    #[serde(default = "SarConfig::default_unicast_retrans_interval_ms")]
    pub unicast_retrans_interval_ms: u64,
    /// Added per hop beyond the first (`unicast_retrans_interval_increment_ms`).
    #[serde(default = "SarConfig::default_unicast_retrans_interval_increment_ms")]
    pub unicast_retrans_interval_increment_ms: u64,
    /// Repetitions of all segments to a group or virtual destination.
    #[serde(default = "SarConfig::default_multicast_retrans_count")]
    pub multicast_retrans_count: u8,
    #[serde(default = "SarConfig::default_multicast_retrans_interval_ms")]
    pub multicast_retrans_interval_ms: u64,
    /// Incomplete reassembly is abandoned after this long without progress.
    #[serde(default = "SarConfig::default_discard_timeout_ms")]
    pub discard_timeout_ms: u64,
    /// Acknowledgment delay cap, in segments.
    #[serde(default = "SarConfig::default_acknowledgment_delay_increment")]
    pub acknowledgment_delay_increment: f64,
    #[serde(default = "SarConfig::default_segment_reception_interval_ms")]
    pub segment_reception_interval_ms: u64,
    /// Upper bound on concurrent incoming reassembly sessions.
    #[serde(default = "SarConfig::default_max_reassembly_sessions")]
    pub max_reassembly_sessions: usize,
    /// Minimum spacing of acks re-sent for already completed messages.
    #[serde(default = "SarConfig::default_complete_acknowledgment_interval_ms")]
    pub complete_acknowledgment_interval_ms: u64,
}

impl Default for SarConfig {
    fn default() -> Self {
        Self {
            segment_interval_ms: 60,
            unicast_retrans_count: 3,
            unicast_retrans_without_progress_count: 3,
            unicast_retrans_interval_ms: 200,
            unicast_retrans_interval_increment_ms: 50,
            multicast_retrans_count: 3,
            multicast_retrans_interval_ms: 250,
            discard_timeout_ms: 10_000,
            acknowledgment_delay_increment: 2.5,
            segment_reception_interval_ms: 60,
            max_reassembly_sessions: 64,
            complete_acknowledgment_interval_ms: 6_000,
        }
    }
}

impl SarConfig {
    fn default_segment_interval_ms() -> u64 { 60 }
    fn default_unicast_retrans_count() -> u8 { 3 }
    fn default_unicast_retrans_without_progress_count() -> u8 { 3 }
    fn default_unicast_retrans_interval_ms() -> u64 { 200 }
    fn default_unicast_retrans_interval_increment_ms() -> u64 { 50 }
    fn default_multicast_retrans_count() -> u8 { 3 }
    fn default_multicast_retrans_interval_ms() -> u64 { 250 }
    fn default_discard_timeout_ms() -> u64 { 10_000 }
    fn default_acknowledgment_delay_increment() -> f64 { 2.5 }
    fn default_segment_reception_interval_ms() -> u64 { 60 }
    fn default_max_reassembly_sessions() -> usize { 64 }
    fn default_complete_acknowledgment_interval_ms() -> u64 { 6_000 }

    /// Retransmission interval of unicast segments sent with `ttl`.
    pub fn unicast_retransmission_interval_ms(&self, ttl: u8) -> u64 {
        self.unicast_retrans_interval_ms
            + self.unicast_retrans_interval_increment_ms * u64::from(ttl.saturating_sub(1))
    }

    /// Delay before a Segment Acknowledgment is sent for a message of
    /// `seg_n + 1` segments.
    pub fn acknowledgment_delay_ms(&self, seg_n: u8) -> u64 {
        let segments = (f64::from(seg_n) + 0.5).min(self.acknowledgment_delay_increment);
        (segments * self.segment_reception_interval_ms as f64) as u64
    }
}

/// Network parameters (`network.*`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// TTL used when a message does not specify one (`default_ttl`).
    #[serde(default = "NetworkConfig::default_default_ttl")]
    pub default_ttl: u8,
    #[serde(default)]
    pub network_transmit: NetworkTransmitConfig,
    /// Acknowledged message timeout (`acknowledgment_message_timeout_ms`).
    #[serde(default = "NetworkConfig::default_acknowledgment_message_timeout_ms")]
    pub acknowledgment_message_timeout_ms: u64,
    /// Base acknowledged message retry interval (`acknowledgment_message_interval_ms`).
    #[serde(default = "NetworkConfig::default_acknowledgment_message_interval_ms")]
    pub acknowledgment_message_interval_ms: u64,
    /// Accept IV Recovery jumps larger than 42.
    #[serde(default)]
    pub allow_iv_index_recovery_over_42: bool,
    /// Skip the 96-hour dwell time in IV Update procedures.
    #[serde(default)]
    pub iv_update_test_mode: bool,
    /// Capacity of the incoming PDU dedup cache (`dedup_cache_size`).
    #[serde(default = "NetworkConfig::default_dedup_cache_size")]
    pub dedup_cache_size: usize,
    /// Lifetime of a dedup cache entry (`dedup_cache_ttl_ms`).
    #[serde(default = "NetworkConfig::default_dedup_cache_ttl_ms")]
    pub dedup_cache_ttl_ms: u64,
    #[serde(default)]
    pub sar: SarConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            default_ttl: 5,
            network_transmit: NetworkTransmitConfig::default(),
            acknowledgment_message_timeout_ms: 30_000,
            acknowledgment_message_interval_ms: 2_000,
            allow_iv_index_recovery_over_42: false,
            iv_update_test_mode: false,
            dedup_cache_size: DEFAULT_PDU_CACHE_SIZE,
            dedup_cache_ttl_ms: DEFAULT_PDU_CACHE_TTL_MS,
            sar: SarConfig::default(),
        }
    }
}

impl NetworkConfig {
    fn default_default_ttl() -> u8 { 5 }
    fn default_acknowledgment_message_timeout_ms() -> u64 { 30_000 }
    fn default_acknowledgment_message_interval_ms() -> u64 { 2_000 }
    fn default_dedup_cache_size() -> usize { DEFAULT_PDU_CACHE_SIZE }
    fn default_dedup_cache_ttl_ms() -> u64 { DEFAULT_PDU_CACHE_TTL_MS }

    /// Default TTL clamped to 2..=127.
    pub fn ttl(&self) -> u8 {
        self.default_ttl.clamp(MIN_TTL, MAX_TTL)
    }

    pub fn acknowledgment_timeout_ms(&self) -> u64 {
        self.acknowledgment_message_timeout_ms.max(MIN_ACK_TIMEOUT_MS)
    }

    /// Initial retry delay of an acknowledged message. Grows with the
    /// number of hops and segments the request and response travel.
    pub fn acknowledgment_retry_delay_ms(&self, ttl: u8, segments: usize) -> u64 {
        self.acknowledgment_message_interval_ms.max(MIN_ACK_INTERVAL_MS)
            + 50 * u64::from(ttl)
            + 50 * segments as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.ttl(), 5);
        assert_eq!(config.network_transmit.transmissions(), 2);
        assert_eq!(config.acknowledgment_timeout_ms(), 30_000);
        assert_eq!(config.sar.max_reassembly_sessions, 64);
    }

    #[test]
    fn test_clamping() {
        let config = NetworkConfig {
            default_ttl: 200,
            acknowledgment_message_timeout_ms: 1_000,
            network_transmit: NetworkTransmitConfig {
                count: 20,
                interval_ms: 10,
            },
            ..Default::default()
        };
        assert_eq!(config.ttl(), 127);
        assert_eq!(config.acknowledgment_timeout_ms(), 30_000);
        assert_eq!(config.network_transmit.transmissions(), 8);
    }

    #[test]
    fn test_retry_delay_grows_with_hops_and_segments() {
        let config = NetworkConfig::default();
        assert_eq!(config.acknowledgment_retry_delay_ms(5, 1), 2_000 + 250 + 50);
        assert!(config.acknowledgment_retry_delay_ms(10, 4) > config.acknowledgment_retry_delay_ms(5, 1));
    }

    #[test]
    fn test_sar_timers() {
        let sar = SarConfig::default();
        assert_eq!(sar.unicast_retransmission_interval_ms(1), 200);
        assert_eq!(sar.unicast_retransmission_interval_ms(5), 400);
        assert_eq!(sar.unicast_retransmission_interval_ms(0), 200);
        // One segment: 0.5 * 60
        assert_eq!(sar.acknowledgment_delay_ms(0), 30);
        // Capped at 2.5 segments
        assert_eq!(sar.acknowledgment_delay_ms(10), 150);
    }
}
