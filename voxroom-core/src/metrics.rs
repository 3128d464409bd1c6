//! Prometheus metrics
//!
//! Everything registers into [`REGISTRY`], which the `/metrics` endpoint
//! encodes. Relay counters live in the SFU crate and are mirrored here on
//! scrape via [`observe_relay`].

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, Histogram,
    IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use parking_lot::Mutex;
use std::sync::LazyLock;
use voxroom_sfu::RelayStatsSnapshot;

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Open signaling connections
pub static ACTIVE_CONNECTIONS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge_with_registry!(
        "voxroom_active_connections",
        "Current number of open signaling connections",
        REGISTRY.clone()
    )
    .expect("Failed to register ACTIVE_CONNECTIONS")
});

/// Rooms present in the registry
pub static ACTIVE_ROOMS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge_with_registry!(
        "voxroom_active_rooms",
        "Current number of registered rooms",
        REGISTRY.clone()
    )
    .expect("Failed to register ACTIVE_ROOMS")
});

/// Signaling sessions
pub mod signaling {
    use super::{
        register_histogram_with_registry, register_int_counter_vec_with_registry, Histogram,
        IntCounterVec, LazyLock, REGISTRY,
    };

    /// Inbound messages by kind
    pub static MESSAGES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "voxroom_signaling_messages_total",
            "Signaling messages received, by kind",
            &["kind"],
            REGISTRY.clone()
        )
        .expect("Failed to register MESSAGES_TOTAL")
    });

    /// Error responses by error kind
    pub static ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "voxroom_signaling_errors_total",
            "Signaling error responses, by error kind",
            &["kind"],
            REGISTRY.clone()
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    /// Joined session lifetime
    pub static SESSION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
        register_histogram_with_registry!(
            "voxroom_session_duration_seconds",
            "Lifetime of joined signaling sessions in seconds",
            vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0],
            REGISTRY.clone()
        )
        .expect("Failed to register SESSION_DURATION")
    });
}

/// Relay engine mirrors
pub mod relay {
    use super::{
        register_int_counter_with_registry, register_int_gauge_with_registry, IntCounter,
        IntGauge, LazyLock, REGISTRY,
    };

    pub static ACTIVE_PATHS: LazyLock<IntGauge> = LazyLock::new(|| {
        register_int_gauge_with_registry!(
            "voxroom_relay_active_paths",
            "Forwarding paths currently running",
            REGISTRY.clone()
        )
        .expect("Failed to register ACTIVE_PATHS")
    });

    pub static ACTIVE_PUBLICATIONS: LazyLock<IntGauge> = LazyLock::new(|| {
        register_int_gauge_with_registry!(
            "voxroom_relay_active_publications",
            "Inbound audio tracks currently being read",
            REGISTRY.clone()
        )
        .expect("Failed to register ACTIVE_PUBLICATIONS")
    });

    pub static PACKETS_FORWARDED: LazyLock<IntCounter> = LazyLock::new(|| {
        register_int_counter_with_registry!(
            "voxroom_relay_packets_forwarded_total",
            "RTP packets written to listener tracks",
            REGISTRY.clone()
        )
        .expect("Failed to register PACKETS_FORWARDED")
    });

    pub static BYTES_FORWARDED: LazyLock<IntCounter> = LazyLock::new(|| {
        register_int_counter_with_registry!(
            "voxroom_relay_bytes_forwarded_total",
            "RTP payload bytes written to listener tracks",
            REGISTRY.clone()
        )
        .expect("Failed to register BYTES_FORWARDED")
    });

    pub static PACKETS_DROPPED: LazyLock<IntCounter> = LazyLock::new(|| {
        register_int_counter_with_registry!(
            "voxroom_relay_packets_dropped_total",
            "RTP packets skipped by lagging listeners",
            REGISTRY.clone()
        )
        .expect("Failed to register PACKETS_DROPPED")
    });

    pub static PACKETS_MUTED: LazyLock<IntCounter> = LazyLock::new(|| {
        register_int_counter_with_registry!(
            "voxroom_relay_packets_muted_total",
            "RTP packets held back from listeners that muted the publisher",
            REGISTRY.clone()
        )
        .expect("Failed to register PACKETS_MUTED")
    });
}

/// Helper macro to count an inbound signaling message
#[macro_export]
macro_rules! record_signaling_message {
    ($kind:expr) => {
        $crate::metrics::signaling::MESSAGES_TOTAL
            .with_label_values(&[$kind])
            .inc();
    };
}

/// Helper macro to count an error response
#[macro_export]
macro_rules! record_signaling_error {
    ($error:expr) => {
        $crate::metrics::signaling::ERRORS_TOTAL
            .with_label_values(&[$error.kind()])
            .inc();
    };
}

/// Serializes mirror updates so concurrent scrapes never add the same delta twice
static OBSERVE_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Copy a relay statistics snapshot into the Prometheus mirrors
pub fn observe_relay(stats: &RelayStatsSnapshot) {
    let _guard = OBSERVE_LOCK.lock();
    relay::ACTIVE_PATHS.set(i64::try_from(stats.active_paths).unwrap_or(i64::MAX));
    relay::ACTIVE_PUBLICATIONS.set(i64::try_from(stats.active_publications).unwrap_or(i64::MAX));
    advance(&relay::PACKETS_FORWARDED, stats.packets_forwarded);
    advance(&relay::BYTES_FORWARDED, stats.bytes_forwarded);
    advance(&relay::PACKETS_DROPPED, stats.packets_dropped);
    advance(&relay::PACKETS_MUTED, stats.packets_muted);
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

/// Expose metrics in Prometheus format
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|_| prometheus::Error::Msg("Invalid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        record_signaling_message!("join");
        ACTIVE_CONNECTIONS.inc();
        ACTIVE_CONNECTIONS.dec();

        let output = gather_metrics().unwrap();
        assert!(output.contains("voxroom_signaling_messages_total"));
        assert!(output.contains("voxroom_active_connections"));
    }

    #[test]
    fn test_observe_relay_only_moves_counters_forward() {
        let mut stats = RelayStatsSnapshot {
            packets_dropped: 5,
            ..Default::default()
        };
        observe_relay(&stats);
        let after_first = relay::PACKETS_DROPPED.get();
        assert!(after_first >= 5);

        stats.packets_dropped = 3;
        observe_relay(&stats);
        assert_eq!(relay::PACKETS_DROPPED.get(), after_first);
    }

    #[test]
    fn test_concurrent_observers_count_once() {
        let stats = RelayStatsSnapshot {
            packets_muted: relay::PACKETS_MUTED.get() + 1000,
            ..Default::default()
        };

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        observe_relay(&stats);
                    }
                });
            }
        });

        assert_eq!(relay::PACKETS_MUTED.get(), stats.packets_muted);
    }
}
