//! Observability: Prometheus metrics, health endpoints and log setup.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `chat_sessions_active` | Gauge | none | Registered sessions on this instance |
//! | `chat_fanout_deliveries_total` | Counter | none | Payloads enqueued to sessions |
//! | `chat_fanout_duration_seconds` | Histogram | none | Time spent in one fan-out pass |
//! | `chat_slow_consumer_evictions_total` | Counter | none | Sessions dropped during fan-out |
//! | `chat_presence_notices_dropped_total` | Counter | none | Join/leave notices dropped on a full notice queue |
//! | `chat_bus_publish_total` | Counter | `result` | Publish attempts |
//! | `chat_bus_messages_received_total` | Counter | none | Messages relayed from the bus |
//! | `chat_protocol_errors_total` | Counter | `reason` | Skipped client frames |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "chat_service=debug,tower_http=debug";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter. `CHAT_LOG_FORMAT=json` switches
/// to JSON lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let json = std::env::var("CHAT_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
