//! Observability for Signal Relay.
//!
//! Logging uses `tracing` with `relay.*` targets and `#[instrument(skip_all)]`
//! plus explicit field allow-listing. SDP and ICE contents are never logged.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `relay_connections_active` | Gauge | none | Open client connections |
//! | `relay_rooms_active` | Gauge | none | Rooms in the local registry |
//! | `relay_messages_routed_total` | Counter | `outcome` | Routing decisions |
//! | `relay_messages_dropped_total` | Counter | `reason` | Messages lost |
//! | `relay_bus_published_total` | Counter | `kind` | Envelopes published |
//! | `relay_bus_publish_duration_seconds` | Histogram | none | Publish round trip |
//! | `relay_bus_received_total` | Counter | `kind` | Envelopes received |
//! | `relay_bus_errors_total` | Counter | `operation` | Bus failures |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
