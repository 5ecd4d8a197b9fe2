//! Metrics endpoint client for flexcheck.
//!
//! Nodes expose `GET /metrics` returning a JSON array of entities, each with
//! a list of named counters and gauges:
//!
//! ```text
//! [
//!   {
//!     "type": "server",
//!     "id": "yb.cqlserver",
//!     "attributes": {},
//!     "metrics": [
//!       { "name": "handler_latency_yb_cqlserver_SQLProcessor_ExecuteRequest", "total_count": 1234 }
//!     ]
//!   },
//!   {
//!     "type": "cluster",
//!     "id": "yb.cluster",
//!     "metrics": [ { "name": "num_tablet_servers_live", "value": 6 } ]
//!   }
//! ]
//! ```
//!
//! Every call is a single best-effort read. Retrying is left to the
//! convergence waiter so that staleness never leaks into a poll.

pub mod document;
pub mod reader;

pub use document::{find_counter, EntityKind, MetricEntry, MetricsDocument, MetricsEntity};
pub use reader::{HttpMetricsReader, MetricsFetcher};
