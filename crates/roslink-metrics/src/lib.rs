// Copyright 2025 Roslink Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Roslink Monitoring and Statistics
//!
//! Structured monitoring events and a thread-safe statistics registry for
//! the roslink framework. Components emit [`MonitorEvent`]s through an
//! explicitly registered [`MonitorSink`] (observer interface; there is no
//! global event bus), and [`StatsRegistry`] derives all counters from that
//! event stream.
//!
//! # Usage Example
//!
//! ```rust
//! use roslink_metrics::{MonitorEvent, MonitorSink, StatsRegistry};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(StatsRegistry::new());
//!
//! // Components call notify() on the registered sink.
//! registry.notify(&MonitorEvent::CacheHit { key: "k".to_string() });
//!
//! let snapshot = registry.snapshot();
//! assert_eq!(snapshot.cache_hits, 1);
//! ```
//!
//! # Thread Safety
//!
//! All sinks are `Send + Sync` and shared via `Arc`. The registry uses
//! lock-free atomics for counter increments on the hot path.

mod events;
mod registry;
mod snapshot;

pub use events::{FanoutSink, MonitorEvent, MonitorSink, NullSink, RecordingSink, TracingSink};
pub use registry::StatsRegistry;
pub use snapshot::{CommandStats, StatsSnapshot};
