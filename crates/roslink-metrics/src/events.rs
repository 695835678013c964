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

use roslink_common::Priority;
use std::sync::Mutex;
use std::time::Duration;

/// Structured event emitted by a framework component.
///
/// Components hold a registered [`MonitorSink`] and call `notify` on it;
/// there is no global event bus. The core only emits these, it does not
/// persist them.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    ConnectionCreated {
        connection_id: u64,
    },
    ConnectionDestroyed {
        connection_id: u64,
        reason: String,
    },
    CircuitTransition {
        from: String,
        to: String,
        reason: String,
    },
    LimiterAdmitted {
        priority: Priority,
        waited: Duration,
    },
    LimiterRejected {
        priority: Priority,
    },
    CacheHit {
        key: String,
    },
    CacheMiss {
        key: String,
    },
    CommandSucceeded {
        command: String,
        priority: Priority,
        duration: Duration,
    },
    CommandFailed {
        command: String,
        priority: Priority,
        duration: Duration,
        error_kind: String,
    },
    ValidationBlocked {
        field: String,
    },
    AuditFlushed {
        events: usize,
    },
}

/// Observer interface for monitoring events.
///
/// Implementations must be cheap and non-blocking; they are called on the
/// request hot path.
pub trait MonitorSink: Send + Sync {
    fn notify(&self, event: &MonitorEvent);
}

/// Sink that logs every event through `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl MonitorSink for TracingSink {
    fn notify(&self, event: &MonitorEvent) {
        match event {
            MonitorEvent::CircuitTransition { from, to, reason } => {
                tracing::warn!(%from, %to, %reason, "circuit transition");
            }
            MonitorEvent::CommandFailed {
                command,
                error_kind,
                duration,
                ..
            } => {
                tracing::warn!(%command, %error_kind, ?duration, "command failed");
            }
            MonitorEvent::LimiterRejected { priority } => {
                tracing::warn!(?priority, "rate limiter rejected request");
            }
            MonitorEvent::ValidationBlocked { field } => {
                tracing::warn!(%field, "input blocked by security filter");
            }
            other => {
                tracing::debug!(event = ?other, "monitor event");
            }
        }
    }
}

/// Sink that forwards every event to several sinks in order.
pub struct FanoutSink {
    sinks: Vec<std::sync::Arc<dyn MonitorSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<std::sync::Arc<dyn MonitorSink>>) -> Self {
        Self { sinks }
    }
}

impl MonitorSink for FanoutSink {
    fn notify(&self, event: &MonitorEvent) {
        for sink in &self.sinks {
            sink.notify(event);
        }
    }
}

/// Sink that drops every event.
#[derive(Debug, Default)]
pub struct NullSink;

impl MonitorSink for NullSink {
    fn notify(&self, _event: &MonitorEvent) {}
}

/// Sink that records events for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<MonitorEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MonitorEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Number of recorded events matching the predicate.
    pub fn count_matching(&self, pred: impl Fn(&MonitorEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }
}

impl MonitorSink for RecordingSink {
    fn notify(&self, event: &MonitorEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
