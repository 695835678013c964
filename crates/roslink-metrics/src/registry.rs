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

use crate::events::{MonitorEvent, MonitorSink};
use crate::snapshot::{CommandStats, StatsSnapshot};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Instant;

/// Thread-safe statistics registry.
///
/// Counter increments use lock-free atomics on the hot path; the per-command
/// table takes a read-write lock only when a new command name first appears.
/// The registry doubles as a [`MonitorSink`], so it can be registered
/// directly with the framework components and derive all counters from the
/// event stream.
pub struct StatsRegistry {
    started_at: Instant,
    commands_total: AtomicU64,
    commands_failed: AtomicU64,
    total_latency_us: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    limiter_admitted: AtomicU64,
    limiter_rejected: AtomicU64,
    connections_created: AtomicU64,
    connections_destroyed: AtomicU64,
    circuit_transitions: AtomicU64,
    inputs_blocked: AtomicU64,
    per_command: RwLock<HashMap<String, CommandCounters>>,
}

#[derive(Default)]
struct CommandCounters {
    calls: AtomicU64,
    failures: AtomicU64,
    total_latency_us: AtomicU64,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            commands_total: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            limiter_admitted: AtomicU64::new(0),
            limiter_rejected: AtomicU64::new(0),
            connections_created: AtomicU64::new(0),
            connections_destroyed: AtomicU64::new(0),
            circuit_transitions: AtomicU64::new(0),
            inputs_blocked: AtomicU64::new(0),
            per_command: RwLock::new(HashMap::new()),
        }
    }

    fn record_command(&self, command: &str, latency_us: u64, success: bool) {
        self.commands_total.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        if !success {
            self.commands_failed.fetch_add(1, Ordering::Relaxed);
        }

        // Fast path: the command is already registered.
        {
            let table = self.per_command.read().unwrap_or_else(|e| e.into_inner());
            if let Some(counters) = table.get(command) {
                counters.calls.fetch_add(1, Ordering::Relaxed);
                counters
                    .total_latency_us
                    .fetch_add(latency_us, Ordering::Relaxed);
                if !success {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                }
                return;
            }
        }

        let mut table = self.per_command.write().unwrap_or_else(|e| e.into_inner());
        let counters = table.entry(command.to_string()).or_default();
        counters.calls.fetch_add(1, Ordering::Relaxed);
        counters
            .total_latency_us
            .fetch_add(latency_us, Ordering::Relaxed);
        if !success {
            counters.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Builds a serializable snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let total = self.commands_total.load(Ordering::Relaxed);
        let total_latency_us = self.total_latency_us.load(Ordering::Relaxed);

        let per_command = {
            let table = self.per_command.read().unwrap_or_else(|e| e.into_inner());
            table
                .iter()
                .map(|(name, c)| {
                    let calls = c.calls.load(Ordering::Relaxed);
                    (
                        name.clone(),
                        CommandStats {
                            calls,
                            failures: c.failures.load(Ordering::Relaxed),
                            avg_latency_us: if calls > 0 {
                                c.total_latency_us.load(Ordering::Relaxed) / calls
                            } else {
                                0
                            },
                        },
                    )
                })
                .collect()
        };

        StatsSnapshot {
            uptime_ms: self.started_at.elapsed().as_millis() as u64,
            commands_total: total,
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            avg_latency_us: if total > 0 { total_latency_us / total } else { 0 },
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            limiter_admitted: self.limiter_admitted.load(Ordering::Relaxed),
            limiter_rejected: self.limiter_rejected.load(Ordering::Relaxed),
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_destroyed: self.connections_destroyed.load(Ordering::Relaxed),
            circuit_transitions: self.circuit_transitions.load(Ordering::Relaxed),
            inputs_blocked: self.inputs_blocked.load(Ordering::Relaxed),
            per_command,
        }
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorSink for StatsRegistry {
    fn notify(&self, event: &MonitorEvent) {
        match event {
            MonitorEvent::CommandSucceeded {
                command, duration, ..
            } => self.record_command(command, duration.as_micros() as u64, true),
            MonitorEvent::CommandFailed {
                command, duration, ..
            } => self.record_command(command, duration.as_micros() as u64, false),
            MonitorEvent::CacheHit { .. } => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
            }
            MonitorEvent::CacheMiss { .. } => {
                self.cache_misses.fetch_add(1, Ordering::Relaxed);
            }
            MonitorEvent::LimiterAdmitted { .. } => {
                self.limiter_admitted.fetch_add(1, Ordering::Relaxed);
            }
            MonitorEvent::LimiterRejected { .. } => {
                self.limiter_rejected.fetch_add(1, Ordering::Relaxed);
            }
            MonitorEvent::ConnectionCreated { .. } => {
                self.connections_created.fetch_add(1, Ordering::Relaxed);
            }
            MonitorEvent::ConnectionDestroyed { .. } => {
                self.connections_destroyed.fetch_add(1, Ordering::Relaxed);
            }
            MonitorEvent::CircuitTransition { .. } => {
                self.circuit_transitions.fetch_add(1, Ordering::Relaxed);
            }
            MonitorEvent::ValidationBlocked { .. } => {
                self.inputs_blocked.fetch_add(1, Ordering::Relaxed);
            }
            MonitorEvent::AuditFlushed { .. } => {}
        }
    }
}
