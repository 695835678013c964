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

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Statistics for a single command token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandStats {
    pub calls: u64,
    pub failures: u64,
    pub avg_latency_us: u64,
}

/// Serializable snapshot of framework statistics.
///
/// Returned by the facade's `statistics()` and consumed by external
/// dashboards; the framework itself never persists it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub uptime_ms: u64,
    pub commands_total: u64,
    pub commands_failed: u64,
    pub avg_latency_us: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub limiter_admitted: u64,
    pub limiter_rejected: u64,
    pub connections_created: u64,
    pub connections_destroyed: u64,
    pub circuit_transitions: u64,
    pub inputs_blocked: u64,
    pub per_command: HashMap<String, CommandStats>,
}

impl StatsSnapshot {
    /// Cache hit rate in `[0, 1]`, or `None` before any lookup happened.
    pub fn cache_hit_rate(&self) -> Option<f64> {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            None
        } else {
            Some(self.cache_hits as f64 / lookups as f64)
        }
    }
}
