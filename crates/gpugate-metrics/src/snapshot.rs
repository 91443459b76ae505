// Copyright 2025 gpugate Authors
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
use std::collections::BTreeMap;

/// Router build and uptime information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub uptime_ms: u64,
}

impl ServerInfo {
    pub fn new(uptime_ms: u64) -> Self {
        Self {
            name: "gpugate".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_ms,
        }
    }
}

/// Average and percentile latencies, in microseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub avg_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
}

/// Dispatch and probe counters for one backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendMetrics {
    pub dispatch_count: u64,
    pub dispatch_successes: u64,
    pub dispatch_failures: u64,
    pub admission_denied: u64,
    pub probe_successes: u64,
    pub probe_failures: u64,
    pub dispatch_latency: LatencySummary,
    pub probe_latency: LatencySummary,
}

/// Complete metrics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub succeeded_requests: u64,
    /// Requests that failed on every attempted backend
    pub exhausted_requests: u64,
    /// Requests rejected before any attempt because nothing was selectable
    pub unavailable_requests: u64,
    /// Attempts beyond the first, across all requests
    pub retries: u64,
    pub admission_denied: u64,
    pub uptime_ms: u64,
    pub request_latency: LatencySummary,
    pub backends: BTreeMap<String, BackendMetrics>,
}

impl MetricsSnapshot {
    /// Requests that have entered the router but not reached a terminal outcome.
    pub fn in_progress(&self) -> u64 {
        self.total_requests.saturating_sub(
            self.succeeded_requests + self.exhausted_requests + self.unavailable_requests,
        )
    }
}
