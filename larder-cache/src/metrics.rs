// Copyright 2025 Cloudflare, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Store metrics

use larder_error::{Error, ErrorType, Result};
use prometheus::core::Collector;
use prometheus::{IntCounter, IntGauge, Registry};

/// The collectors of one store.
///
/// Collectors count from the moment the store is created, [Self::register()] only exposes
/// them to a registry.
pub struct StoreMetrics {
    stored_entries: IntGauge,
    captures_started: IntCounter,
    captures_completed: IntCounter,
    captures_abandoned: IntCounter,
    lookup_hits: IntCounter,
    lookup_misses: IntCounter,
    invalidations: IntCounter,
}

fn counter(name: &str, help: &str) -> IntCounter {
    // safe: names are static and valid
    IntCounter::new(name, help).unwrap()
}

impl StoreMetrics {
    pub fn new() -> Self {
        StoreMetrics {
            // safe: name is static and valid
            stored_entries: IntGauge::new(
                "larder_stored_entries",
                "Representations currently installed in the store",
            )
            .unwrap(),
            captures_started: counter("larder_captures_started_total", "Captures started"),
            captures_completed: counter(
                "larder_captures_completed_total",
                "Captures that installed an entry",
            ),
            captures_abandoned: counter(
                "larder_captures_abandoned_total",
                "Captures that ended without installing an entry",
            ),
            lookup_hits: counter("larder_lookup_hits_total", "Lookups that found an entry"),
            lookup_misses: counter("larder_lookup_misses_total", "Lookups that found nothing"),
            invalidations: counter("larder_invalidations_total", "Representations invalidated"),
        }
    }

    fn collectors(&self) -> [Box<dyn Collector>; 7] {
        [
            Box::new(self.stored_entries.clone()),
            Box::new(self.captures_started.clone()),
            Box::new(self.captures_completed.clone()),
            Box::new(self.captures_abandoned.clone()),
            Box::new(self.lookup_hits.clone()),
            Box::new(self.lookup_misses.clone()),
            Box::new(self.invalidations.clone()),
        ]
    }

    /// Expose the collectors to `registry`.
    ///
    /// Fails when the registry already has collectors of the same names, e.g. those of
    /// another store. Either all collectors are registered or none is.
    pub fn register(&self, registry: &Registry) -> Result<()> {
        for (i, collector) in self.collectors().into_iter().enumerate() {
            if let Err(e) = registry.register(collector) {
                for registered in self.collectors().into_iter().take(i) {
                    // cannot fail, it was registered above
                    let _ = registry.unregister(registered);
                }
                return Err(Error::because(
                    ErrorType::InternalError,
                    "failed to register store metrics",
                    e,
                ));
            }
        }
        Ok(())
    }

    /// Number of representations currently installed
    pub fn stored_entries(&self) -> u64 {
        self.stored_entries.get().max(0) as u64
    }

    pub fn captures_started(&self) -> u64 {
        self.captures_started.get()
    }

    pub fn captures_completed(&self) -> u64 {
        self.captures_completed.get()
    }

    pub fn captures_abandoned(&self) -> u64 {
        self.captures_abandoned.get()
    }

    pub fn lookup_hits(&self) -> u64 {
        self.lookup_hits.get()
    }

    pub fn lookup_misses(&self) -> u64 {
        self.lookup_misses.get()
    }

    pub fn invalidations(&self) -> u64 {
        self.invalidations.get()
    }

    pub(crate) fn entries_added(&self, n: usize) {
        self.stored_entries.add(n as i64);
    }

    pub(crate) fn entries_removed(&self, n: usize) {
        self.stored_entries.sub(n as i64);
    }

    pub(crate) fn capture_started(&self) {
        self.captures_started.inc();
    }

    pub(crate) fn capture_completed(&self) {
        self.captures_completed.inc();
    }

    pub(crate) fn capture_abandoned(&self) {
        self.captures_abandoned.inc();
    }

    pub(crate) fn lookup(&self, hit: bool) {
        if hit {
            self.lookup_hits.inc();
        } else {
            self.lookup_misses.inc();
        }
    }

    pub(crate) fn invalidated(&self) {
        self.invalidations.inc();
    }
}

impl Default for StoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}
