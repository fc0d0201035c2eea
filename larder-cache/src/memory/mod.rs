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

//! Hash map based in memory store
//!
//! The store maps each [CacheKey] to a bag holding either a single response, or, for
//! responses that vary on request headers, one response per set of negotiated header values.
//! Bags only change while the write lock of their shard is held, so concurrent captures of
//! the same key never lose each other's representations.

use super::*;

use crate::conf::StoreConf;
use crate::events::{Events, ResourceCachedEvent, StoreEvent};
use crate::frame::{FrameList, FrameWriter};
use crate::hashtable::ConcurrentHashTable;
use crate::key::{CacheKey, KeyProducer, StandardKeyProducer};
use crate::metrics::StoreMetrics;
use crate::variance::{vary_header_names, varies_on_wildcard, VaryCapture};

use bytes::Bytes;
use futures::Stream;
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, Method, StatusCode, Uri};
use log::debug;
use parking_lot::RwLock;
use std::time::SystemTime;

mod bag;
mod capture;
mod entry;

use bag::{Bag, RequestMeta, Representation, Variant};
use capture::{Capture, PendingEntry};
pub use capture::CaptureStream;
pub use entry::Entry;

const N_SHARDS: usize = 16;

pub(crate) struct StoreInner {
    bags: ConcurrentHashTable<Arc<Bag>, N_SHARDS>,
    key_producer: Box<dyn KeyProducer>,
    conf: StoreConf,
    events: Events,
    metrics: StoreMetrics,
}

impl StoreInner {
    fn lookup(self: &Arc<Self>, key: CacheKey, req: &ReqHeader) -> Option<Entry> {
        let bag = self.bags.get_cloned(&key)?;
        let repr = bag.lookup(&req.headers)?;
        if !repr.is_valid() {
            debug!("removing invalidated representation of {key}");
            self.invalidate(&key, &repr);
            return None;
        }
        Some(Entry::new(key, bag, repr, Arc::downgrade(self)))
    }

    fn complete(self: &Arc<Self>, pending: PendingEntry, frames: FrameList) {
        let uri = pending.meta.uri.clone();
        let size = frames.size();
        let entry = self.install(pending, frames);
        self.metrics.capture_completed();
        debug!("cached {uri} as {}, {size} bytes", entry.key());
        self.events
            .publish(&StoreEvent::ResourceCached(ResourceCachedEvent {
                time: SystemTime::now(),
                uri,
                entry,
            }));
    }

    fn install(self: &Arc<Self>, pending: PendingEntry, frames: FrameList) -> Entry {
        let PendingEntry {
            key,
            meta,
            status,
            headers,
            vary,
        } = pending;
        let negotiated = vary.is_some();
        let repr = Arc::new(Representation::new(status, headers, frames, vary));

        let mut retired = vec![];
        let bag = {
            let mut shard = self.bags.write(&key);
            let existing = shard
                .get(&key)
                .filter(|bag| negotiated && matches!(bag.variant, Variant::Negotiated(_)))
                .cloned();
            let bag = match existing {
                Some(bag) => {
                    if let Variant::Negotiated(set) = &bag.variant {
                        retired.extend(set.push(repr.clone()));
                    }
                    bag
                }
                None => {
                    let bag = if negotiated {
                        Arc::new(Bag::negotiated(meta, repr.clone()))
                    } else {
                        Arc::new(Bag::simple(meta, repr.clone()))
                    };
                    if let Some(old) = shard.insert(key, bag.clone()) {
                        retired.extend(old.representations());
                    }
                    bag
                }
            };
            self.metrics.entries_added(1);
            self.metrics.entries_removed(retired.len());
            bag
        };
        for old in retired {
            if old.invalidate() {
                self.metrics.invalidated();
            }
        }
        Entry::new(key, bag, repr, Arc::downgrade(self))
    }

    /// Invalidate `repr` and detach it from the bag at `key`. Idempotent.
    fn invalidate(&self, key: &CacheKey, repr: &Arc<Representation>) {
        if repr.invalidate() {
            self.metrics.invalidated();
            debug!("invalidated a representation of {key}");
        }
        let mut shard = self.bags.write(key);
        let Some(bag) = shard.get(key) else {
            return;
        };
        let (detached, now_empty) = match &bag.variant {
            Variant::Simple(r) => {
                let same = Arc::ptr_eq(r, repr);
                (same, same)
            }
            Variant::Negotiated(set) => {
                let removed = set.remove(repr);
                (removed, removed && set.is_empty())
            }
        };
        if now_empty {
            shard.remove(key);
        }
        if detached {
            self.metrics.entries_removed(1);
        }
    }
}

/// Hash map based in memory HTTP response store
///
/// Cloning is cheap, clones share the same store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    /// Create a store keyed by `key_producer`.
    pub fn new(key_producer: impl KeyProducer + 'static, conf: StoreConf) -> Result<Self> {
        let conf = conf.validate()?;
        Ok(MemoryStore {
            inner: Arc::new(StoreInner {
                bags: ConcurrentHashTable::new(),
                key_producer: Box::new(key_producer),
                conf,
                events: Events::new(),
                metrics: StoreMetrics::new(),
            }),
        })
    }

    pub fn conf(&self) -> &StoreConf {
        &self.inner.conf
    }

    pub fn events(&self) -> &Events {
        &self.inner.events
    }

    pub fn metrics(&self) -> &StoreMetrics {
        &self.inner.metrics
    }

    /// The key `req` is stored under
    pub fn cache_key(&self, req: &ReqHeader) -> CacheKey {
        crate::key::cache_key(self.inner.key_producer.as_ref(), req)
    }

    /// Number of keys with at least one representation
    pub fn len(&self) -> usize {
        self.inner.bags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wrap `body`, the body of the response `resp` to `req`, so that it is stored once fully
    /// read.
    ///
    /// This does not check whether the response is cacheable, see [crate::policy::CachePolicy].
    /// A response that varies on `*` can never be matched, its body is passed through.
    pub fn write<S, E>(&self, req: &ReqHeader, resp: &RespHeader, body: S) -> CaptureStream<S>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    {
        if varies_on_wildcard(&resp.headers) {
            debug!("{} varies on *, not capturing", req.uri);
            return CaptureStream::passthrough(body);
        }
        let key = self.cache_key(req);
        let conf = &self.inner.conf;
        let content_length = resp
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok());
        let writer = FrameWriter::new(
            conf.frame_size,
            conf.initial_buffer_hint(content_length),
            conf.max_frames,
            conf.max_capture_size,
        );
        let vary_names = vary_header_names(&resp.headers);
        let vary = (!vary_names.is_empty()).then(|| VaryCapture::capture(&vary_names, &req.headers));
        let pending = PendingEntry {
            key,
            meta: RequestMeta::from_req(req),
            status: resp.status,
            headers: resp.headers.clone(),
            vary,
        };
        self.inner.metrics.capture_started();
        debug!("capturing {} {} as {key}", req.method, req.uri);
        CaptureStream::new(body, Capture::new(self.inner.clone(), pending, writer))
    }

    /// Find the valid entry serving `req`
    pub fn find(&self, req: &ReqHeader) -> Option<Entry> {
        let entry = self.inner.lookup(self.cache_key(req), req);
        self.inner.metrics.lookup(entry.is_some());
        entry
    }

    /// All valid entries stored under `key`
    pub fn find_by_key(&self, key: &CacheKey) -> Vec<Entry> {
        let Some(bag) = self.inner.bags.get_cloned(key) else {
            return vec![];
        };
        bag.representations()
            .into_iter()
            .filter(|r| r.is_valid())
            .map(|r| Entry::new(*key, bag.clone(), r, Arc::downgrade(&self.inner)))
            .collect()
    }

    /// All valid entries stored under the key string `key`, see [CacheKey::to_key_string()].
    ///
    /// A malformed key finds nothing.
    pub fn find_by_key_str(&self, key: &str) -> Vec<Entry> {
        match CacheKey::parse(key) {
            Ok(key) => self.find_by_key(&key),
            Err(e) => {
                debug!("lookup by malformed key: {e}");
                vec![]
            }
        }
    }

    /// Invalidate `entry` and remove it from the store. Idempotent.
    pub fn invalidate(&self, entry: &Entry) {
        entry.invalidate()
    }
}

impl Default for MemoryStore {
    /// A store keyed by method, path, query and host, with the default [StoreConf]
    fn default() -> Self {
        MemoryStore {
            inner: Arc::new(StoreInner {
                bags: ConcurrentHashTable::new(),
                key_producer: Box::new(StandardKeyProducer::new().include_host()),
                conf: StoreConf::default(),
                events: Events::new(),
                metrics: StoreMetrics::new(),
            }),
        }
    }
}
