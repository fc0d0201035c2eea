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

//! What the store keeps per cache key

use super::*;

use http::header::HOST;
use std::sync::atomic::{AtomicBool, Ordering};

/// The request a bag was created for. Informational, never used for matching.
pub(crate) struct RequestMeta {
    pub method: Method,
    pub host: Option<String>,
    pub path: String,
    pub query: Option<String>,
    pub uri: Uri,
}

impl RequestMeta {
    pub fn from_req(req: &ReqHeader) -> Self {
        let host = req
            .headers
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| req.uri.host())
            .map(str::to_owned);
        RequestMeta {
            method: req.method.clone(),
            host,
            path: req.uri.path().to_owned(),
            query: req.uri.query().map(str::to_owned),
            uri: req.uri.clone(),
        }
    }
}

/// One cached response
pub(crate) struct Representation {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub frames: FrameList,
    /// the request header values this response was negotiated for
    pub vary: Option<VaryCapture>,
    valid: AtomicBool,
}

impl Representation {
    pub fn new(
        status: StatusCode,
        headers: HeaderMap,
        frames: FrameList,
        vary: Option<VaryCapture>,
    ) -> Self {
        Representation {
            status,
            headers,
            frames,
            vary,
            valid: AtomicBool::new(true),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Mark invalid. Return whether this call did the transition.
    pub fn invalidate(&self) -> bool {
        self.valid.swap(false, Ordering::AcqRel)
    }

    fn matches(&self, req_headers: &HeaderMap) -> bool {
        self.vary
            .as_ref()
            .map_or(true, |captured| captured.matches(req_headers))
    }
}

type RepresentationList = Arc<Vec<Arc<Representation>>>;

/// The representations of a key whose responses vary on request headers
pub(crate) struct Negotiated {
    // copy on write: readers scan a snapshot, writers hold the shard write lock
    representations: RwLock<RepresentationList>,
}

impl Negotiated {
    pub fn new(first: Arc<Representation>) -> Self {
        Negotiated {
            representations: RwLock::new(Arc::new(vec![first])),
        }
    }

    pub fn snapshot(&self) -> RepresentationList {
        self.representations.read().clone()
    }

    /// The first representation negotiated for these request headers
    pub fn find(&self, req_headers: &HeaderMap) -> Option<Arc<Representation>> {
        self.snapshot()
            .iter()
            .find(|r| r.matches(req_headers))
            .cloned()
    }

    /// Append `repr`, replacing one captured for the same request header values.
    /// Return the replaced representation.
    pub fn push(&self, repr: Arc<Representation>) -> Option<Arc<Representation>> {
        let current = self.snapshot();
        let same = |r: &Arc<Representation>| match (&r.vary, &repr.vary) {
            (Some(a), Some(b)) => a.same_as(b),
            _ => false,
        };
        let replaced = current.iter().find(|r| same(r)).cloned();
        let mut next: Vec<_> = current.iter().filter(|r| !same(r)).cloned().collect();
        next.push(repr);
        *self.representations.write() = Arc::new(next);
        replaced
    }

    /// Remove `repr`. Return whether it was there.
    pub fn remove(&self, repr: &Arc<Representation>) -> bool {
        let current = self.snapshot();
        if !current.iter().any(|r| Arc::ptr_eq(r, repr)) {
            return false;
        }
        let next = current
            .iter()
            .filter(|r| !Arc::ptr_eq(r, repr))
            .cloned()
            .collect();
        *self.representations.write() = Arc::new(next);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.representations.read().is_empty()
    }
}

pub(crate) enum Variant {
    Simple(Arc<Representation>),
    Negotiated(Negotiated),
}

/// Everything the store keeps under one key
pub(crate) struct Bag {
    pub meta: RequestMeta,
    pub variant: Variant,
}

impl Bag {
    pub fn simple(meta: RequestMeta, repr: Arc<Representation>) -> Self {
        Bag {
            meta,
            variant: Variant::Simple(repr),
        }
    }

    pub fn negotiated(meta: RequestMeta, repr: Arc<Representation>) -> Self {
        Bag {
            meta,
            variant: Variant::Negotiated(Negotiated::new(repr)),
        }
    }

    /// The representation serving a request with these headers, valid or not
    pub fn lookup(&self, req_headers: &HeaderMap) -> Option<Arc<Representation>> {
        match &self.variant {
            Variant::Simple(repr) => Some(repr.clone()),
            Variant::Negotiated(set) => set.find(req_headers),
        }
    }

    pub fn representations(&self) -> Vec<Arc<Representation>> {
        match &self.variant {
            Variant::Simple(repr) => vec![repr.clone()],
            Variant::Negotiated(set) => set.snapshot().to_vec(),
        }
    }
}
