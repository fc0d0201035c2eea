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

use super::*;

use crate::frame::{FrameReader, FrameStream};
use std::fmt;
use std::sync::Weak;

/// A cached response as returned by the store
///
/// Entries are cheap to clone. An entry stays readable after it is invalidated, it is only no
/// longer returned by lookups.
#[derive(Clone)]
pub struct Entry {
    key: CacheKey,
    bag: Arc<Bag>,
    repr: Arc<Representation>,
    store: Weak<StoreInner>,
}

impl Entry {
    pub(crate) fn new(
        key: CacheKey,
        bag: Arc<Bag>,
        repr: Arc<Representation>,
        store: Weak<StoreInner>,
    ) -> Self {
        Entry {
            key,
            bag,
            repr,
            store,
        }
    }

    #[cfg(test)]
    pub(super) fn repr(&self) -> &Arc<Representation> {
        &self.repr
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Method of the request that created this key
    pub fn method(&self) -> &Method {
        &self.bag.meta.method
    }

    pub fn host(&self) -> Option<&str> {
        self.bag.meta.host.as_deref()
    }

    pub fn path(&self) -> &str {
        &self.bag.meta.path
    }

    pub fn query(&self) -> Option<&str> {
        self.bag.meta.query.as_deref()
    }

    /// The request headers this response was negotiated for. Empty unless the response
    /// varies on request headers.
    pub fn request_headers(&self) -> HeaderMap {
        self.repr
            .vary
            .as_ref()
            .map(|v| v.to_header_map())
            .unwrap_or_default()
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.repr.headers
    }

    pub fn status(&self) -> StatusCode {
        self.repr.status
    }

    /// Rebuild the response head
    pub fn response_header(&self) -> RespHeader {
        let (mut parts, _) = http::Response::new(()).into_parts();
        parts.status = self.repr.status;
        parts.headers = self.repr.headers.clone();
        parts
    }

    /// A new blocking reader over the body
    pub fn open_stream(&self) -> FrameReader {
        self.repr.frames.reader()
    }

    /// A new async stream over the body
    pub fn body(&self) -> FrameStream {
        self.repr.frames.stream()
    }

    /// Body size in bytes
    pub fn size(&self) -> u64 {
        self.repr.frames.size()
    }

    pub fn is_valid(&self) -> bool {
        self.repr.is_valid()
    }

    /// Invalidate and remove this entry from the store. Calling it again does nothing.
    pub fn invalidate(&self) {
        match self.store.upgrade() {
            Some(store) => store.invalidate(&self.key, &self.repr),
            None => {
                // the store is gone, only the flag is left to flip
                self.repr.invalidate();
            }
        }
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("method", self.method())
            .field("path", &self.path())
            .field("status", &self.status())
            .field("size", &self.size())
            .field("valid", &self.is_valid())
            .finish()
    }
}
