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

//! Gate a store behind a cacheability rule

use super::*;
use crate::memory::{CaptureStream, Entry, MemoryStore};
use crate::rules::{http_compliant, Exchange, RuleRef};

use bytes::Bytes;
use futures::Stream;
use log::debug;

/// A [MemoryStore] consulted only for exchanges a rule approves.
///
/// Lookups and captures go through the same rule, so what is captured is what can be found.
#[derive(Clone)]
pub struct CachePolicy {
    store: MemoryStore,
    rule: RuleRef,
}

impl CachePolicy {
    pub fn new(store: MemoryStore, rule: RuleRef) -> Self {
        CachePolicy { store, rule }
    }

    /// Gate `store` with [http_compliant()]
    pub fn http_compliant(store: MemoryStore) -> Self {
        Self::new(store, http_compliant())
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Look up a cached response for `req`.
    ///
    /// No response is known yet, the rule sees an empty `200` response head.
    pub fn lookup(&self, req: &ReqHeader) -> Option<Entry> {
        let (resp, _) = http::Response::new(()).into_parts();
        if !self.rule.applies(&Exchange::new(req, &resp)) {
            debug!("{} {} is not eligible for lookup", req.method, req.uri);
            return None;
        }
        self.store.find(req)
    }

    /// Capture `body` if the rule approves of `resp`, otherwise pass it through untouched.
    pub fn capture<S, E>(&self, req: &ReqHeader, resp: &RespHeader, body: S) -> CaptureStream<S>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    {
        if self.rule.applies(&Exchange::new(req, resp)) {
            self.store.write(req, resp, body)
        } else {
            debug!("{} {} is not cacheable", req.method, req.uri);
            CaptureStream::passthrough(body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{self, StreamExt};
    use http::{request, response};

    type Chunk = std::result::Result<Bytes, std::io::Error>;

    fn req(method: &str) -> ReqHeader {
        request::Builder::new()
            .method(method)
            .uri("/p")
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    fn resp(headers: &[(&str, &str)]) -> RespHeader {
        let mut builder = response::Builder::new().status(200);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(()).unwrap().into_parts().0
    }

    async fn send(policy: &CachePolicy, req: &ReqHeader, resp: &RespHeader) -> bool {
        let body = stream::iter(vec![Chunk::Ok(Bytes::from_static(b"data"))]);
        let mut wrapped = policy.capture(req, resp, body);
        let capturing = wrapped.is_capturing();
        while let Some(chunk) = wrapped.next().await {
            assert_eq!(chunk.unwrap(), "data");
        }
        capturing
    }

    #[tokio::test]
    async fn test_capture_and_lookup() {
        let policy = CachePolicy::http_compliant(MemoryStore::default());
        let get = req("GET");
        assert!(policy.lookup(&get).is_none());
        assert!(send(&policy, &get, &resp(&[])).await);
        assert_eq!(policy.lookup(&get).unwrap().size(), 4);
        assert_eq!(policy.store().metrics().stored_entries(), 1);
    }

    #[tokio::test]
    async fn test_not_cacheable() {
        let policy = CachePolicy::http_compliant(MemoryStore::default());
        let get = req("GET");
        assert!(!send(&policy, &get, &resp(&[("set-cookie", "s=1")])).await);
        assert!(!send(&policy, &get, &resp(&[("cache-control", "no-store")])).await);
        assert!(policy.lookup(&get).is_none());

        let post = req("POST");
        assert!(!send(&policy, &post, &resp(&[])).await);
        assert!(policy.store().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_gated() {
        let store = MemoryStore::default();
        let post = req("POST");
        // captured behind the policy's back
        let body = stream::iter(vec![Chunk::Ok(Bytes::from_static(b"x"))]);
        store.write(&post, &resp(&[]), body).for_each(|_| async {}).await;
        assert!(store.find(&post).is_some());

        let policy = CachePolicy::http_compliant(store);
        assert!(policy.lookup(&post).is_none());
    }
}
