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

//! Cache key

use super::*;

use http::header::HOST;
use larder_error::{ErrorType, OkOrErr};
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// The digest size in bytes
pub const KEY_SIZE: usize = 32;

/// The prefix of the external string form of a [CacheKey]
pub const KEY_STRING_PREFIX: &str = "inmemory://";

/// An 32 byte hash binary
pub type HashBinary = [u8; KEY_SIZE];

/// Host material used when the request carries no `Host` header
pub const DEFAULT_HOST: &str = "_default";

fn hex2str(hex: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(KEY_SIZE * 2);
    for c in hex {
        write!(s, "{:02x}", c).unwrap(); // safe, just dump hex to string
    }
    s
}

/// Decode the hex str into [HashBinary].
///
/// Return `None` when the decode fails or the input is not exact 64 (to decode to 32 bytes).
pub fn str2hex(s: &str) -> Option<HashBinary> {
    if s.len() != KEY_SIZE * 2 {
        return None;
    }
    let mut output = [0; KEY_SIZE];
    hex::decode_to_slice(s.as_bytes(), &mut output).ok()?;
    Some(output)
}

/// The identity of a cached resource: the SHA-256 digest of the key material a
/// [KeyProducer] feeds into a [KeyBuilder].
///
/// Two keys are equal exactly when their digests are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(HashBinary);

impl CacheKey {
    pub fn from_bin(bin: HashBinary) -> Self {
        CacheKey(bin)
    }

    pub fn as_bin(&self) -> &HashBinary {
        &self.0
    }

    /// The external string form, `inmemory://` followed by the lowercase hex digest.
    pub fn to_key_string(&self) -> String {
        format!("{KEY_STRING_PREFIX}{}", hex2str(&self.0))
    }

    /// Decode the external string form produced by [Self::to_key_string()].
    pub fn parse(s: &str) -> Result<Self> {
        let hex = s
            .strip_prefix(KEY_STRING_PREFIX)
            .or_err_with(ErrorType::InvalidCacheKey, || {
                format!("missing {KEY_STRING_PREFIX} prefix: {s}")
            })?;
        let bin = str2hex(hex).or_err_with(ErrorType::InvalidCacheKey, || {
            format!("not a {KEY_SIZE} byte hex digest: {s}")
        })?;
        Ok(CacheKey(bin))
    }

    // the digest is uniformly distributed, any 8 bytes do
    pub(crate) fn shard_hint(&self) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(b)
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{KEY_STRING_PREFIX}{}", hex2str(&self.0))
    }
}

/// Accumulates key material.
pub trait KeyBuilder {
    fn add(&mut self, material: &[u8]);

    /// Add a named field. The value is length prefixed so that no two different sequences of
    /// fields produce the same material.
    fn add_field(&mut self, name: &[u8], value: &[u8]) {
        self.add(name);
        self.add(&(value.len() as u64).to_be_bytes());
        self.add(value);
    }
}

/// [KeyBuilder] backed by SHA-256
#[derive(Default)]
pub struct Sha256KeyBuilder {
    hasher: Sha256,
}

impl Sha256KeyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finish the digest
    pub fn build(self) -> CacheKey {
        let mut bin = [0u8; KEY_SIZE];
        bin.copy_from_slice(&self.hasher.finalize());
        CacheKey(bin)
    }
}

impl KeyBuilder for Sha256KeyBuilder {
    fn add(&mut self, material: &[u8]) {
        self.hasher.update(material);
    }
}

/// Turns a request into key material.
///
/// The same request must always produce the same sequence of additions.
pub trait KeyProducer: Send + Sync {
    fn produce(&self, req: &ReqHeader, builder: &mut dyn KeyBuilder);

    /// A producer that runs `self`, then `next`, on the same builder.
    fn concat<P: KeyProducer>(self, next: P) -> Concat<Self, P>
    where
        Self: Sized,
    {
        Concat(self, next)
    }
}

impl<P: KeyProducer + ?Sized> KeyProducer for Box<P> {
    fn produce(&self, req: &ReqHeader, builder: &mut dyn KeyBuilder) {
        (**self).produce(req, builder)
    }
}

impl<P: KeyProducer + ?Sized> KeyProducer for Arc<P> {
    fn produce(&self, req: &ReqHeader, builder: &mut dyn KeyBuilder) {
        (**self).produce(req, builder)
    }
}

/// See [KeyProducer::concat()]
pub struct Concat<A, B>(A, B);

impl<A: KeyProducer, B: KeyProducer> KeyProducer for Concat<A, B> {
    fn produce(&self, req: &ReqHeader, builder: &mut dyn KeyBuilder) {
        self.0.produce(req, builder);
        self.1.produce(req, builder);
    }
}

/// Keys a request by its method, path and query.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardKeyProducer;

impl StandardKeyProducer {
    pub fn new() -> Self {
        StandardKeyProducer
    }

    /// Also key by the `Host` header, see [HostKeyProducer].
    pub fn include_host(self) -> Concat<Self, HostKeyProducer> {
        self.concat(HostKeyProducer)
    }
}

impl KeyProducer for StandardKeyProducer {
    fn produce(&self, req: &ReqHeader, builder: &mut dyn KeyBuilder) {
        builder.add_field(b"method", req.method.as_str().to_ascii_uppercase().as_bytes());
        let path = req.uri.path();
        builder.add_field(b"path", if path.is_empty() { "/" } else { path }.as_bytes());
        builder.add_field(b"query", req.uri.query().unwrap_or_default().as_bytes());
    }
}

/// Keys a request by its `Host` header, or [DEFAULT_HOST] when there is none.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostKeyProducer;

impl KeyProducer for HostKeyProducer {
    fn produce(&self, req: &ReqHeader, builder: &mut dyn KeyBuilder) {
        let host = req
            .headers
            .get(HOST)
            .map_or(DEFAULT_HOST.as_bytes(), |h| h.as_bytes());
        builder.add_field(b"host", host);
    }
}

/// Compute the [CacheKey] of `req` with `producer`.
pub fn cache_key(producer: &dyn KeyProducer, req: &ReqHeader) -> CacheKey {
    let mut builder = Sha256KeyBuilder::new();
    producer.produce(req, &mut builder);
    builder.build()
}
