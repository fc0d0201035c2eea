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

//! Functions and utilities to help parse Cache-Control headers

use super::*;

use http::header::CACHE_CONTROL;
use http::HeaderMap;
use indexmap::IndexMap;
use larder_error::{Error, ErrorType, OrErr};
use once_cell::sync::Lazy;
use std::num::IntErrorKind;
use std::sync::Arc;
use std::time::Duration;
use strum::IntoStaticStr;

/// The max delta-second per [RFC 9111](https://datatracker.ietf.org/doc/html/rfc9111#section-1.2.2)
// "If a cache receives a delta-seconds
// value greater than the greatest integer it can represent, or if any
// of its subsequent calculations overflows, the cache MUST consider the
// value to be either 2147483648 (2^31) or the greatest positive integer
// it can conveniently represent."
pub const DELTA_SECONDS_OVERFLOW_VALUE: u64 = 2147483648;

/// How to treat a `name=value` directive whose value is not delta seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Fail the whole parse with [ErrorType::InvalidDirective]
    Strict,
    /// Silently drop the offending directive
    Lenient,
}

/// A single parsed directive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// A directive without value, e.g. `no-store`
    Bare,
    /// A `name=seconds` directive, e.g. `max-age=120`
    Time(Duration),
}

impl Directive {
    /// The duration of a time directive, `None` for a bare one.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Directive::Bare => None,
            Directive::Time(d) => Some(*d),
        }
    }
}

/// The registered directives this cache knows how to interpret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum KnownDirective {
    NoCache,
    NoStore,
    NoTransform,
    OnlyIfCached,
    MustRevalidate,
    Public,
    Private,
    ProxyRevalidate,
    Immutable,
}

impl KnownDirective {
    /// The lowercase wire name of the directive
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// An ordered map to store the directives, keyed by lowercase name.
pub type DirectiveMap = IndexMap<String, Directive>;

/// Parsed Cache-Control directives
///
/// Cloning is cheap, the parsed directives are shared.
#[derive(Debug, Clone)]
pub struct CacheControl {
    directives: Arc<DirectiveMap>,
}

static EMPTY: Lazy<CacheControl> = Lazy::new(|| CacheControl {
    directives: Arc::new(IndexMap::new()),
});

// strip one pair of surrounding quotes: `max-age="60"` is accepted
fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn parse_delta_seconds(value: &str) -> Option<u64> {
    match unquote(value).parse::<u64>() {
        Ok(secs) => Some(secs),
        // delta-seconds expect to handle positive overflow gracefully
        Err(e) if e.kind() == &IntErrorKind::PosOverflow => Some(DELTA_SECONDS_OVERFLOW_VALUE),
        Err(_) => None,
    }
}

fn parse_line(line: &str, mode: ParseMode, directives: &mut DirectiveMap) -> Result<()> {
    for token in line.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let Some((name, value)) = token.split_once('=') else {
            directives.insert(token.to_lowercase(), Directive::Bare);
            continue;
        };
        let name = name.trim();
        // an empty name or value is malformed like any other bad value: an error when strict
        let seconds = parse_delta_seconds(value.trim()).filter(|_| !name.is_empty());
        match (seconds, mode) {
            (Some(secs), _) => {
                directives.insert(name.to_lowercase(), Directive::Time(Duration::from_secs(secs)));
            }
            (None, ParseMode::Lenient) => {
                log::trace!("dropping invalid directive [{token}] in [{line}]");
            }
            (None, ParseMode::Strict) => {
                return Error::e_explain(
                    ErrorType::InvalidDirective,
                    format!("unexpected directive [{token}] in [{line}]"),
                );
            }
        }
    }
    Ok(())
}

impl CacheControl {
    /// The empty directive set. Shared, so this never allocates.
    pub fn empty() -> Self {
        EMPTY.clone()
    }

    fn from_map(directives: DirectiveMap) -> Self {
        if directives.is_empty() {
            Self::empty()
        } else {
            CacheControl {
                directives: Arc::new(directives),
            }
        }
    }

    /// Parse a raw header value.
    ///
    /// `None` or an empty value yields [CacheControl::empty()]. Directive names are case
    /// insensitive, and when a name repeats the last occurrence wins.
    pub fn parse(value: Option<&str>, mode: ParseMode) -> Result<Self> {
        let Some(value) = value else {
            return Ok(Self::empty());
        };
        let mut directives = IndexMap::new();
        parse_line(value, mode, &mut directives)?;
        Ok(Self::from_map(directives))
    }

    /// Parse a raw header value, dropping whatever is malformed.
    pub fn parse_lenient(value: &str) -> Self {
        // lenient parsing never fails
        Self::parse(Some(value), ParseMode::Lenient).unwrap_or_else(|_| Self::empty())
    }

    /// Parse every `Cache-Control` line in `headers`, in header line insertion order.
    ///
    /// Lines that are not valid UTF-8 are an error in [ParseMode::Strict] and ignored otherwise.
    pub fn from_headers(headers: &HeaderMap, mode: ParseMode) -> Result<Self> {
        let mut directives = IndexMap::new();
        for line in headers.get_all(CACHE_CONTROL) {
            let line = match (line.to_str(), mode) {
                (Ok(line), _) => line,
                (Err(_), ParseMode::Lenient) => continue,
                (err, ParseMode::Strict) => err.explain_err(ErrorType::InvalidDirective, |e| {
                    format!("Cache-Control line is not valid utf8: {e}")
                })?,
            };
            parse_line(line, mode, &mut directives)?;
        }
        Ok(Self::from_map(directives))
    }

    /// Parse `Cache-Control` from the [RespHeader]
    pub fn from_resp_headers(resp_header: &RespHeader, mode: ParseMode) -> Result<Self> {
        Self::from_headers(&resp_header.headers, mode)
    }

    /// Parse `Cache-Control` from the [ReqHeader]
    pub fn from_req_headers(req_header: &ReqHeader, mode: ParseMode) -> Result<Self> {
        Self::from_headers(&req_header.headers, mode)
    }

    /// Look up a directive by name, case insensitive.
    pub fn get(&self, name: &str) -> Option<Directive> {
        self.directives.get(&name.to_lowercase()).copied()
    }

    /// Whether a directive of the given name exists, with or without value.
    pub fn has_named(&self, name: &str) -> bool {
        self.directives.contains_key(&name.to_lowercase())
    }

    /// Whether the given registered directive exists in its bare (no value) form.
    pub fn has(&self, directive: KnownDirective) -> bool {
        matches!(
            self.directives.get(directive.as_str()),
            Some(Directive::Bare)
        )
    }

    /// The duration of the time directive `name`, if present.
    pub fn duration(&self, name: &str) -> Option<Duration> {
        self.get(name).and_then(|d| d.duration())
    }

    /// Return the `max-age` duration
    pub fn max_age(&self) -> Option<Duration> {
        self.duration("max-age")
    }

    /// Return the `s-maxage` duration
    pub fn s_maxage(&self) -> Option<Duration> {
        self.duration("s-maxage")
    }

    /// Whether the standalone `no-cache` exists
    pub fn no_cache(&self) -> bool {
        self.has(KnownDirective::NoCache)
    }

    /// Whether the standalone `no-store` exists
    pub fn no_store(&self) -> bool {
        self.has(KnownDirective::NoStore)
    }

    /// Whether the standalone `private` exists
    pub fn private(&self) -> bool {
        self.has(KnownDirective::Private)
    }

    /// Whether the standalone `public` exists
    pub fn public(&self) -> bool {
        self.has(KnownDirective::Public)
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    /// Iterate the directives in the order they first appeared.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Directive)> {
        self.directives.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether this and `other` share the same underlying directive set.
    pub fn ptr_eq(&self, other: &CacheControl) -> bool {
        Arc::ptr_eq(&self.directives, &other.directives)
    }
}

impl Default for CacheControl {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{request, response, HeaderValue};

    fn build_response(cc_value: &str) -> response::Parts {
        let (parts, _) = response::Builder::new()
            .header(CACHE_CONTROL, cc_value)
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn test_simple_cache_control() {
        let cc = CacheControl::parse(Some("no-cache, max-age=120"), ParseMode::Strict).unwrap();
        assert_eq!(cc.len(), 2);
        assert_eq!(cc.get("no-cache"), Some(Directive::Bare));
        assert!(cc.no_cache());
        assert_eq!(cc.get("max-age"), Some(Directive::Time(Duration::from_secs(120))));
        assert_eq!(cc.max_age(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_invalid_time_directive() {
        let cc = CacheControl::parse(Some("max-age=abc"), ParseMode::Lenient).unwrap();
        assert!(cc.get("max-age").is_none());
        assert!(cc.is_empty());

        let e = CacheControl::parse(Some("public, max-age=abc"), ParseMode::Strict).unwrap_err();
        assert_eq!(e.etype(), &ErrorType::InvalidDirective);
        assert!(e.to_string().contains("[max-age=abc]"));
    }

    #[test]
    fn test_negative_and_empty_values() {
        let cc = CacheControl::parse(Some("max-age=-1, s-maxage=, =5, public"), ParseMode::Lenient)
            .unwrap();
        assert_eq!(cc.len(), 1);
        assert!(cc.public());

        assert!(CacheControl::parse(Some("max-age=-1"), ParseMode::Strict).is_err());
        assert!(CacheControl::parse(Some("s-maxage="), ParseMode::Strict).is_err());
        assert!(CacheControl::parse(Some("=5"), ParseMode::Strict).is_err());
    }

    #[test]
    fn test_empty_is_shared() {
        let a = CacheControl::parse(None, ParseMode::Strict).unwrap();
        let b = CacheControl::parse(Some(""), ParseMode::Strict).unwrap();
        let c = CacheControl::parse(Some(" , ,"), ParseMode::Strict).unwrap();
        assert!(a.is_empty());
        assert!(a.ptr_eq(&b));
        assert!(a.ptr_eq(&c));
        assert!(a.ptr_eq(&CacheControl::default()));
    }

    #[test]
    fn test_case_insensitive_names() {
        let cc = CacheControl::parse_lenient("No-Store, MAX-AGE=10, Private");
        assert!(cc.no_store());
        assert!(cc.private());
        assert!(cc.has_named("max-age"));
        assert!(cc.has_named("Max-Age"));
        assert_eq!(cc.duration("mAx-AgE"), Some(Duration::from_secs(10)));

        let mut iter = cc.iter();
        assert_eq!(iter.next().unwrap().0, "no-store");
        assert_eq!(iter.next().unwrap().0, "max-age");
        assert_eq!(iter.next().unwrap().0, "private");
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_last_occurrence_wins() {
        let cc = CacheControl::parse_lenient("max-age=10, max-age=20");
        assert_eq!(cc.len(), 1);
        assert_eq!(cc.max_age(), Some(Duration::from_secs(20)));

        // a bare directive replaced by a timed one is no longer a bare membership match
        let cc = CacheControl::parse_lenient("no-cache, no-cache=5");
        assert!(cc.has_named("no-cache"));
        assert!(!cc.has(KnownDirective::NoCache));
    }

    #[test]
    fn test_quoted_and_overflow() {
        let cc = CacheControl::parse_lenient("max-age=\"60\", s-maxage=99999999999999999999999999");
        assert_eq!(cc.max_age(), Some(Duration::from_secs(60)));
        assert_eq!(
            cc.s_maxage(),
            Some(Duration::from_secs(DELTA_SECONDS_OVERFLOW_VALUE))
        );
    }

    #[test]
    fn test_known_directive_names() {
        assert_eq!(KnownDirective::NoCache.as_str(), "no-cache");
        assert_eq!(KnownDirective::OnlyIfCached.as_str(), "only-if-cached");
        assert_eq!(KnownDirective::ProxyRevalidate.as_str(), "proxy-revalidate");
        assert_eq!(KnownDirective::Immutable.as_str(), "immutable");

        let cc = CacheControl::parse_lenient(
            "no-transform, only-if-cached, must-revalidate, proxy-revalidate, immutable",
        );
        assert!(cc.has(KnownDirective::NoTransform));
        assert!(cc.has(KnownDirective::OnlyIfCached));
        assert!(cc.has(KnownDirective::MustRevalidate));
        assert!(cc.has(KnownDirective::ProxyRevalidate));
        assert!(cc.has(KnownDirective::Immutable));
        assert!(!cc.has(KnownDirective::Public));
    }

    #[test]
    fn test_directives_across_header_lines() {
        let (parts, _) = response::Builder::new()
            .header(CACHE_CONTROL, "public,")
            .header("cache-Control", "max-age=10000")
            .body(())
            .unwrap()
            .into_parts();
        let cc = CacheControl::from_resp_headers(&parts, ParseMode::Strict).unwrap();

        assert!(cc.public());
        assert_eq!(cc.max_age(), Some(Duration::from_secs(10000)));
    }

    #[test]
    fn test_non_utf8_line() {
        let mut resp = build_response("public");
        resp.headers.append(
            CACHE_CONTROL,
            HeaderValue::from_bytes(b"max-age=ba\xFFr").unwrap(),
        );

        let cc = CacheControl::from_resp_headers(&resp, ParseMode::Lenient).unwrap();
        assert!(cc.public());
        assert!(cc.max_age().is_none());

        let e = CacheControl::from_resp_headers(&resp, ParseMode::Strict).unwrap_err();
        assert_eq!(e.etype(), &ErrorType::InvalidDirective);
    }

    #[test]
    fn test_absent_header() {
        let (parts, _) = response::Builder::new().body(()).unwrap().into_parts();
        let cc = CacheControl::from_resp_headers(&parts, ParseMode::Strict).unwrap();
        assert!(cc.is_empty());
        assert!(cc.ptr_eq(&CacheControl::empty()));
    }

    #[test]
    fn test_request_only_if_cached() {
        let (req, _) = request::Builder::new()
            .header(CACHE_CONTROL, "only-if-cached")
            .body(())
            .unwrap()
            .into_parts();
        let cc = CacheControl::from_req_headers(&req, ParseMode::Strict).unwrap();
        assert!(cc.has(KnownDirective::OnlyIfCached));
    }
}
