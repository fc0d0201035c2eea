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

//! Cacheability rules
//!
//! A [Rule] is a predicate over a request and its response. Rules compose with [not()],
//! [all()] and [any()]. [http_compliant()] is the standard rule set.

use super::*;
use crate::cache_control::{CacheControl, KnownDirective, ParseMode};
use crate::variance::varies_on_wildcard;

use http::header::SET_COOKIE;
use once_cell::sync::Lazy;
use once_cell::unsync::OnceCell;

/// A request and its response, as seen by rules
///
/// Derived state, like the parsed response `Cache-Control`, is computed at most once per
/// exchange no matter how many rules look at it.
pub struct Exchange<'a> {
    req: &'a ReqHeader,
    resp: &'a RespHeader,
    resp_cache_control: OnceCell<CacheControl>,
}

impl<'a> Exchange<'a> {
    pub fn new(req: &'a ReqHeader, resp: &'a RespHeader) -> Self {
        Exchange {
            req,
            resp,
            resp_cache_control: OnceCell::new(),
        }
    }

    pub fn req(&self) -> &ReqHeader {
        self.req
    }

    pub fn resp(&self) -> &RespHeader {
        self.resp
    }

    /// The response `Cache-Control`, parsed leniently
    pub fn resp_cache_control(&self) -> &CacheControl {
        self.resp_cache_control.get_or_init(|| {
            // lenient parsing never fails
            CacheControl::from_resp_headers(self.resp, ParseMode::Lenient)
                .unwrap_or_else(|_| CacheControl::empty())
        })
    }
}

/// A cacheability predicate
pub trait Rule: Send + Sync {
    fn applies(&self, exchange: &Exchange) -> bool;
}

impl<F> Rule for F
where
    F: Fn(&Exchange) -> bool + Send + Sync,
{
    fn applies(&self, exchange: &Exchange) -> bool {
        self(exchange)
    }
}

/// A shared rule
pub type RuleRef = Arc<dyn Rule>;

/// Turn a closure into a [RuleRef]
pub fn rule<F>(f: F) -> RuleRef
where
    F: Fn(&Exchange) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// See [not()]
pub struct Not(RuleRef);

impl Rule for Not {
    fn applies(&self, exchange: &Exchange) -> bool {
        !self.0.applies(exchange)
    }
}

/// See [all()]
pub struct All(Vec<RuleRef>);

impl Rule for All {
    fn applies(&self, exchange: &Exchange) -> bool {
        self.0.iter().all(|r| r.applies(exchange))
    }
}

/// See [any()]
pub struct Any(Vec<RuleRef>);

impl Rule for Any {
    fn applies(&self, exchange: &Exchange) -> bool {
        self.0.iter().any(|r| r.applies(exchange))
    }
}

/// Applies when `rule` does not
pub fn not(rule: RuleRef) -> RuleRef {
    Arc::new(Not(rule))
}

/// Applies when every rule does, stopping at the first that does not. True when empty.
pub fn all(rules: Vec<RuleRef>) -> RuleRef {
    Arc::new(All(rules))
}

/// Applies when some rule does, stopping at the first that does. False when empty.
pub fn any(rules: Vec<RuleRef>) -> RuleRef {
    Arc::new(Any(rules))
}

/// The request method is GET
pub fn is_get() -> RuleRef {
    rule(|ex: &Exchange| ex.req().method == Method::GET)
}

/// The request method is HEAD
pub fn is_head() -> RuleRef {
    rule(|ex: &Exchange| ex.req().method == Method::HEAD)
}

/// The response has a bare `no-cache`
pub fn no_cache() -> RuleRef {
    rule(|ex: &Exchange| ex.resp_cache_control().has(KnownDirective::NoCache))
}

/// The response has a bare `no-store`
pub fn no_store() -> RuleRef {
    rule(|ex: &Exchange| ex.resp_cache_control().has(KnownDirective::NoStore))
}

/// The response has a bare `private`
pub fn private() -> RuleRef {
    rule(|ex: &Exchange| ex.resp_cache_control().has(KnownDirective::Private))
}

/// The response varies on `*`
pub fn varies_on_anything() -> RuleRef {
    rule(|ex: &Exchange| varies_on_wildcard(&ex.resp().headers))
}

/// The response sets a cookie
pub fn sets_cookie() -> RuleRef {
    rule(|ex: &Exchange| ex.resp().headers.contains_key(SET_COOKIE))
}

static HTTP_COMPLIANT: Lazy<RuleRef> = Lazy::new(|| {
    all(vec![
        any(vec![is_get(), is_head()]),
        not(no_cache()),
        not(no_store()),
        not(private()),
        not(varies_on_anything()),
        not(sets_cookie()),
    ])
});

/// The standard rule: a GET or HEAD whose response is not `no-cache`, `no-store` or
/// `private`, does not vary on `*` and sets no cookie.
pub fn http_compliant() -> RuleRef {
    HTTP_COMPLIANT.clone()
}
