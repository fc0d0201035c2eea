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

//! Content negotiation: which request headers a response varies on, and whether a
//! request presents the same values as the one a representation was captured for.

use http::header::{HeaderName, HeaderValue, VARY};
use http::HeaderMap;

/// The field names listed by every `Vary` line of `headers`, lowercased, de-duplicated and in
/// order of appearance. `*` is kept as is.
pub fn vary_fields(headers: &HeaderMap) -> Vec<String> {
    let mut fields: Vec<String> = vec![];
    for line in headers.get_all(VARY) {
        let Ok(line) = line.to_str() else {
            continue;
        };
        for field in line.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            let field = field.to_ascii_lowercase();
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
    }
    fields
}

/// Whether the response varies on everything (`Vary: *`)
pub fn varies_on_wildcard(headers: &HeaderMap) -> bool {
    vary_fields(headers).iter().any(|f| f == "*")
}

/// The header names a response varies on.
///
/// Fields that are not valid header names (including `*`) can never be presented by a
/// request, they are dropped.
pub fn vary_header_names(headers: &HeaderMap) -> Vec<HeaderName> {
    vary_fields(headers)
        .into_iter()
        .filter(|f| f != "*")
        .filter_map(|f| HeaderName::from_bytes(f.as_bytes()).ok())
        .collect()
}

/// The values a request presented for each header of a negotiated response.
///
/// A name the request did not send is kept with no values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaryCapture {
    fields: Vec<(HeaderName, Vec<HeaderValue>)>,
}

fn sorted_values<'a>(values: impl Iterator<Item = &'a HeaderValue>) -> Vec<&'a [u8]> {
    let mut values: Vec<&[u8]> = values.map(|v| v.as_bytes()).collect();
    values.sort_unstable();
    values
}

impl VaryCapture {
    /// Capture the values of `names` from the request headers.
    pub fn capture(names: &[HeaderName], req_headers: &HeaderMap) -> Self {
        let fields = names
            .iter()
            .map(|name| {
                let values = req_headers.get_all(name).iter().cloned().collect();
                (name.clone(), values)
            })
            .collect();
        VaryCapture { fields }
    }

    /// The names this capture varies on
    pub fn names(&self) -> impl Iterator<Item = &HeaderName> {
        self.fields.iter().map(|(name, _)| name)
    }

    /// Whether the request headers carry, for every captured name, the same values.
    ///
    /// Values compare as a multiset: order does not matter, repetition does.
    pub fn matches(&self, req_headers: &HeaderMap) -> bool {
        self.fields.iter().all(|(name, captured)| {
            sorted_values(req_headers.get_all(name).iter()) == sorted_values(captured.iter())
        })
    }

    /// Whether `other` captured the same multiset of values for the same names.
    pub fn same_as(&self, other: &VaryCapture) -> bool {
        if self.fields.len() != other.fields.len() {
            return false;
        }
        self.fields.iter().all(|(name, values)| {
            other
                .fields
                .iter()
                .find(|(n, _)| n == name)
                .is_some_and(|(_, v)| sorted_values(v.iter()) == sorted_values(values.iter()))
        })
    }

    /// The captured request headers. Names the request did not send are absent.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, values) in &self.fields {
            for value in values {
                headers.append(name.clone(), value.clone());
            }
        }
        headers
    }
}
