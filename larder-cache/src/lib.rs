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

//! An in-memory HTTP response cache.
//!
//! Responses are captured while their body streams to the client: [MemoryStore::write()] wraps
//! the body and stores a copy once it completes. [MemoryStore::find()] later returns the
//! cached [Entry] for an equivalent request. [CachePolicy] puts both behind a cacheability
//! [rules::Rule].

#![allow(clippy::new_without_default)]

use http::{method::Method, request::Parts as ReqHeader, response::Parts as RespHeader};
use larder_error::Result;
use std::sync::Arc;

pub mod cache_control;
pub mod conf;
pub mod events;
pub mod frame;
mod hashtable;
pub mod key;
pub mod memory;
pub mod metrics;
pub mod policy;
pub mod rules;
pub mod variance;

pub use cache_control::CacheControl;
pub use conf::StoreConf;
pub use events::{EventListener, ResourceCachedEvent, StoreEvent};
pub use key::{CacheKey, KeyProducer, StandardKeyProducer};
pub use memory::{CaptureStream, Entry, MemoryStore};
pub use metrics::StoreMetrics;
pub use policy::CachePolicy;
