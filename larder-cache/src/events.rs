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

//! Store events
//!
//! Listeners are called synchronously on the task that completed the capture, right after the
//! entry is installed. A slow listener delays the end of that response body.

use crate::memory::Entry;
use http::Uri;
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::SystemTime;

/// A response was captured and installed in the store
#[derive(Clone)]
pub struct ResourceCachedEvent {
    pub time: SystemTime,
    pub uri: Uri,
    pub entry: Entry,
}

#[derive(Clone)]
pub enum StoreEvent {
    ResourceCached(ResourceCachedEvent),
}

/// Receives [StoreEvent]s. Must not block.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &StoreEvent);
}

impl<F> EventListener for F
where
    F: Fn(&StoreEvent) + Send + Sync,
{
    fn on_event(&self, event: &StoreEvent) {
        self(event)
    }
}

type ListenerList = Arc<Vec<Arc<dyn EventListener>>>;

/// The listener registry of a store.
#[derive(Default)]
pub struct Events {
    // serializes register/unregister so the same listener cannot be added twice
    registration: Mutex<()>,
    // replaced wholesale on change, dispatch iterates a snapshot
    listeners: RwLock<ListenerList>,
}

fn same_listener(a: &Arc<dyn EventListener>, b: &Arc<dyn EventListener>) -> bool {
    // compare data pointers only, vtables of the same type may differ
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl Events {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `listener`. Returns false if it is already registered.
    pub fn register(&self, listener: Arc<dyn EventListener>) -> bool {
        let _guard = self.registration.lock();
        let current = self.listeners.read().clone();
        if current.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(listener);
        *self.listeners.write() = Arc::new(next);
        true
    }

    /// Remove `listener`. Returns false if it was not registered.
    pub fn unregister(&self, listener: &Arc<dyn EventListener>) -> bool {
        let _guard = self.registration.lock();
        let current = self.listeners.read().clone();
        let next: Vec<_> = current
            .iter()
            .filter(|l| !same_listener(l, listener))
            .cloned()
            .collect();
        if next.len() == current.len() {
            return false;
        }
        *self.listeners.write() = Arc::new(next);
        true
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every registered listener with `event`, in registration order.
    pub fn publish(&self, event: &StoreEvent) {
        let snapshot = self.listeners.read().clone();
        debug!("publishing store event to {} listeners", snapshot.len());
        for listener in snapshot.iter() {
            listener.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    impl EventListener for Counting {
        fn on_event(&self, _event: &StoreEvent) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_register_once() {
        let events = Events::new();
        let listener: Arc<dyn EventListener> = Arc::new(Counting(AtomicUsize::new(0)));
        assert!(events.register(listener.clone()));
        assert!(!events.register(listener.clone()));
        assert_eq!(events.len(), 1);

        let other: Arc<dyn EventListener> = Arc::new(|_: &StoreEvent| {});
        assert!(events.register(other.clone()));
        assert_eq!(events.len(), 2);

        assert!(events.unregister(&listener));
        assert!(!events.unregister(&listener));
        assert_eq!(events.len(), 1);
        assert!(events.unregister(&other));
        assert!(events.is_empty());
    }

    #[test]
    fn test_concurrent_register() {
        let events = Arc::new(Events::new());
        let listener: Arc<dyn EventListener> = Arc::new(Counting(AtomicUsize::new(0)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let events = events.clone();
                let listener = listener.clone();
                std::thread::spawn(move || events.register(listener))
            })
            .collect();
        let added = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|added| *added)
            .count();
        assert_eq!(added, 1);
        assert_eq!(events.len(), 1);
    }
}
