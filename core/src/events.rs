//! Event registry and synchronous dispatch.
//!
//! # Design
//! Each event kind owns one optional slot handler (the `on<event>` property)
//! and an ordered list of listeners. Dispatch snapshots both before invoking
//! anything, so handlers may add or remove listeners, or re-enter the owner,
//! without disturbing the iteration in progress. Every invocation runs under
//! `catch_unwind`; a panicking handler is logged and the remaining handlers
//! still fire.
//!
//! Listeners are `Rc<dyn Fn>`: identity for removal is pointer identity, and
//! `Fn` (not `FnMut`) keeps re-entrant dispatch of the same handler sound.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::str::FromStr;

use log::warn;

/// Events fired by a request object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ReadyStateChange,
    LoadStart,
    Load,
    LoadEnd,
    Error,
    Abort,
    Timeout,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::ReadyStateChange,
        EventKind::LoadStart,
        EventKind::Load,
        EventKind::LoadEnd,
        EventKind::Error,
        EventKind::Abort,
        EventKind::Timeout,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ReadyStateChange => "readystatechange",
            EventKind::LoadStart => "loadstart",
            EventKind::Load => "load",
            EventKind::LoadEnd => "loadend",
            EventKind::Error => "error",
            EventKind::Abort => "abort",
            EventKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.strip_prefix("on").unwrap_or(s);
        EventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == name)
            .ok_or_else(|| format!("unknown event: {s}"))
    }
}

/// Payload handed to every handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    /// Diagnostic text for `error` and `timeout`.
    pub detail: Option<String>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self { kind, detail: None }
    }

    pub fn with_detail(kind: EventKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
        }
    }
}

/// A handler bound to an owner of type `T`.
pub type Listener<T> = Rc<dyn Fn(&mut T, &Event)>;

/// Wrap a closure as a listener.
pub fn listener<T, F>(f: F) -> Listener<T>
where
    F: Fn(&mut T, &Event) + 'static,
{
    Rc::new(f)
}

/// Slot handlers plus listener lists, keyed by event kind.
pub struct EventTarget<T> {
    slots: HashMap<EventKind, Listener<T>>,
    listeners: HashMap<EventKind, Vec<Listener<T>>>,
}

impl<T> Default for EventTarget<T> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
            listeners: HashMap::new(),
        }
    }
}

impl<T> fmt::Debug for EventTarget<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<_, _> = self
            .listeners
            .iter()
            .map(|(k, v)| (k.as_str(), v.len()))
            .collect();
        f.debug_struct("EventTarget")
            .field("slots", &self.slots.keys().collect::<Vec<_>>())
            .field("listeners", &counts)
            .finish()
    }
}

impl<T> EventTarget<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind or clear the `on<kind>` slot.
    pub fn set_slot(&mut self, kind: EventKind, handler: Option<Listener<T>>) {
        match handler {
            Some(h) => {
                self.slots.insert(kind, h);
            }
            None => {
                self.slots.remove(&kind);
            }
        }
    }

    pub fn slot(&self, kind: EventKind) -> Option<&Listener<T>> {
        self.slots.get(&kind)
    }

    /// Register a listener. Duplicates are kept.
    pub fn add_listener(&mut self, kind: EventKind, handler: Listener<T>) {
        self.listeners.entry(kind).or_default().push(handler);
    }

    /// Remove the first registration of `handler` (by identity).
    pub fn remove_listener(&mut self, kind: EventKind, handler: &Listener<T>) -> bool {
        let Some(list) = self.listeners.get_mut(&kind) else {
            return false;
        };
        match list.iter().position(|h| Rc::ptr_eq(h, handler)) {
            Some(pos) => {
                list.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }

    /// Handlers to invoke for `kind`, slot first, frozen at call time.
    pub fn snapshot(&self, kind: EventKind) -> Vec<Listener<T>> {
        let mut handlers = Vec::with_capacity(1 + self.listener_count(kind));
        if let Some(slot) = self.slots.get(&kind) {
            handlers.push(Rc::clone(slot));
        }
        if let Some(list) = self.listeners.get(&kind) {
            handlers.extend(list.iter().cloned());
        }
        handlers
    }
}

/// Owners that expose an `EventTarget` over themselves.
pub trait EventOwner: Sized {
    fn event_target(&self) -> &EventTarget<Self>;
}

/// Fire `event` on `owner`. Each handler is isolated: a panic is logged and
/// dispatch continues with the next handler.
pub fn dispatch<T: EventOwner>(owner: &mut T, event: &Event) {
    let handlers = owner.event_target().snapshot(event.kind);
    for handler in handlers {
        let outcome = catch_unwind(AssertUnwindSafe(|| handler(owner, event)));
        if outcome.is_err() {
            warn!("{} handler panicked; continuing dispatch", event.kind);
        }
    }
}
