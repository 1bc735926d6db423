//! Server-owned replicated values and their client-side mirrors
//!
//! A [`ReplicatedValue`] lives on the server. Every accepted write bumps a
//! per-value sequence number and marks the value dirty so the tick loop can
//! broadcast it. A [`MirroredValue`] lives on each client and only accepts
//! strictly newer sequence numbers, so an observer's change stream is always
//! an in-order subsequence of the server's writes.

use std::fmt;

type Listener<T> = Box<dyn FnMut(&T, &T) + Send + Sync>;

/// Change callbacks invoked with `(previous, current)`
pub struct ChangeListeners<T> {
    listeners: Vec<Listener<T>>,
}

impl<T> ChangeListeners<T> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: FnMut(&T, &T) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    fn notify(&mut self, previous: &T, current: &T) {
        for listener in &mut self.listeners {
            listener(previous, current);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<T> Default for ChangeListeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Authoritative value, mutated only by the server tick
pub struct ReplicatedValue<T> {
    value: T,
    seq: u64,
    dirty: bool,
    listeners: ChangeListeners<T>,
}

impl<T: Clone + PartialEq> ReplicatedValue<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: initial,
            seq: 0,
            dirty: false,
            listeners: ChangeListeners::new(),
        }
    }

    #[inline]
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Sequence number of the last accepted write (0 = initial value)
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Store a new value. Returns false when the value is unchanged, in which
    /// case nothing is marked dirty and no listener fires.
    pub fn set(&mut self, value: T) -> bool {
        if self.value == value {
            return false;
        }
        let previous = std::mem::replace(&mut self.value, value);
        self.seq += 1;
        self.dirty = true;
        self.listeners.notify(&previous, &self.value);
        true
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Take the pending broadcast, if any. Several writes within one tick
    /// collapse into the latest value and its sequence number.
    pub fn take_dirty(&mut self) -> Option<(u64, T)> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some((self.seq, self.value.clone()))
    }

    pub fn on_changed<F>(&mut self, listener: F)
    where
        F: FnMut(&T, &T) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener);
    }
}

impl<T: fmt::Debug> fmt::Debug for ReplicatedValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicatedValue")
            .field("value", &self.value)
            .field("seq", &self.seq)
            .field("dirty", &self.dirty)
            .finish()
    }
}

/// Client-side copy of a replicated value
pub struct MirroredValue<T> {
    value: T,
    seq: u64,
    predicted: Option<T>,
    listeners: ChangeListeners<T>,
}

impl<T: Clone + PartialEq> MirroredValue<T> {
    pub fn new(initial: T) -> Self {
        Self::with_seq(initial, 0)
    }

    /// Mirror seeded from a snapshot taken at `seq`
    pub fn with_seq(initial: T, seq: u64) -> Self {
        Self {
            value: initial,
            seq,
            predicted: None,
            listeners: ChangeListeners::new(),
        }
    }

    /// Local view: the speculative value if one is pending, else the mirror
    pub fn get(&self) -> &T {
        self.predicted.as_ref().unwrap_or(&self.value)
    }

    pub fn authoritative(&self) -> &T {
        &self.value
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn is_predicted(&self) -> bool {
        self.predicted.is_some()
    }

    /// Record a client-side prediction. It is discarded by the next
    /// authoritative update whatever that update says.
    pub fn predict(&mut self, value: T) {
        self.predicted = Some(value);
    }

    /// Apply an authoritative update. Stale or duplicate sequence numbers
    /// are ignored and return false.
    pub fn apply(&mut self, seq: u64, value: T) -> bool {
        if seq <= self.seq {
            return false;
        }
        self.seq = seq;
        self.predicted = None;
        if self.value != value {
            let previous = std::mem::replace(&mut self.value, value);
            self.listeners.notify(&previous, &self.value);
        }
        true
    }

    pub fn on_changed<F>(&mut self, listener: F)
    where
        F: FnMut(&T, &T) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener);
    }
}

impl<T: fmt::Debug> fmt::Debug for MirroredValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirroredValue")
            .field("value", &self.value)
            .field("seq", &self.seq)
            .field("predicted", &self.predicted)
            .finish()
    }
}
