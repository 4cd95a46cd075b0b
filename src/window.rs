//! Licznik w oknie przesuwnym: kolejka znaczników czasu per klucz.
//!
//! Znaczniki są dopisywane w kolejności chronologicznej, więc przycinanie to
//! zwykłe zdejmowanie przeterminowanych wpisów z czoła kolejki.

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;

use crate::clock::Clock;

#[derive(Debug)]
pub struct SlidingWindowCounter<K: Eq + Hash> {
    window: TimeDelta,
    clock: Arc<dyn Clock>,
    entries: DashMap<K, VecDeque<DateTime<Utc>>>,
}

impl<K: Eq + Hash + Clone> SlidingWindowCounter<K> {
    pub fn new(window: TimeDelta, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            clock,
            entries: DashMap::new(),
        }
    }

    /// Dopisz zdarzenie „teraz” i zwróć liczbę zdarzeń w oknie (łącznie z nim).
    pub fn record(&self, key: K) -> usize {
        let now = self.clock.now();
        let mut q = self.entries.entry(key).or_default();
        prune_older_than(&mut q, now - self.window);
        q.push_back(now);
        q.len()
    }

    /// Liczba zdarzeń nie starszych niż `window` (nie dłuższe niż okno licznika).
    pub fn count(&self, key: &K, window: TimeDelta) -> usize {
        let now = self.clock.now();
        let Some(mut q) = self.entries.get_mut(key) else {
            return 0;
        };
        prune_older_than(&mut q, now - self.window);
        let cutoff = now - window.min(self.window);
        q.iter().rev().take_while(|t| **t >= cutoff).count()
    }

    /// Zdarzenia w pełnym oknie licznika.
    pub fn current(&self, key: &K) -> usize {
        self.count(key, self.window)
    }

    /// Usuń klucze bez aktywności dłuższej niż `idle`. Zwraca liczbę usuniętych.
    pub fn evict_idle(&self, idle: TimeDelta) -> usize {
        let cutoff = self.clock.now() - idle;
        let before = self.entries.len();
        self.entries
            .retain(|_, q| q.back().is_some_and(|last| *last >= cutoff));
        before.saturating_sub(self.entries.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}

fn prune_older_than(q: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    while let Some(&front) = q.front() {
        if front < cutoff {
            q.pop_front();
        } else {
            break;
        }
    }
}
