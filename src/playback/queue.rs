use crate::catalog::Catalog;
use rand::seq::SliceRandom;
use rand::thread_rng;

/// Shuffled rotation over the catalog. Each locator is dealt exactly once
/// per cycle; when the cycle is exhausted the full catalog is reshuffled and
/// the played list starts over. At any point `pending + played` covers the
/// whole catalog.
pub struct ShuffleQueue {
    catalog: Catalog,
    pending: Vec<String>,
    played: Vec<String>,
}

impl ShuffleQueue {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog, pending: Vec::new(), played: Vec::new() }
    }

    pub fn catalog_len(&self) -> usize {
        self.catalog.len()
    }

    /// Locators still undealt in the current cycle.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn played_count(&self) -> usize {
        self.played.len()
    }

    /// Deals the next locator, starting a fresh shuffled cycle when the
    /// current one is exhausted. `None` only for an empty catalog.
    pub fn next(&mut self) -> Option<String> {
        if self.catalog.is_empty() {
            return None;
        }
        if self.pending.is_empty() {
            self.pending = self.catalog.locators().to_vec();
            self.pending.shuffle(&mut thread_rng());
            self.played.clear();
            eprintln!("[playback] new cycle: {} clips shuffled", self.pending.len());
        }
        let locator = self.pending.pop()?;
        self.played.push(locator.clone());
        Some(locator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn catalog_of(n: usize) -> Catalog {
        Catalog::from_locators((0..n).map(|i| format!("clip_{i}.vrma")).collect())
    }

    #[test]
    fn empty_catalog_deals_nothing() {
        let mut queue = ShuffleQueue::new(Catalog::empty());
        assert!(queue.next().is_none());
        assert_eq!(queue.catalog_len(), 0);
    }

    #[test]
    fn every_cycle_covers_the_catalog_once() {
        for size in 1..=6 {
            let mut queue = ShuffleQueue::new(catalog_of(size));
            for cycle in 0..3 {
                let mut seen = HashSet::new();
                for _ in 0..size {
                    let locator = queue.next().expect("catalog is non-empty");
                    assert!(seen.insert(locator), "repeat within cycle {cycle}");
                }
                assert_eq!(seen.len(), size);
                assert_eq!(queue.remaining(), 0);
                assert_eq!(queue.played_count(), size);
            }
        }
    }

    #[test]
    fn pending_and_played_partition_the_catalog() {
        let mut queue = ShuffleQueue::new(catalog_of(5));
        let _ = queue.next();
        let _ = queue.next();
        assert_eq!(queue.remaining() + queue.played_count(), 5);
    }
}
