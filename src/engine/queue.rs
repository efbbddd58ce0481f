//! Priority queue of submitted command ids

use std::collections::{BTreeSet, HashMap};

/// Ordered by `(rank, id)`; rank 1 (critical) is served first
#[derive(Debug, Default)]
pub struct CommandQueue {
    order: BTreeSet<(u8, String)>,
    ranks: HashMap<String, u8>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the id is already queued
    pub fn push(&mut self, rank: u8, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.ranks.contains_key(&id) {
            return false;
        }
        self.ranks.insert(id.clone(), rank);
        self.order.insert((rank, id))
    }

    pub fn remove(&mut self, id: &str) -> bool {
        match self.ranks.remove(id) {
            Some(rank) => self.order.remove(&(rank, id.to_string())),
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ranks.contains_key(id)
    }

    /// Ids in dispatch order
    pub fn ids(&self) -> Vec<String> {
        self.order.iter().map(|(_, id)| id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Remove everything, returning ids in dispatch order
    pub fn drain(&mut self) -> Vec<String> {
        self.ranks.clear();
        std::mem::take(&mut self.order)
            .into_iter()
            .map(|(_, id)| id)
            .collect()
    }
}
