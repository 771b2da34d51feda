use std::collections::BTreeMap;

use crate::model::{Character, CharacterId};

/// Alive/dead partition of a match's participants.
///
/// Keyed by character id so iteration order (and therefore sampling) is
/// independent of insertion history.
#[derive(Debug, Clone, Default)]
pub struct Pools {
    alive: BTreeMap<CharacterId, Character>,
    dead: BTreeMap<CharacterId, Character>,
}

impl Pools {
    /// All participants start alive.
    pub fn new(participants: &[Character]) -> Self {
        let alive = participants
            .iter()
            .map(|c| {
                let mut c = c.clone();
                c.is_alive = true;
                (c.id, c)
            })
            .collect();
        Self { alive, dead: BTreeMap::new() }
    }

    pub fn alive_count(&self) -> usize {
        self.alive.len()
    }

    pub fn dead_count(&self) -> usize {
        self.dead.len()
    }

    pub fn total(&self) -> usize {
        self.alive.len() + self.dead.len()
    }

    pub fn alive_ids(&self) -> Vec<CharacterId> {
        self.alive.keys().copied().collect()
    }

    pub fn dead_ids(&self) -> Vec<CharacterId> {
        self.dead.keys().copied().collect()
    }

    pub fn get(&self, id: CharacterId) -> Option<&Character> {
        self.alive.get(&id).or_else(|| self.dead.get(&id))
    }

    pub fn is_alive(&self, id: CharacterId) -> bool {
        self.alive.contains_key(&id)
    }

    /// Alive → dead. `false` if the character wasn't alive.
    pub fn eliminate(&mut self, id: CharacterId) -> bool {
        match self.alive.remove(&id) {
            Some(mut c) => {
                c.is_alive = false;
                self.dead.insert(id, c);
                true
            }
            None => false,
        }
    }

    /// Dead → alive. `false` if the character wasn't dead.
    pub fn revive(&mut self, id: CharacterId) -> bool {
        match self.dead.remove(&id) {
            Some(mut c) => {
                c.is_alive = true;
                self.alive.insert(id, c);
                true
            }
            None => false,
        }
    }

    /// Sole survivor, if exactly one remains.
    pub fn last_standing(&self) -> Option<&Character> {
        if self.alive.len() == 1 {
            self.alive.values().next()
        } else {
            None
        }
    }

    pub fn characters(&self) -> impl Iterator<Item = &Character> {
        self.alive.values().chain(self.dead.values())
    }
}
