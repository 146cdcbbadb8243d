//! Generational handles over a [`Slab`].
//!
//! Slab keys are reused as soon as an entry is removed. Every entry is
//! stamped with the generation it was inserted under, so a handle kept past
//! removal carries a stale generation and is rejected.

use std::fmt;

use slab::Slab;

/// Handle to an entry of an [`Arena`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Index {
    slot: u32,
    generation: u32,
}

impl Index {
    pub fn slot(&self) -> usize {
        self.slot as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.slot, self.generation)
    }
}

#[derive(Debug)]
pub struct Arena<T> {
    entries: Slab<(u32, T)>,
    next_generation: u32,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            entries: Slab::new(),
            next_generation: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> Index {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        let slot = self.entries.insert((generation, value));
        Index {
            slot: slot as u32,
            generation,
        }
    }

    pub fn get(&self, index: Index) -> Option<&T> {
        match self.entries.get(index.slot())? {
            (generation, value) if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, index: Index) -> Option<&mut T> {
        match self.entries.get_mut(index.slot())? {
            (generation, value) if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, index: Index) -> bool {
        self.get(index).is_some()
    }

    pub fn remove(&mut self, index: Index) -> Option<T> {
        if !self.contains(index) {
            return None;
        }
        self.entries.try_remove(index.slot()).map(|(_, value)| value)
    }

    /// The live handle currently stored in `slot`, if any.
    pub fn index_at(&self, slot: usize) -> Option<Index> {
        let (generation, _) = self.entries.get(slot)?;
        Some(Index {
            slot: slot as u32,
            generation: *generation,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Index, &T)> {
        self.entries.iter().map(|(slot, (generation, value))| {
            (
                Index {
                    slot: slot as u32,
                    generation: *generation,
                },
                value,
            )
        })
    }

    /// Removes every entry, returning them in slot order.
    pub fn drain(&mut self) -> Vec<(Index, T)> {
        std::mem::take(&mut self.entries)
            .into_iter()
            .map(|(slot, (generation, value))| {
                (
                    Index {
                        slot: slot as u32,
                        generation,
                    },
                    value,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.remove(a), None);
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_reused_slot_rejects_stale_handle() {
        let mut arena = Arena::new();
        let first = arena.insert(1);
        arena.remove(first);
        let second = arena.insert(2);
        assert_eq!(first.slot(), second.slot());
        assert_ne!(first, second);
        assert!(!arena.contains(first));
        assert_eq!(arena.get_mut(second), Some(&mut 2));
        assert_eq!(arena.index_at(second.slot()), Some(second));
    }

    #[test]
    fn test_drain() {
        let mut arena = Arena::new();
        let a = arena.insert('a');
        let b = arena.insert('b');
        let c = arena.insert('c');
        arena.remove(b);
        let drained = arena.drain();
        assert_eq!(drained, vec![(a, 'a'), (c, 'c')]);
        assert!(arena.is_empty());
        assert_eq!(arena.iter().count(), 0);

        // Handles from before the drain stay dead once slots are reused.
        let d = arena.insert('d');
        assert_eq!(d.slot(), a.slot());
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(d), Some(&'d'));
    }
}
