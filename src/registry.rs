// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Watcher storage: a slab of slots addressed by generational handles.
//!
//! The slab reuses indices aggressively, so a bare index would be ambiguous
//! the moment a callback removes one watcher and registers another. Each slot
//! index carries a generation that is bumped on removal; a handle resolves
//! only while its generation matches.

use crate::{handle::WatcherHandle, watcher::Watcher};
use slab::Slab;

#[derive(Default)]
pub(crate) struct WatcherRegistry {
    slots: Slab<Watcher>,
    /// Generation per slot index, parallel to `slots`. Never shrinks.
    generations: Vec<u32>,
}

impl WatcherRegistry {
    pub fn insert(&mut self, watcher: Watcher) -> WatcherHandle {
        let index = self.slots.insert(watcher);
        if index >= self.generations.len() {
            self.generations.resize(index + 1, 0);
        }
        WatcherHandle {
            index: index as u32,
            generation: self.generations[index],
        }
    }

    pub fn get(&self, handle: WatcherHandle) -> Option<&Watcher> {
        let index = handle.index as usize;
        if self.generations.get(index) != Some(&handle.generation) {
            return None;
        }
        self.slots.get(index)
    }

    pub fn get_mut(&mut self, handle: WatcherHandle) -> Option<&mut Watcher> {
        let index = handle.index as usize;
        if self.generations.get(index) != Some(&handle.generation) {
            return None;
        }
        self.slots.get_mut(index)
    }

    /// Frees the slot and invalidates the handle (and any copies of it).
    pub fn remove(&mut self, handle: WatcherHandle) -> Option<Watcher> {
        let index = handle.index as usize;
        if self.generations.get(index) != Some(&handle.generation) {
            return None;
        }
        let watcher = self.slots.try_remove(index)?;
        self.generations[index] = self.generations[index].wrapping_add(1);
        Some(watcher)
    }

    /// Snapshot of all live handles. Used by passes that invoke callbacks,
    /// which may mutate the registry mid-iteration.
    pub fn handles(&self) -> Vec<WatcherHandle> {
        self.slots
            .iter()
            .map(|(index, _)| WatcherHandle {
                index: index as u32,
                generation: self.generations[index],
            })
            .collect()
    }

    /// True while at least one watcher is registered or pseudo-registered.
    /// The run loop terminates when this goes false.
    pub fn has_enlisted(&self) -> bool {
        self.slots.iter().any(|(_, w)| w.is_enlisted())
    }
}
