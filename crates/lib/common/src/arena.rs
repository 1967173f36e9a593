// Copyright (C) 2023 gigablaster

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::{
    fmt::{Debug, Display},
    hash::Hash,
    marker::PhantomData,
};

const DEFAULT_SPACE: usize = 256;
const GENERATION_BITS: u32 = 14;
const INDEX_BITS: u32 = 32 - GENERATION_BITS;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: u32 = u32::MAX - INDEX_MASK;
const MAX_INDEX: u32 = (1 << INDEX_BITS) - 1;
const MAX_GENERATION: u32 = 1 << GENERATION_BITS;

/// Generation-checked reference into an [`Arena`].
///
/// Index and generation are packed into a single word, so handles are cheap to copy
/// and to embed into recorded commands. A handle outlives the object it points to
/// safely: once the slot is freed every lookup through the old handle fails.
#[derive(Debug)]
pub struct Handle<T> {
    data: u32,
    _phantom: PhantomData<fn() -> T>,
}

#[allow(clippy::non_canonical_clone_impl)]
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data,
            _phantom: PhantomData,
        }
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.data.cmp(&other.data)
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.data.hash(state);
    }
}

impl<T> Handle<T> {
    pub fn new(index: u32, generation: u32) -> Self {
        assert!(index < MAX_INDEX);
        assert!(generation < MAX_GENERATION);
        Self {
            data: (generation << INDEX_BITS) | index,
            _phantom: PhantomData,
        }
    }

    pub fn invalid() -> Self {
        Self {
            data: u32::MAX,
            _phantom: PhantomData,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.data != u32::MAX
    }

    pub fn index(&self) -> u32 {
        self.data & INDEX_MASK
    }

    pub fn generation(&self) -> u32 {
        (self.data & GENERATION_MASK) >> INDEX_BITS
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::invalid()
    }
}

impl<T> Display for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "(idx: {} gen: {})", self.index(), self.generation())
        } else {
            write!(f, "(null)")
        }
    }
}

impl<T> From<Handle<T>> for u32 {
    fn from(value: Handle<T>) -> Self {
        value.data
    }
}

impl<T> From<u32> for Handle<T> {
    fn from(value: u32) -> Self {
        Handle {
            data: value,
            _phantom: PhantomData,
        }
    }
}

/// Slot storage addressed by [`Handle`].
///
/// Freed slots are reused, each reuse bumps the slot generation. A slot whose generation
/// would wrap is retired for good, so a stale handle never matches a later value.
#[derive(Debug)]
pub struct Arena<T> {
    data: Vec<Option<T>>,
    generations: Vec<u32>,
    empty: Vec<u32>,
    retired: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(DEFAULT_SPACE),
            generations: Vec::with_capacity(DEFAULT_SPACE),
            empty: Vec::new(),
            retired: 0,
        }
    }

    fn release(&mut self, index: usize) {
        let generation = self.generations[index] + 1;
        if generation < MAX_GENERATION {
            self.generations[index] = generation;
            self.empty.push(index as _);
        } else {
            self.retired += 1;
        }
    }

    pub fn push(&mut self, value: T) -> Handle<T> {
        if let Some(slot) = self.empty.pop() {
            self.data[slot as usize] = Some(value);
            Handle::new(slot, self.generations[slot as usize])
        } else {
            let index = self.generations.len();
            if index as u32 >= MAX_INDEX {
                panic!("Too many items in arena.");
            }
            self.generations.push(0);
            self.data.push(Some(value));
            Handle::new(index as u32, 0)
        }
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        if self.contains(handle) {
            self.data[handle.index() as usize].as_ref()
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        if self.contains(handle) {
            self.data[handle.index() as usize].as_mut()
        } else {
            None
        }
    }

    pub fn replace(&mut self, handle: Handle<T>, value: T) -> Option<T> {
        if self.contains(handle) {
            self.data[handle.index() as usize].replace(value)
        } else {
            None
        }
    }

    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        if !self.contains(handle) {
            return None;
        }
        let index = handle.index() as usize;
        self.release(index);

        self.data[index].take()
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        let index = handle.index() as usize;
        handle.is_valid()
            && index < self.generations.len()
            && self.generations[index] == handle.generation()
            && self.data[index].is_some()
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.empty.len() - self.retired
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter().filter_map(Option::as_ref)
    }

    pub fn enumerate(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.data
            .iter()
            .zip(self.generations.iter())
            .enumerate()
            .filter_map(|(index, (value, generation))| {
                value
                    .as_ref()
                    .map(|value| (Handle::new(index as u32, *generation), value))
            })
    }

    /// Keeps the values `keep` accepts, removes the rest and hands them back.
    pub fn retain_extract<F: FnMut(&T) -> bool>(&mut self, mut keep: F) -> Vec<T> {
        let mut removed = Vec::new();
        for index in 0..self.data.len() {
            if matches!(&self.data[index], Some(value) if !keep(value)) {
                self.release(index);
                removed.extend(self.data[index].take());
            }
        }

        removed
    }

    pub fn drain(&mut self) -> impl Iterator<Item = T> {
        let mut drained = Vec::with_capacity(self.len());
        for index in 0..self.data.len() {
            if let Some(value) = self.data[index].take() {
                self.release(index);
                drained.push(value);
            }
        }

        drained.into_iter()
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::MAX_GENERATION;
    use crate::{Arena, Handle};

    #[test]
    fn handle() {
        let handle = Handle::<()>::new(100, 10);
        assert_eq!(100, handle.index());
        assert_eq!(10, handle.generation());
        assert!(handle.is_valid());
        assert!(!Handle::<()>::invalid().is_valid());
    }

    #[test]
    fn push_get() {
        let mut arena = Arena::<u32>::new();
        let handle1 = arena.push(1);
        let handle2 = arena.push(2);
        let handle3 = arena.push(3);
        assert_eq!(Some(&1), arena.get(handle1));
        assert_eq!(Some(&2), arena.get(handle2));
        assert_eq!(Some(&3), arena.get(handle3));
        assert_eq!(3, arena.len());
    }

    #[test]
    fn reuse_slot() {
        let mut arena = Arena::<u32>::new();
        let handle = arena.push(1);
        arena.remove(handle);
        let handle = arena.push(2);
        assert_eq!(1, handle.generation());
        assert_eq!(0, handle.index());
        assert_eq!(Some(&2), arena.get(handle));
    }

    #[test]
    fn stale_handle_returns_none() {
        let mut arena = Arena::<u32>::new();
        let handle1 = arena.push(1);
        assert_eq!(Some(1), arena.remove(handle1));
        assert_eq!(None, arena.remove(handle1));
        let handle2 = arena.push(2);
        assert_eq!(None, arena.get(handle1));
        assert_eq!(Some(&2), arena.get(handle2));
    }

    #[test]
    fn invalid_handle_returns_none() {
        let mut arena = Arena::<u32>::new();
        arena.push(1);
        assert_eq!(None, arena.get(Handle::invalid()));
    }

    #[test]
    fn mutate_by_handle() {
        let mut arena = Arena::<u32>::new();
        let handle = arena.push(1);
        assert_eq!(Some(1), arena.replace(handle, 2));
        assert_eq!(Some(&2), arena.get(handle));
        *arena.get_mut(handle).unwrap() = 3;
        assert_eq!(Some(&3), arena.get(handle));
    }

    #[test]
    fn iterate_hole() {
        let mut arena = Arena::<u32>::new();
        arena.push(1);
        let handle = arena.push(2);
        let last = arena.push(3);
        arena.remove(handle);
        assert_eq!(vec![1, 3], arena.iter().copied().collect::<Vec<_>>());
        let handles = arena.enumerate().map(|(handle, _)| handle).collect::<Vec<_>>();
        assert_eq!(last, handles[1]);
    }

    #[test]
    fn retain_extract() {
        let mut arena = Arena::<u32>::new();
        let one = arena.push(1);
        let two = arena.push(2);
        let three = arena.push(3);
        assert_eq!(vec![2], arena.retain_extract(|value| *value != 2));
        assert!(arena.contains(one));
        assert!(!arena.contains(two));
        assert!(arena.contains(three));
    }

    #[test]
    fn drain() {
        let mut arena = Arena::<u32>::new();
        let handle = arena.push(1);
        arena.push(2);
        arena.push(3);

        let drained = arena.drain().collect::<Vec<_>>();
        assert_eq!(vec![1u32, 2, 3], drained);
        assert!(arena.is_empty());
        assert_eq!(None, arena.get(handle));
    }

    #[test]
    fn worn_out_slot_is_retired() {
        let mut arena = Arena::<u32>::new();
        let first = arena.push(0);
        let mut handle = first;
        for value in 1..MAX_GENERATION {
            arena.remove(handle);
            handle = arena.push(value);
            assert_eq!(0, handle.index());
        }
        assert_eq!(MAX_GENERATION - 1, handle.generation());

        arena.remove(handle);
        assert!(arena.is_empty());
        let fresh = arena.push(7);
        assert_eq!(1, fresh.index());
        assert!(!arena.contains(first));
        assert!(!arena.contains(handle));
        assert_eq!(1, arena.len());
    }
}
