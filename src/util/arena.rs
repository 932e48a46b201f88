//! A generational arena. Removing an element bumps the generation of its slot, so handles to removed
//! elements are detected instead of silently referring to whatever is stored in the slot next.

use std::fmt::Formatter;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Handle to an element in an [`Arena`].
pub struct Handle<T> {
    index: usize,
    generation: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Index of the slot this handle refers to
    pub fn index(&self) -> usize {
        self.index
    }

    /// Generation of the slot at the time the element was inserted
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u64,
    value: Option<T>,
}

/// Stores elements addressed by generation-checked [`Handle`]s. Iteration order is slot order.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            slots: vec![],
            free: vec![],
            len: 0,
        }
    }
}

impl<T> Arena<T> {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an element, reusing a free slot if there is one.
    pub fn insert(&mut self, value: T) -> Handle<T> {
        self.len += 1;
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index].value = Some(value);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: Some(value),
                });
                self.slots.len() - 1
            }
        };
        Handle {
            index,
            generation: self.slots[index].generation,
            _marker: PhantomData,
        }
    }

    /// Remove an element. Returns `None` if the handle is stale.
    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        let slot = self.slots.get_mut(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation += 1;
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    /// Get a reference to an element, or `None` if the handle is stale.
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Get a mutable reference to an element, or `None` if the handle is stale.
    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Number of live elements
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if there are no live elements
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate over all live elements and their handles
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    Handle {
                        index,
                        generation: slot.generation,
                        _marker: PhantomData,
                    },
                    value,
                )
            })
        })
    }

    /// Iterate mutably over all live elements
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(|slot| slot.value.as_mut())
    }

    /// Remove all elements. Handles given out before stay stale forever.
    pub fn drain(&mut self) -> Vec<T> {
        let mut values = Vec::with_capacity(self.len);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                slot.generation += 1;
                self.free.push(index);
                values.push(value);
            }
        }
        self.len = 0;
        values
    }
}
