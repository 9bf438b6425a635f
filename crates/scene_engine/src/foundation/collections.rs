//! Specialized collection types

/// Free list for index-stable object storage
///
/// Indices handed out by [`insert`](FreeList::insert) stay valid until the
/// item is removed; vacated slots are recycled for later insertions. Used for
/// scene objects that other structures reference by integer index, where the
/// index must not move underneath them.
pub struct FreeList<T> {
    items: Vec<Option<T>>,
    free_indices: Vec<usize>,
    live: usize,
}

impl<T> FreeList<T> {
    /// Create a new free list
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            free_indices: Vec::new(),
            live: 0,
        }
    }

    /// Insert an item and return its index
    pub fn insert(&mut self, item: T) -> usize {
        self.live += 1;
        if let Some(index) = self.free_indices.pop() {
            self.items[index] = Some(item);
            index
        } else {
            let index = self.items.len();
            self.items.push(Some(item));
            index
        }
    }

    /// Remove an item by index
    pub fn remove(&mut self, index: usize) -> Option<T> {
        if index < self.items.len() {
            if let Some(item) = self.items[index].take() {
                self.free_indices.push(index);
                self.live -= 1;
                Some(item)
            } else {
                None
            }
        } else {
            None
        }
    }

    /// Get an item by index
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)?.as_ref()
    }

    /// Get a mutable reference to an item by index
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index)?.as_mut()
    }

    /// Number of live items
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether the list holds no live items
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterate over `(index, item)` pairs of live items
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|item| (i, item)))
    }

    /// Indices of all live items, collected up front
    ///
    /// Useful when the caller needs to mutate the list while walking it.
    pub fn indices(&self) -> Vec<usize> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| i))
            .collect()
    }
}

impl<T> Default for FreeList<T> {
    fn default() -> Self {
        Self::new()
    }
}
