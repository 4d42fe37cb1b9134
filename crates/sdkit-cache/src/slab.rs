//! Slab-backed intrusive doubly linked lists.
//!
//! One [`Slab`] owns the entries; any number of [`ListHead`]s thread
//! through it. Slots are addressed by index so the caches can keep a
//! `key -> SlotId` map without reference counting.

/// Index of an entry inside a [`Slab`].
pub type SlotId = usize;

const NIL: usize = usize::MAX;

#[derive(Debug, Clone, Copy)]
struct Link {
    prev: usize,
    next: usize,
}

impl Link {
    const DETACHED: Link = Link {
        prev: NIL,
        next: NIL,
    };
}

/// Head/tail bookkeeping for one list threaded through a [`Slab`].
///
/// The front is the most recently used end.
#[derive(Debug, Clone, Copy)]
pub struct ListHead {
    head: usize,
    tail: usize,
    len: usize,
}

impl ListHead {
    /// An empty list.
    pub const fn new() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    /// Number of entries on the list.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the list holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for ListHead {
    fn default() -> Self {
        Self::new()
    }
}

/// Arena of entries with O(1) link/unlink against any [`ListHead`].
#[derive(Debug)]
pub struct Slab<T> {
    values: Vec<Option<T>>,
    links: Vec<Link>,
    free: Vec<SlotId>,
}

impl<T> Slab<T> {
    /// Creates an empty slab with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            links: Vec::with_capacity(capacity),
            free: Vec::new(),
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.values.len() - self.free.len()
    }

    /// True when no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores `value` and links it at the front of `list`.
    pub fn push_front(&mut self, list: &mut ListHead, value: T) -> SlotId {
        let id = match self.free.pop() {
            Some(id) => {
                self.values[id] = Some(value);
                self.links[id] = Link::DETACHED;
                id
            }
            None => {
                self.values.push(Some(value));
                self.links.push(Link::DETACHED);
                self.values.len() - 1
            }
        };
        self.link_front(list, id);
        id
    }

    /// Links a detached slot at the front of `list`.
    pub fn link_front(&mut self, list: &mut ListHead, id: SlotId) {
        self.links[id] = Link {
            prev: NIL,
            next: list.head,
        };
        if list.head != NIL {
            self.links[list.head].prev = id;
        } else {
            list.tail = id;
        }
        list.head = id;
        list.len += 1;
    }

    /// Detaches `id` from `list` without freeing the slot.
    pub fn unlink(&mut self, list: &mut ListHead, id: SlotId) {
        let Link { prev, next } = self.links[id];
        if prev != NIL {
            self.links[prev].next = next;
        } else {
            list.head = next;
        }
        if next != NIL {
            self.links[next].prev = prev;
        } else {
            list.tail = prev;
        }
        self.links[id] = Link::DETACHED;
        list.len -= 1;
    }

    /// Moves `id` to the front of the list it is already on.
    pub fn move_to_front(&mut self, list: &mut ListHead, id: SlotId) {
        if list.head == id {
            return;
        }
        self.unlink(list, id);
        self.link_front(list, id);
    }

    /// Unlinks `id` from `list` and frees its slot.
    pub fn remove(&mut self, list: &mut ListHead, id: SlotId) -> Option<T> {
        self.unlink(list, id);
        let value = self.values[id].take();
        if value.is_some() {
            self.free.push(id);
        }
        value
    }

    /// The least recently linked slot of `list`.
    pub fn back(&self, list: &ListHead) -> Option<SlotId> {
        (list.tail != NIL).then_some(list.tail)
    }

    /// Removes and returns the back entry of `list`.
    pub fn pop_back(&mut self, list: &mut ListHead) -> Option<T> {
        let id = self.back(list)?;
        self.remove(list, id)
    }

    /// Shared access to an occupied slot.
    pub fn get(&self, id: SlotId) -> Option<&T> {
        self.values.get(id).and_then(Option::as_ref)
    }

    /// Mutable access to an occupied slot.
    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        self.values.get_mut(id).and_then(Option::as_mut)
    }

    /// Iterates `list` from front (most recent) to back.
    pub fn iter<'a>(&'a self, list: &ListHead) -> impl Iterator<Item = &'a T> + 'a {
        let mut cursor = list.head;
        std::iter::from_fn(move || {
            if cursor == NIL {
                return None;
            }
            let id = cursor;
            cursor = self.links[id].next;
            self.values[id].as_ref()
        })
    }

    /// Drops every entry. All list heads threaded through this slab must be reset too.
    pub fn clear(&mut self) {
        self.values.clear();
        self.links.clear();
        self.free.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(slab: &Slab<u32>, list: &ListHead) -> Vec<u32> {
        slab.iter(list).copied().collect()
    }

    #[test]
    fn test_push_front_orders_most_recent_first() {
        let mut slab = Slab::with_capacity(4);
        let mut list = ListHead::new();
        slab.push_front(&mut list, 1);
        slab.push_front(&mut list, 2);
        slab.push_front(&mut list, 3);
        assert_eq!(collect(&slab, &list), vec![3, 2, 1]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_pop_back_returns_oldest() {
        let mut slab = Slab::with_capacity(4);
        let mut list = ListHead::new();
        slab.push_front(&mut list, 1);
        slab.push_front(&mut list, 2);
        assert_eq!(slab.pop_back(&mut list), Some(1));
        assert_eq!(slab.pop_back(&mut list), Some(2));
        assert_eq!(slab.pop_back(&mut list), None);
        assert!(list.is_empty());
        assert!(slab.is_empty());
    }

    #[test]
    fn test_move_between_lists() {
        let mut slab = Slab::with_capacity(4);
        let mut a = ListHead::new();
        let mut b = ListHead::new();
        let one = slab.push_front(&mut a, 1);
        slab.push_front(&mut a, 2);
        slab.unlink(&mut a, one);
        slab.link_front(&mut b, one);
        assert_eq!(collect(&slab, &a), vec![2]);
        assert_eq!(collect(&slab, &b), vec![1]);
    }

    #[test]
    fn test_move_to_front_refreshes_position() {
        let mut slab = Slab::with_capacity(4);
        let mut list = ListHead::new();
        let one = slab.push_front(&mut list, 1);
        slab.push_front(&mut list, 2);
        slab.push_front(&mut list, 3);
        slab.move_to_front(&mut list, one);
        assert_eq!(collect(&slab, &list), vec![1, 3, 2]);
        assert_eq!(slab.back(&list).and_then(|id| slab.get(id)), Some(&2));
    }

    #[test]
    fn test_freed_slots_are_reused() {
        let mut slab = Slab::with_capacity(2);
        let mut list = ListHead::new();
        let first = slab.push_front(&mut list, 10);
        slab.remove(&mut list, first);
        let second = slab.push_front(&mut list, 20);
        assert_eq!(first, second);
        assert_eq!(slab.get(second), Some(&20));
    }
}
