//! Recency ordering for live cache slots.
//!
//! [`EvictionList`] is a doubly linked list whose nodes live in an arena
//! indexed by [`SlotId`]. Links are `Option<SlotId>` instead of pointers,
//! so there are no ownership cycles and no `unsafe`. The head is the most
//! recently used slot, the tail the least recently used.

/// Stable index of a slot in the store's arena.
pub type SlotId = usize;

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    prev: Option<SlotId>,
    next: Option<SlotId>,
    linked: bool,
}

/// MRU-to-LRU ordering over slot ids with O(1) updates.
#[derive(Debug, Default)]
pub struct EvictionList {
    links: Vec<Link>,
    head: Option<SlotId>,
    tail: Option<SlotId>,
    len: usize,
}

impl EvictionList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of linked slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Most recently used slot.
    #[must_use]
    pub fn front(&self) -> Option<SlotId> {
        self.head
    }

    /// Least recently used slot, the next eviction candidate.
    #[must_use]
    pub fn back(&self) -> Option<SlotId> {
        self.tail
    }

    #[must_use]
    pub fn contains(&self, id: SlotId) -> bool {
        self.links.get(id).is_some_and(|l| l.linked)
    }

    /// Links `id` at the front. Does nothing if it is already linked.
    pub fn push_front(&mut self, id: SlotId) {
        if self.contains(id) {
            self.move_to_front(id);
            return;
        }
        if id >= self.links.len() {
            self.links.resize(id + 1, Link::default());
        }
        self.links[id] = Link {
            prev: None,
            next: self.head,
            linked: true,
        };
        match self.head {
            Some(old) => self.links[old].prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.len += 1;
    }

    /// Marks `id` as most recently used. No-op when it is already the head
    /// or not linked at all.
    pub fn move_to_front(&mut self, id: SlotId) {
        if self.head == Some(id) || !self.contains(id) {
            return;
        }
        self.unlink(id);
        self.push_front(id);
    }

    /// Detaches and returns the least recently used slot.
    pub fn pop_back(&mut self) -> Option<SlotId> {
        let id = self.tail?;
        self.unlink(id);
        Some(id)
    }

    /// Detaches `id` wherever it sits. Returns `false` if it was not linked.
    pub fn remove(&mut self, id: SlotId) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.unlink(id);
        true
    }

    fn unlink(&mut self, id: SlotId) {
        let Link { prev, next, .. } = self.links[id];
        match prev {
            Some(p) => self.links[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.links[n].prev = prev,
            None => self.tail = prev,
        }
        self.links[id] = Link::default();
        self.len -= 1;
    }

    /// Iterates slot ids from most to least recently used.
    pub fn iter(&self) -> impl Iterator<Item = SlotId> + '_ {
        std::iter::successors(self.head, move |&id| self.links[id].next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(list: &EvictionList) -> Vec<SlotId> {
        list.iter().collect()
    }

    #[test]
    fn push_front_into_empty_list() {
        let mut list = EvictionList::new();
        list.push_front(3);
        assert_eq!(list.len(), 1);
        assert_eq!(list.front(), Some(3));
        assert_eq!(list.back(), Some(3));
    }

    #[test]
    fn push_front_orders_mru_first() {
        let mut list = EvictionList::new();
        list.push_front(0);
        list.push_front(1);
        list.push_front(2);
        assert_eq!(order(&list), vec![2, 1, 0]);
        assert_eq!(list.back(), Some(0));
    }

    #[test]
    fn move_to_front_from_tail_and_middle() {
        let mut list = EvictionList::new();
        for id in 0..4 {
            list.push_front(id);
        }
        list.move_to_front(0);
        assert_eq!(order(&list), vec![0, 3, 2, 1]);
        list.move_to_front(2);
        assert_eq!(order(&list), vec![2, 0, 3, 1]);
        assert_eq!(list.back(), Some(1));
        assert_eq!(list.len(), 4);
    }

    #[test]
    fn move_to_front_of_head_is_noop() {
        let mut list = EvictionList::new();
        list.push_front(0);
        list.push_front(1);
        list.move_to_front(1);
        assert_eq!(order(&list), vec![1, 0]);
    }

    #[test]
    fn move_to_front_of_unlinked_is_noop() {
        let mut list = EvictionList::new();
        list.push_front(0);
        list.move_to_front(9);
        assert_eq!(order(&list), vec![0]);
        assert!(!list.contains(9));
    }

    #[test]
    fn pop_back_drains_in_lru_order() {
        let mut list = EvictionList::new();
        list.push_front(5);
        list.push_front(6);
        list.push_front(7);
        assert_eq!(list.pop_back(), Some(5));
        assert_eq!(list.pop_back(), Some(6));
        assert_eq!(list.pop_back(), Some(7));
        assert_eq!(list.pop_back(), None);
        assert!(list.is_empty());
        assert_eq!(list.front(), None);
    }

    #[test]
    fn pushing_a_linked_id_does_not_duplicate() {
        let mut list = EvictionList::new();
        list.push_front(0);
        list.push_front(1);
        list.push_front(0);
        assert_eq!(order(&list), vec![0, 1]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn remove_middle_relinks_neighbours() {
        let mut list = EvictionList::new();
        for id in 0..3 {
            list.push_front(id);
        }
        assert!(list.remove(1));
        assert!(!list.remove(1));
        assert_eq!(order(&list), vec![2, 0]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn relinking_after_pop_works() {
        let mut list = EvictionList::new();
        list.push_front(0);
        list.push_front(1);
        let evicted = list.pop_back().unwrap();
        list.push_front(evicted);
        assert_eq!(order(&list), vec![0, 1]);
    }
}
