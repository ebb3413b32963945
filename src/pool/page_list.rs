//! Intrusive doubly-linked lists of pages.
//!
//! Links live in the [`PageDirectory`]; a [`PageList`] only holds head,
//! tail and count, so every operation is O(1) and allocation-free. A page
//! is on at most one list at a time.

use crate::common::Handle;
use crate::pool::page_directory::PageDirectory;

/// Head/tail/count of a list threaded through the page directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageList {
    head: Handle,
    tail: Handle,
    count: u32,
}

impl PageList {
    pub const fn new() -> Self {
        Self {
            head: Handle::NIL,
            tail: Handle::NIL,
            count: 0,
        }
    }

    #[inline]
    pub fn head(&self) -> Handle {
        self.head
    }

    #[inline]
    pub fn tail(&self) -> Handle {
        self.tail
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append every page of `src` after this list's tail and empty `src`.
    pub fn move_all(&mut self, dir: &mut PageDirectory, src: &mut PageList) {
        if src.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = *src;
        } else {
            dir.entry_mut(self.tail).next = src.head;
            dir.entry_mut(src.head).prev = self.tail;
            self.tail = src.tail;
            self.count += src.count;
        }
        *src = PageList::new();
    }

    fn singleton(dir: &mut PageDirectory, page: Handle) -> PageList {
        let entry = dir.entry_mut(page);
        entry.prev = Handle::NIL;
        entry.next = Handle::NIL;
        PageList {
            head: page,
            tail: page,
            count: 1,
        }
    }

    pub fn add_head(&mut self, dir: &mut PageDirectory, page: Handle) {
        let mut list = Self::singleton(dir, page);
        list.move_all(dir, self);
        *self = list;
    }

    pub fn add_tail(&mut self, dir: &mut PageDirectory, page: Handle) {
        let mut list = Self::singleton(dir, page);
        self.move_all(dir, &mut list);
    }

    /// Splice `page` out of this list. The page must be on it.
    pub fn remove(&mut self, dir: &mut PageDirectory, page: Handle) {
        debug_assert!(self.count > 0, "remove from empty page list");
        let (prev, next) = {
            let entry = dir.entry(page);
            (entry.prev, entry.next)
        };

        if prev.is_valid() {
            dir.entry_mut(prev).next = next;
        } else {
            debug_assert_eq!(self.head, page, "page is not on this list");
            self.head = next;
        }
        if next.is_valid() {
            dir.entry_mut(next).prev = prev;
        } else {
            debug_assert_eq!(self.tail, page, "page is not on this list");
            self.tail = prev;
        }

        let entry = dir.entry_mut(page);
        entry.prev = Handle::NIL;
        entry.next = Handle::NIL;
        self.count -= 1;
    }

    pub fn pop_head(&mut self, dir: &mut PageDirectory) -> Option<Handle> {
        let page = self.head;
        if page.is_nil() {
            return None;
        }
        self.remove(dir, page);
        Some(page)
    }

    /// Walk the list head to tail.
    pub fn iter<'a>(&self, dir: &'a PageDirectory) -> PageListIter<'a> {
        PageListIter {
            dir,
            next: self.head,
            remaining: self.count,
        }
    }

    /// Check that head→tail visits exactly `count` pages with consistent
    /// prev/next links.
    pub fn verify(&self, dir: &PageDirectory) -> bool {
        let mut seen = 0u32;
        let mut prev = Handle::NIL;
        let mut cur = self.head;

        while cur.is_valid() {
            if seen >= self.count {
                return false;
            }
            let entry = dir.entry(cur);
            if entry.prev != prev {
                return false;
            }
            prev = cur;
            cur = entry.next;
            seen += 1;
        }

        seen == self.count && self.tail == prev
    }
}

impl Default for PageList {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the pages of a [`PageList`].
pub struct PageListIter<'a> {
    dir: &'a PageDirectory,
    next: Handle,
    remaining: u32,
}

impl Iterator for PageListIter<'_> {
    type Item = Handle;

    fn next(&mut self) -> Option<Handle> {
        // `remaining` bounds the walk even if links are corrupt.
        if self.next.is_nil() || self.remaining == 0 {
            return None;
        }
        let page = self.next;
        self.next = self.dir.entry(page).next;
        self.remaining -= 1;
        Some(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::HandleCodec;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    fn setup() -> (HandleCodec, PageDirectory) {
        let codec = HandleCodec::new(6, 4096);
        let dir = PageDirectory::new(&codec).unwrap();
        (codec, dir)
    }

    fn pages(list: &PageList, dir: &PageDirectory) -> Vec<Handle> {
        list.iter(dir).collect()
    }

    #[test]
    fn test_add_head_and_tail() {
        let (codec, mut dir) = setup();
        let (a, b, c) = (codec.encode(0, 0), codec.encode(1, 0), codec.encode(2, 0));
        let mut list = PageList::new();

        list.add_tail(&mut dir, b);
        list.add_head(&mut dir, a);
        list.add_tail(&mut dir, c);

        assert_eq!(list.len(), 3);
        assert_eq!(list.head(), a);
        assert_eq!(list.tail(), c);
        assert_eq!(pages(&list, &dir), vec![a, b, c]);
        assert!(list.verify(&dir));
    }

    #[test]
    fn test_remove_middle_head_tail() {
        let (codec, mut dir) = setup();
        let ps: Vec<Handle> = (0..4).map(|i| codec.encode(i, 0)).collect();
        let mut list = PageList::new();
        for &p in &ps {
            list.add_tail(&mut dir, p);
        }

        list.remove(&mut dir, ps[1]);
        assert_eq!(pages(&list, &dir), vec![ps[0], ps[2], ps[3]]);
        list.remove(&mut dir, ps[0]);
        list.remove(&mut dir, ps[3]);
        assert_eq!(pages(&list, &dir), vec![ps[2]]);
        assert!(list.verify(&dir));

        assert_eq!(list.pop_head(&mut dir), Some(ps[2]));
        assert!(list.is_empty());
        assert_eq!(list.head(), Handle::NIL);
        assert_eq!(list.tail(), Handle::NIL);
        assert_eq!(list.pop_head(&mut dir), None);
    }

    #[test]
    fn test_move_all() {
        let (codec, mut dir) = setup();
        let mut dst = PageList::new();
        let mut src = PageList::new();

        // Empty into empty.
        dst.move_all(&mut dir, &mut src);
        assert!(dst.is_empty());

        src.add_tail(&mut dir, codec.encode(4, 0));
        src.add_tail(&mut dir, codec.encode(5, 0));
        dst.move_all(&mut dir, &mut src);
        assert!(src.is_empty());
        assert_eq!(dst.len(), 2);

        src.add_tail(&mut dir, codec.encode(-3, 0));
        dst.move_all(&mut dir, &mut src);
        assert_eq!(
            pages(&dst, &dir),
            vec![codec.encode(4, 0), codec.encode(5, 0), codec.encode(-3, 0)]
        );
        assert!(dst.verify(&dir));
        assert!(src.verify(&dir));
    }

    #[test]
    fn test_verify_detects_bad_count() {
        let (codec, mut dir) = setup();
        let mut list = PageList::new();
        list.add_tail(&mut dir, codec.encode(0, 0));
        list.add_tail(&mut dir, codec.encode(1, 0));

        let mut broken = list;
        broken.count = 3;
        assert!(!broken.verify(&dir));

        dir.entry_mut(codec.encode(1, 0)).prev = Handle::NIL;
        assert!(!list.verify(&dir));
    }

    #[derive(Debug, Clone)]
    enum Op {
        AddHead(i32),
        AddTail(i32),
        Remove(usize),
        PopHead,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0i32..16).prop_map(Op::AddHead),
            (0i32..16).prop_map(Op::AddTail),
            any::<usize>().prop_map(Op::Remove),
            Just(Op::PopHead),
        ]
    }

    proptest! {
        #[test]
        fn prop_list_matches_model(ops in prop::collection::vec(op(), 0..64)) {
            let (codec, mut dir) = setup();
            let mut list = PageList::new();
            let mut model: VecDeque<Handle> = VecDeque::new();

            for op in ops {
                match op {
                    Op::AddHead(p) | Op::AddTail(p) => {
                        let page = codec.encode(p, 0);
                        if model.contains(&page) {
                            continue;
                        }
                        if matches!(op, Op::AddHead(_)) {
                            list.add_head(&mut dir, page);
                            model.push_front(page);
                        } else {
                            list.add_tail(&mut dir, page);
                            model.push_back(page);
                        }
                    }
                    Op::Remove(i) => {
                        if model.is_empty() {
                            continue;
                        }
                        let page = model.remove(i % model.len()).unwrap();
                        list.remove(&mut dir, page);
                    }
                    Op::PopHead => {
                        prop_assert_eq!(list.pop_head(&mut dir), model.pop_front());
                    }
                }
                prop_assert!(list.verify(&dir));
                prop_assert_eq!(list.len() as usize, model.len());
            }

            let walked: Vec<Handle> = list.iter(&dir).collect();
            prop_assert_eq!(walked, model.into_iter().collect::<Vec<_>>());
        }
    }
}
