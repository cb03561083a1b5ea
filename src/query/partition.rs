//! Merging results of partitioned-vertex representatives.
//!
//! A partitioned vertex spreads its relations over several representative rows. Each
//! representative returns a sorted stream; [`KWayMerge`] interleaves them lazily so
//! callers can stop as soon as their limit is reached.

use std::cmp::Ordering;

use crate::types::VertexId;

struct HeapEntry<T> {
    item: T,
    stream_idx: usize,
}

/// Lazy k-way merge of sorted iterators under comparator `F`.
///
/// Equal items keep stream order, so the merge is stable across representatives.
pub struct KWayMerge<I: Iterator, F: Fn(&I::Item, &I::Item) -> Ordering> {
    heap: Vec<HeapEntry<I::Item>>,
    streams: Vec<I>,
    cmp: F,
}

impl<I: Iterator, F: Fn(&I::Item, &I::Item) -> Ordering> KWayMerge<I, F> {
    /// Seeds the heap with the head of every non-empty stream.
    pub fn new(streams: impl IntoIterator<Item = I>, cmp: F) -> Self {
        let mut streams: Vec<I> = streams.into_iter().collect();
        let mut heap = Vec::with_capacity(streams.len());
        for (idx, stream) in streams.iter_mut().enumerate() {
            if let Some(item) = stream.next() {
                heap.push(HeapEntry {
                    item,
                    stream_idx: idx,
                });
            }
        }
        let mut me = Self { heap, streams, cmp };
        if me.heap.len() > 1 {
            let last_internal = (me.heap.len() / 2).saturating_sub(1);
            for i in (0..=last_internal).rev() {
                me.sift_down(i);
            }
        }
        me
    }

    #[inline]
    fn heap_less(&self, i: usize, j: usize) -> bool {
        match (self.cmp)(&self.heap[i].item, &self.heap[j].item) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => self.heap[i].stream_idx < self.heap[j].stream_idx,
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut smallest = left;
            if right < len && self.heap_less(right, left) {
                smallest = right;
            }
            if !self.heap_less(smallest, pos) {
                break;
            }
            self.heap.swap(pos, smallest);
            pos = smallest;
        }
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.heap_less(pos, parent) {
                break;
            }
            self.heap.swap(pos, parent);
            pos = parent;
        }
    }

    fn heap_pop(&mut self) -> Option<HeapEntry<I::Item>> {
        if self.heap.is_empty() {
            return None;
        }
        let entry = self.heap.swap_remove(0);
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Some(entry)
    }

    fn heap_push(&mut self, entry: HeapEntry<I::Item>) {
        self.heap.push(entry);
        let pos = self.heap.len() - 1;
        self.sift_up(pos);
    }
}

impl<I: Iterator, F: Fn(&I::Item, &I::Item) -> Ordering> Iterator for KWayMerge<I, F> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        let HeapEntry { item, stream_idx } = self.heap_pop()?;
        if let Some(next) = self.streams[stream_idx].next() {
            self.heap_push(HeapEntry {
                item: next,
                stream_idx,
            });
        }
        Some(item)
    }
}

/// Vertex ids returned by a query, with a flag recording whether they are sorted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VertexList {
    ids: Vec<VertexId>,
    sorted: bool,
}

impl VertexList {
    /// An empty, sorted list.
    pub fn new() -> Self {
        Self {
            ids: Vec::new(),
            sorted: true,
        }
    }

    /// Wraps `ids`, detecting whether they are already sorted.
    pub fn from_ids(ids: Vec<VertexId>) -> Self {
        let sorted = ids.windows(2).all(|w| w[0] <= w[1]);
        Self { ids, sorted }
    }

    /// Appends `id`; the list stays sorted only if `id` is not smaller than the last.
    pub fn add(&mut self, id: VertexId) {
        if self.ids.last().is_some_and(|last| *last > id) {
            self.sorted = false;
        }
        self.ids.push(id);
    }

    /// Appends every id of `other`.
    pub fn add_all(&mut self, other: &VertexList) {
        for id in &other.ids {
            self.add(*id);
        }
    }

    /// Sorts the ids in place.
    pub fn sort(&mut self) {
        if !self.sorted {
            self.ids.sort_unstable();
            self.sorted = true;
        }
    }

    /// Copy of the ids in `from..to`, clamped to the list.
    pub fn sub_list(&self, from: usize, to: usize) -> VertexList {
        let to = to.min(self.ids.len());
        let from = from.min(to);
        VertexList {
            ids: self.ids[from..to].to_vec(),
            sorted: self.sorted,
        }
    }

    /// Keeps the first `len` ids.
    pub fn truncate(&mut self, len: usize) {
        self.ids.truncate(len);
    }

    /// Returns true if the ids are in ascending order.
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// The ids.
    pub fn ids(&self) -> &[VertexId] {
        &self.ids
    }

    /// Number of ids.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true without ids.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterates the ids.
    pub fn iter(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.ids.iter().copied()
    }
}

impl FromIterator<VertexId> for VertexList {
    fn from_iter<T: IntoIterator<Item = VertexId>>(iter: T) -> Self {
        let mut list = VertexList::new();
        for id in iter {
            list.add(id);
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_interleaves_sorted_streams() {
        let merged: Vec<u32> = KWayMerge::new(
            vec![vec![1, 4, 9].into_iter(), vec![2, 3, 10].into_iter(), vec![].into_iter()],
            |a: &u32, b: &u32| a.cmp(b),
        )
        .collect();
        assert_eq!(merged, vec![1, 2, 3, 4, 9, 10]);
    }

    #[test]
    fn merge_is_stable_and_lazy() {
        let merged: Vec<(u32, char)> = KWayMerge::new(
            vec![
                vec![(1, 'a'), (2, 'a')].into_iter(),
                vec![(1, 'b'), (2, 'b')].into_iter(),
            ],
            |a: &(u32, char), b: &(u32, char)| a.0.cmp(&b.0),
        )
        .take(3)
        .collect();
        assert_eq!(merged, vec![(1, 'a'), (1, 'b'), (2, 'a')]);
    }

    #[test]
    fn descending_comparator_merges_descending() {
        let merged: Vec<u32> = KWayMerge::new(
            vec![vec![9, 3].into_iter(), vec![8, 7, 1].into_iter()],
            |a: &u32, b: &u32| b.cmp(a),
        )
        .collect();
        assert_eq!(merged, vec![9, 8, 7, 3, 1]);
    }

    #[test]
    fn vertex_list_tracks_sortedness() {
        let mut list: VertexList = [VertexId(1), VertexId(3)].into_iter().collect();
        assert!(list.is_sorted());
        list.add(VertexId(2));
        assert!(!list.is_sorted());
        list.sort();
        assert_eq!(list.ids(), &[VertexId(1), VertexId(2), VertexId(3)]);
        assert_eq!(list.sub_list(1, 10).ids(), &[VertexId(2), VertexId(3)]);
        let mut other = VertexList::new();
        other.add_all(&list);
        assert_eq!(other.len(), 3);
    }
}
