// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A binary heap ordered by a caller-supplied comparison.
//!
//! `std::collections::BinaryHeap` needs `Ord` on the element type, which does
//! not fit entries whose priority is defined by scheduler policy. This queue
//! takes an `is_higher_priority(a, b)` function instead and additionally
//! supports removing an arbitrary element, which the load queue needs to
//! re-sort an entry whose urgency changed.

/// A max-heap where "max" is defined by `is_higher_priority`.
///
/// The comparison must be a strict ordering (irreflexive, transitive) for pop
/// order to be deterministic.
pub struct PriorityQueue<T, F>
where
    F: Fn(&T, &T) -> bool,
{
    heap: Vec<T>,
    is_higher_priority: F,
}

impl<T, F> PriorityQueue<T, F>
where
    F: Fn(&T, &T) -> bool,
{
    /// Creates an empty queue ordered by `is_higher_priority`.
    pub fn new(is_higher_priority: F) -> Self {
        Self {
            heap: Vec::new(),
            is_higher_priority,
        }
    }

    /// The number of queued elements.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns `true` if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Returns the highest-priority element without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.heap.first()
    }

    /// Inserts an element.
    pub fn push(&mut self, value: T) {
        self.heap.push(value);
        self.sift_up(self.heap.len() - 1);
    }

    /// Removes and returns the highest-priority element.
    #[cfg(test)]
    fn pop(&mut self) -> Option<T> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let top = self.heap.pop();
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        top
    }

    /// Removes the first element matching `predicate`, in heap order.
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&T) -> bool) -> Option<T> {
        let index = self.heap.iter().position(|value| predicate(value))?;
        let last = self.heap.len() - 1;
        self.heap.swap(index, last);
        let removed = self.heap.pop();
        if index < self.heap.len() {
            // The element moved into `index` may belong above or below it.
            self.sift_up(index);
            self.sift_down(index);
        }
        removed
    }

    /// Returns `true` if any element matches `predicate`.
    pub fn contains_where(&self, predicate: impl FnMut(&T) -> bool) -> bool {
        self.heap.iter().any(predicate)
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if !(self.is_higher_priority)(&self.heap[index], &self.heap[parent]) {
                break;
            }
            self.heap.swap(index, parent);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut best = index;
            if left < len && (self.is_higher_priority)(&self.heap[left], &self.heap[best]) {
                best = left;
            }
            if right < len && (self.is_higher_priority)(&self.heap[right], &self.heap[best]) {
                best = right;
            }
            if best == index {
                break;
            }
            self.heap.swap(index, best);
            index = best;
        }
    }
}

impl<T: std::fmt::Debug, F> std::fmt::Debug for PriorityQueue<T, F>
where
    F: Fn(&T, &T) -> bool,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("len", &self.heap.len())
            .field("top", &self.heap.first())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn max_first(a: &u32, b: &u32) -> bool {
        a > b
    }

    #[test]
    fn pops_in_priority_order() {
        let mut queue = PriorityQueue::new(max_first);
        for value in [5, 1, 9, 3, 7, 2, 8] {
            queue.push(value);
        }
        assert_eq!(queue.peek(), Some(&9));
        let mut popped = Vec::new();
        while let Some(value) = queue.pop() {
            popped.push(value);
        }
        assert_eq!(popped, vec![9, 8, 7, 5, 3, 2, 1]);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn remove_where_keeps_heap_valid() {
        let mut queue = PriorityQueue::new(max_first);
        for value in 0..20 {
            queue.push(value);
        }
        assert_eq!(queue.remove_where(|v| *v == 13), Some(13));
        assert_eq!(queue.remove_where(|v| *v == 13), None);
        assert!(!queue.contains_where(|v| *v == 13));
        assert_eq!(queue.len(), 19);

        let mut previous = u32::MAX;
        while let Some(value) = queue.pop() {
            assert!(value < previous);
            assert_ne!(value, 13);
            previous = value;
        }
    }

    #[test]
    fn custom_comparison_with_tie_break() {
        // (urgency, rank): higher urgency first, then lower rank.
        let mut queue = PriorityQueue::new(|a: &(u8, u64), b: &(u8, u64)| {
            a.0 > b.0 || (a.0 == b.0 && a.1 < b.1)
        });
        queue.push((0, 3));
        queue.push((1, 9));
        queue.push((0, 1));
        queue.push((1, 2));
        let order: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(order, vec![(1, 2), (1, 9), (0, 1), (0, 3)]);
    }
}
