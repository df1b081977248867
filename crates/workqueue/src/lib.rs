use std::collections::VecDeque;
use std::fmt::Debug;

use bitset::BitSet;

/// A work queue is a handy data structure for tracking work left to
/// do (for example, basic blocks left to process). It is a de-duplicating
/// queue: attempting to insert X if X is already enqueued has no effect.
/// Elements are dense indices, so the queue is allocated to size and a bit
/// set tracks occupancy.
pub struct WorkQueue<T: From<usize> + Into<usize> + Copy + PartialEq + Debug> {
    pub deque: VecDeque<T>,
    pub set: BitSet<T>,
}

impl<T: From<usize> + Into<usize> + Copy + PartialEq + Debug> WorkQueue<T> {
    /// Creates a new work queue that starts empty, where elements range from (0..size).
    #[inline]
    pub fn with_none(size: usize) -> Self {
        WorkQueue { deque: VecDeque::with_capacity(size), set: BitSet::new_empty(size) }
    }

    /// Creates a new work queue with all the elements from (0..size).
    #[inline]
    pub fn with_all(size: usize) -> Self {
        WorkQueue { deque: (0..size).map(T::from).collect(), set: BitSet::new_filled(size) }
    }

    /// Attempt to enqueue `element`. Returns whether the queue changed.
    #[inline]
    pub fn insert(&mut self, element: T) -> bool {
        if self.set.insert(element) {
            self.deque.push_back(element);
            true
        } else {
            false
        }
    }

    /// Attempt to pop an element from the work queue.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        let element = self.deque.pop_front()?;
        self.set.remove(element);
        Some(element)
    }

    /// Attempt to take an element from the work queue without removing it
    /// from the occupancy set: anything removed with `take` can never be
    /// inserted again. Useful for worklist algorithms that must process every
    /// element exactly once.
    #[inline]
    pub fn take(&mut self) -> Option<T> {
        self.deque.pop_front()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deque.is_empty()
    }
}

impl<T: From<usize> + Into<usize> + Copy + PartialEq + Debug> Extend<T> for WorkQueue<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let set = &mut self.set;
        self.deque.extend(iter.into_iter().filter(|x| set.insert(*x)))
    }
}

/// The LIFO counterpart of [`WorkQueue`].
pub struct WorkStack<T: From<usize> + Into<usize> + Copy + PartialEq + Debug> {
    pub stack: Vec<T>,
    pub set: BitSet<T>,
}

impl<T: From<usize> + Into<usize> + Copy + PartialEq + Debug> WorkStack<T> {
    #[inline]
    pub fn with_none(size: usize) -> Self {
        WorkStack { stack: Vec::new(), set: BitSet::new_empty(size) }
    }

    #[inline]
    pub fn insert(&mut self, element: T) -> bool {
        if self.set.insert(element) {
            self.stack.push(element);
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        let element = self.stack.pop()?;
        self.set.remove(element);
        Some(element)
    }

    /// See [`WorkQueue::take`].
    #[inline]
    pub fn take(&mut self) -> Option<T> {
        self.stack.pop()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

impl<T: From<usize> + Into<usize> + Copy + PartialEq + Debug> Extend<T> for WorkStack<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let set = &mut self.set;
        self.stack.extend(iter.into_iter().filter(|x| set.insert(*x)))
    }
}
