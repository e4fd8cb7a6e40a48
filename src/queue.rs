use std::{
    sync::{Condvar, Mutex, PoisonError},
    time::Duration,
};

use crate::common::lock;

const DEFAULT_CAPACITY: usize = 10;

/// A thread-safe FIFO queue backed by a growable circular buffer.
///
/// Enqueue never blocks: a full buffer is reallocated at twice its capacity,
/// with the live elements moved to the front in head-to-tail order. Every
/// accessor takes the same lock as the mutators.
#[derive(Debug)]
pub struct TaskQueue<T> {
    ring: Mutex<Ring<T>>,
    available: Condvar,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskQueue<T> {
    /// An empty queue with the default initial capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// An empty queue able to hold `capacity` elements before growing
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(Ring::with_capacity(capacity)),
            available: Condvar::new(),
        }
    }

    /// A queue holding `items`, `items[0]` at the head
    pub fn from_vec(items: Vec<T>) -> Self {
        let queue = Self::with_capacity(items.len());
        {
            let mut ring = lock(&queue.ring);
            items.into_iter().for_each(|item| ring.push(item));
        }
        queue
    }

    /// Append `item` at the tail and wake one waiting consumer.
    pub fn enqueue(&self, item: T) {
        lock(&self.ring).push(item);
        self.available.notify_one();
    }

    /// Take the head element, or `None` right away if the queue is empty.
    pub fn dequeue(&self) -> Option<T> {
        lock(&self.ring).pop()
    }

    /// Take the head element, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` if the wait ends without an element, including when
    /// `wake_all` cut it short.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<T> {
        let mut ring = lock(&self.ring);
        if ring.len == 0 {
            ring = self
                .available
                .wait_timeout(ring, timeout)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        ring.pop()
    }

    /// Release every consumer parked in `dequeue_timeout`.
    pub fn wake_all(&self) {
        let _ring = lock(&self.ring);
        self.available.notify_all();
    }

    /// Number of queued elements
    pub fn len(&self) -> usize {
        lock(&self.ring).len
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current buffer capacity, never less than `len()`
    pub fn capacity(&self) -> usize {
        lock(&self.ring).capacity()
    }

    /// Drop every queued element.
    pub fn clear(&self) {
        lock(&self.ring).clear();
    }
}

impl<T: Clone> TaskQueue<T> {
    /// A copy of the head element without removing it
    pub fn peek(&self) -> Option<T> {
        lock(&self.ring).front().cloned()
    }

    /// A head-to-tail copy of the queue
    pub fn snapshot(&self) -> Vec<T> {
        lock(&self.ring).iter().cloned().collect()
    }
}

#[derive(Debug)]
struct Ring<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> Ring<T> {
    fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(capacity.max(1), || None);
        Ring {
            slots,
            head: 0,
            len: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, offset: usize) -> usize {
        (self.head + offset) % self.capacity()
    }

    fn grow(&mut self) {
        let new_capacity = self.capacity() * 2;
        let mut slots = Vec::with_capacity(new_capacity);
        for offset in 0..self.len {
            let index = self.slot(offset);
            slots.push(self.slots[index].take());
        }
        slots.resize_with(new_capacity, || None);
        self.slots = slots;
        self.head = 0;
    }

    fn push(&mut self, item: T) {
        if self.len == self.capacity() {
            self.grow();
        }
        let tail = self.slot(self.len);
        self.slots[tail] = Some(item);
        self.len += 1;
    }

    fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = self.slot(1);
        self.len -= 1;
        item
    }

    fn front(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        self.slots[self.head].as_ref()
    }

    fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |offset| self.slots[self.slot(offset)].as_ref())
    }

    fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.len = 0;
    }
}
