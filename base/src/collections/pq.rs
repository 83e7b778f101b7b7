//! A keyed priority queue which yields its lowest-priority-value
//! item first.  Each key appears at most once; pushing an existing
//! key changes its priority.
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::{self, Debug, Formatter};
use std::hash::Hash;

use keyed_priority_queue::KeyedPriorityQueue;

/// Inverts the ordering of `T`, turning the max-heap underneath
/// into a min-heap.
#[derive(Debug)]
struct Lowest<T> {
    inner: T,
}

impl<T> From<T> for Lowest<T> {
    fn from(inner: T) -> Lowest<T> {
        Lowest { inner }
    }
}

impl<T: Ord> PartialOrd for Lowest<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Eq> Eq for Lowest<T> {}

impl<T: Eq> PartialEq for Lowest<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<T: Ord> Ord for Lowest<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.inner.cmp(&self.inner)
    }
}

pub struct KeyedMinQueue<K: Hash + Eq, P: Ord> {
    items: KeyedPriorityQueue<K, Lowest<P>>,
}

impl<K, P> KeyedMinQueue<K, P>
where
    K: Hash + Eq,
    P: Ord,
{
    pub fn new() -> KeyedMinQueue<K, P> {
        KeyedMinQueue {
            items: KeyedPriorityQueue::<K, Lowest<P>>::new(),
        }
    }

    pub fn peek(&self) -> Option<(&K, &P)> {
        self.items.peek().map(|(k, p)| (k, &p.inner))
    }

    pub fn pop(&mut self) -> Option<(K, P)> {
        self.items.pop().map(|(k, p)| (k, p.inner))
    }

    /// Insert `key`, returning its previous priority if it was
    /// already queued.
    pub fn push(&mut self, key: K, priority: P) -> Option<P> {
        self.items
            .push(key, Lowest::from(priority))
            .map(|old| old.inner)
    }

    /// Take `key` out of the queue wherever it is, returning its
    /// priority if it was queued.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<P>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        self.items.remove(key).map(|p| p.inner)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<K, P> Default for KeyedMinQueue<K, P>
where
    K: Hash + Eq,
    P: Ord,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> Debug for KeyedMinQueue<K, P>
where
    K: Hash + Eq + Debug,
    P: Ord + Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedMinQueue")
            .field("items", &self.items)
            .finish()
    }
}

#[test]
fn test_lowest_ordering() {
    assert_eq!(Lowest::from(1), Lowest::from(1));
    assert!(Lowest::from(1) < Lowest::from(0));
    assert!(Lowest::from(9) <= Lowest::from(3));
}

#[test]
fn test_empty() {
    let mut q: KeyedMinQueue<u16, u32> = KeyedMinQueue::default();
    assert!(q.is_empty());
    assert_eq!(q.peek(), None);
    assert_eq!(q.pop(), None);
    assert_eq!(q.remove(&7), None);
}

#[test]
fn test_lowest_priority_value_first() {
    let mut q: KeyedMinQueue<u16, (u8, u64)> = KeyedMinQueue::new();
    assert_eq!(q.push(0x0010, (4, 1)), None);
    assert_eq!(q.push(0x0003, (1, 2)), None);
    assert_eq!(q.push(0x0007, (4, 0)), None);
    assert_eq!(q.pop(), Some((0x0003, (1, 2))));
    assert_eq!(q.pop(), Some((0x0007, (4, 0))));
    assert_eq!(q.pop(), Some((0x0010, (4, 1))));
    assert!(q.is_empty());
}

#[test]
fn test_remove_from_middle() {
    let mut q: KeyedMinQueue<u16, u8> = KeyedMinQueue::new();
    q.push(1, 5);
    q.push(2, 6);
    q.push(3, 7);
    assert_eq!(q.remove(&2), Some(6));
    assert_eq!(q.remove(&2), None);
    assert_eq!(q.len(), 2);
    assert_eq!(q.pop(), Some((1, 5)));
    assert_eq!(q.pop(), Some((3, 7)));
}

#[test]
fn test_repeat_push_replaces_priority() {
    let mut q: KeyedMinQueue<u16, char> = KeyedMinQueue::new();
    assert_eq!(q.push(0, '2'), None);
    assert_eq!(q.push(0, '4'), Some('2'));
    assert_eq!(q.len(), 1);
    assert_eq!(q.pop(), Some((0, '4')));
}
