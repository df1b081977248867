use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::ops::Index;

use indexmap::IndexSet;

/// An interner: a set of values addressable by typed dense keys that reflect
/// insertion order.
pub struct TiSet<K, V> {
    pub raw: IndexSet<V, ahash::RandomState>,
    _marker: PhantomData<fn(K) -> K>,
}

impl<K, V> Default for TiSet<K, V> {
    fn default() -> Self {
        Self { raw: IndexSet::default(), _marker: PhantomData }
    }
}

impl<K, V: Clone> Clone for TiSet<K, V> {
    fn clone(&self) -> Self {
        Self { raw: self.raw.clone(), _marker: self._marker }
    }
}

impl<K, V> Debug for TiSet<K, V>
where
    K: From<usize> + Debug,
    V: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter_enumerated()).finish()
    }
}

impl<K, V> TiSet<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            raw: IndexSet::with_capacity_and_hasher(capacity, ahash::RandomState::default()),
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &V> {
        self.raw.iter()
    }
}

impl<K: From<usize>, V> TiSet<K, V> {
    pub fn iter_enumerated(&self) -> impl Iterator<Item = (K, &V)> {
        self.raw.iter().enumerate().map(|(index, val)| (index.into(), val))
    }

    pub fn keys(&self) -> impl Iterator<Item = K> {
        (0..self.raw.len()).map(K::from)
    }
}

impl<K, V> TiSet<K, V>
where
    K: From<usize>,
    V: Eq + Hash,
{
    /// Interns `val`, returning its key and whether it was newly inserted.
    pub fn ensure(&mut self, val: V) -> (K, bool) {
        let (id, inserted) = self.raw.insert_full(val);
        (id.into(), inserted)
    }

    pub fn index(&self, val: &V) -> Option<K> {
        self.raw.get_index_of(val).map(K::from)
    }

    /// Key of an interned value; panics if `val` was never interned.
    #[track_caller]
    pub fn unwrap_index(&self, val: &V) -> K {
        self.raw.get_index_of(val).unwrap().into()
    }

    pub fn contains(&self, val: &V) -> bool {
        self.raw.contains(val)
    }
}

impl<K, V> Index<K> for TiSet<K, V>
where
    K: Into<usize>,
{
    type Output = V;

    fn index(&self, index: K) -> &Self::Output {
        self.raw.get_index(index.into()).unwrap()
    }
}
