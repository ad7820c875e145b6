//! Concurrent ordered cache shared by the client and its consumers.
//!
//! [`ConcurrentEventCache`] is a container only: it never evicts and never
//! mutates values. Values are stored behind [`Arc`] so every reader that
//! races on [`get_or_create`](ConcurrentEventCache::get_or_create) ends up
//! holding the identical stored value.
//!
//! All bulk queries are [`CacheCollector`]s driven by one traversal,
//! [`for_each`](ConcurrentEventCache::for_each) or
//! [`for_each_in`](ConcurrentEventCache::for_each_in).

use crate::collectors::{
    AssociateCollector, AssociateWithCollector, CacheCollector, CountByGroupCollector,
    CountCollector, FilterCollector, FilterSetCollector, GroupByCollector,
    JoinToStringCollector, MapFlattenCollector, MapFlattenSetCollector, MapNotNullCollector,
    MapNotNullSetCollector, MaxCollector, SumByGroupCollector, SumCollector,
};
use crossbeam_skiplist::SkipMap;
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::ops::{AddAssign, RangeBounds};
use std::sync::Arc;

/// Lock-free sorted map from `K` to shared `V`.
pub struct ConcurrentEventCache<K, V> {
    entries: SkipMap<K, Arc<V>>,
}

impl<K, V> Default for ConcurrentEventCache<K, V>
where
    K: Ord + Send + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ConcurrentEventCache<K, V>
where
    K: Ord + Send + 'static,
    V: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: SkipMap::new(),
        }
    }

    pub fn get<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Store `value`, replacing any previous value for `key`.
    pub fn put(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        self.entries.insert(key, Arc::clone(&value));
        value
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.entries.remove(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Value for `key`, creating it with `builder` if absent.
    ///
    /// Under a race `builder` may run in several callers, but exactly one
    /// value is stored and every caller gets that value back.
    pub fn get_or_create<F>(&self, key: K, builder: F) -> Arc<V>
    where
        F: FnOnce(&K) -> V,
    {
        if let Some(entry) = self.entries.get(&key) {
            return Arc::clone(entry.value());
        }
        let value = Arc::new(builder(&key));
        Arc::clone(self.entries.get_or_insert(key, value).value())
    }

    /// Like [`get_or_create`](Self::get_or_create) with a fallible builder.
    ///
    /// A builder error is returned to this caller and nothing is stored.
    pub fn try_get_or_create<F, E>(&self, key: K, builder: F) -> Result<Arc<V>, E>
    where
        F: FnOnce(&K) -> Result<V, E>,
    {
        if let Some(entry) = self.entries.get(&key) {
            return Ok(Arc::clone(entry.value()));
        }
        let value = Arc::new(builder(&key)?);
        Ok(Arc::clone(self.entries.get_or_insert(key, value).value()))
    }

    /// Insert a value built by `builder` if `key` is absent.
    ///
    /// Returns true only if this caller's value is the one stored.
    pub fn create_if_absent<F>(&self, key: K, builder: F) -> bool
    where
        F: FnOnce(&K) -> V,
    {
        if self.entries.contains_key(&key) {
            return false;
        }
        let value = Arc::new(builder(&key));
        let entry = self.entries.get_or_insert(key, Arc::clone(&value));
        Arc::ptr_eq(entry.value(), &value)
    }

    /// Feed every entry to `collector`, in key order.
    pub fn for_each<C>(&self, collector: &mut C)
    where
        C: CacheCollector<K, V> + ?Sized,
    {
        for entry in self.entries.iter() {
            collector.accept(entry.key(), entry.value());
        }
    }

    /// Feed entries whose keys fall in `range` to `collector`, in key order.
    pub fn for_each_in<Q, R, C>(&self, range: R, collector: &mut C)
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
        R: RangeBounds<Q>,
        C: CacheCollector<K, V> + ?Sized,
    {
        for entry in self.entries.range(range) {
            collector.accept(entry.key(), entry.value());
        }
    }

    /// Run `collector` over the whole cache and hand it back.
    pub fn collect<C: CacheCollector<K, V>>(&self, mut collector: C) -> C {
        self.for_each(&mut collector);
        collector
    }

    /// Run `collector` over a key range and hand it back.
    pub fn collect_in<Q, R, C>(&self, range: R, mut collector: C) -> C
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
        R: RangeBounds<Q>,
        C: CacheCollector<K, V>,
    {
        self.for_each_in(range, &mut collector);
        collector
    }

    pub fn filter<P>(&self, predicate: P) -> Vec<Arc<V>>
    where
        P: FnMut(&K, &V) -> bool,
    {
        self.collect(FilterCollector::new(predicate)).finish()
    }

    pub fn filter_into_set<P>(&self, predicate: P) -> HashSet<Arc<V>>
    where
        V: Hash + Eq,
        P: FnMut(&K, &V) -> bool,
    {
        self.collect(FilterSetCollector::new(predicate)).finish()
    }

    pub fn map<R, F>(&self, mut transform: F) -> Vec<R>
    where
        F: FnMut(&K, &V) -> R,
    {
        self.map_not_null(move |k, v| Some(transform(k, v)))
    }

    pub fn map_not_null<R, F>(&self, transform: F) -> Vec<R>
    where
        F: FnMut(&K, &V) -> Option<R>,
    {
        self.collect(MapNotNullCollector::new(transform)).finish()
    }

    pub fn map_into_set<R, F>(&self, mut transform: F) -> HashSet<R>
    where
        R: Hash + Eq,
        F: FnMut(&K, &V) -> R,
    {
        self.map_not_null_into_set(move |k, v| Some(transform(k, v)))
    }

    pub fn map_not_null_into_set<R, F>(&self, transform: F) -> HashSet<R>
    where
        R: Hash + Eq,
        F: FnMut(&K, &V) -> Option<R>,
    {
        self.collect(MapNotNullSetCollector::new(transform)).finish()
    }

    pub fn map_flatten<R, I, F>(&self, transform: F) -> Vec<R>
    where
        I: IntoIterator<Item = R>,
        F: FnMut(&K, &V) -> I,
    {
        self.collect(MapFlattenCollector::new(transform)).finish()
    }

    pub fn map_flatten_into_set<R, I, F>(&self, transform: F) -> HashSet<R>
    where
        R: Hash + Eq,
        I: IntoIterator<Item = R>,
        F: FnMut(&K, &V) -> I,
    {
        self.collect(MapFlattenSetCollector::new(transform)).finish()
    }

    /// Greatest value among those matching `predicate`.
    pub fn max_or_none_of<P, C>(&self, predicate: P, comparator: C) -> Option<Arc<V>>
    where
        P: FnMut(&K, &V) -> bool,
        C: FnMut(&V, &V) -> Ordering,
    {
        self.collect(MaxCollector::new(predicate, comparator)).finish()
    }

    /// Sum of `selector` over all entries. Works for any numeric width.
    pub fn sum_of<N, F>(&self, selector: F) -> N
    where
        N: Default + AddAssign,
        F: FnMut(&K, &V) -> N,
    {
        self.collect(SumCollector::new(selector)).finish()
    }

    pub fn group_by<G, F>(&self, group: F) -> HashMap<G, Vec<Arc<V>>>
    where
        G: Hash + Eq,
        F: FnMut(&K, &V) -> G,
    {
        self.collect(GroupByCollector::new(group)).finish()
    }

    pub fn count_by_group<G, F>(&self, group: F) -> HashMap<G, usize>
    where
        G: Hash + Eq,
        F: FnMut(&K, &V) -> G,
    {
        self.collect(CountByGroupCollector::new(group)).finish()
    }

    pub fn sum_by_group<G, N, FG, FN>(&self, group: FG, selector: FN) -> HashMap<G, N>
    where
        G: Hash + Eq,
        N: Default + AddAssign,
        FG: FnMut(&K, &V) -> G,
        FN: FnMut(&K, &V) -> N,
    {
        self.collect(SumByGroupCollector::new(group, selector)).finish()
    }

    pub fn count<P>(&self, predicate: P) -> usize
    where
        P: FnMut(&K, &V) -> bool,
    {
        self.collect(CountCollector::new(predicate)).finish()
    }

    pub fn associate<AK, AV, F>(&self, transform: F) -> HashMap<AK, AV>
    where
        AK: Hash + Eq,
        F: FnMut(&K, &V) -> (AK, AV),
    {
        self.collect(AssociateCollector::new(transform)).finish()
    }

    pub fn associate_with<R, F>(&self, transform: F) -> HashMap<K, R>
    where
        K: Clone + Hash + Eq,
        F: FnMut(&K, &V) -> R,
    {
        self.collect(AssociateWithCollector::new(transform)).finish()
    }

    pub fn join_to_string<F>(&self, separator: &str, prefix: &str, postfix: &str, transform: F) -> String
    where
        F: FnMut(&K, &V) -> String,
    {
        self.collect(JoinToStringCollector::new(separator, prefix, postfix, transform))
            .finish()
    }

    /// All keys in order.
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn first_key(&self) -> Option<K>
    where
        K: Clone,
    {
        self.entries.front().map(|entry| entry.key().clone())
    }

    pub fn last_key(&self) -> Option<K>
    where
        K: Clone,
    {
        self.entries.back().map(|entry| entry.key().clone())
    }
}

impl<K, V> std::fmt::Debug for ConcurrentEventCache<K, V>
where
    K: Ord + Send + 'static,
    V: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentEventCache")
            .field("len", &self.entries.len())
            .finish()
    }
}
