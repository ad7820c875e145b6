//! Single-pass visitors over a [`ConcurrentEventCache`](crate::ConcurrentEventCache).
//!
//! Each collector is fed every entry once through
//! [`CacheCollector::accept`] and then turned into its result with
//! `finish`. The cache's query methods are thin wrappers over these, and
//! callers can drive them over a key range with
//! [`collect_in`](crate::ConcurrentEventCache::collect_in).

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::ops::AddAssign;
use std::sync::Arc;

/// Visitor consumed by one cache traversal.
pub trait CacheCollector<K, V> {
    fn accept(&mut self, key: &K, value: &Arc<V>);
}

impl<K, V, F> CacheCollector<K, V> for F
where
    F: FnMut(&K, &Arc<V>),
{
    fn accept(&mut self, key: &K, value: &Arc<V>) {
        self(key, value)
    }
}

/// Values matching a predicate, in key order.
pub struct FilterCollector<V, P> {
    predicate: P,
    results: Vec<Arc<V>>,
}

impl<V, P> FilterCollector<V, P> {
    pub fn new(predicate: P) -> Self {
        Self {
            predicate,
            results: Vec::new(),
        }
    }

    pub fn finish(self) -> Vec<Arc<V>> {
        self.results
    }
}

impl<K, V, P> CacheCollector<K, V> for FilterCollector<V, P>
where
    P: FnMut(&K, &V) -> bool,
{
    fn accept(&mut self, key: &K, value: &Arc<V>) {
        if (self.predicate)(key, value) {
            self.results.push(Arc::clone(value));
        }
    }
}

/// Distinct values matching a predicate.
pub struct FilterSetCollector<V, P> {
    predicate: P,
    results: HashSet<Arc<V>>,
}

impl<V, P> FilterSetCollector<V, P> {
    pub fn new(predicate: P) -> Self {
        Self {
            predicate,
            results: HashSet::new(),
        }
    }

    pub fn finish(self) -> HashSet<Arc<V>> {
        self.results
    }
}

impl<K, V, P> CacheCollector<K, V> for FilterSetCollector<V, P>
where
    V: Hash + Eq,
    P: FnMut(&K, &V) -> bool,
{
    fn accept(&mut self, key: &K, value: &Arc<V>) {
        if (self.predicate)(key, value) {
            self.results.insert(Arc::clone(value));
        }
    }
}

/// Transformed entries; `None` results are skipped.
pub struct MapNotNullCollector<R, F> {
    transform: F,
    results: Vec<R>,
}

impl<R, F> MapNotNullCollector<R, F> {
    pub fn new(transform: F) -> Self {
        Self {
            transform,
            results: Vec::new(),
        }
    }

    pub fn finish(self) -> Vec<R> {
        self.results
    }
}

impl<K, V, R, F> CacheCollector<K, V> for MapNotNullCollector<R, F>
where
    F: FnMut(&K, &V) -> Option<R>,
{
    fn accept(&mut self, key: &K, value: &Arc<V>) {
        if let Some(result) = (self.transform)(key, value) {
            self.results.push(result);
        }
    }
}

/// Distinct transformed entries; `None` results are skipped.
pub struct MapNotNullSetCollector<R, F> {
    transform: F,
    results: HashSet<R>,
}

impl<R, F> MapNotNullSetCollector<R, F> {
    pub fn new(transform: F) -> Self {
        Self {
            transform,
            results: HashSet::new(),
        }
    }

    pub fn finish(self) -> HashSet<R> {
        self.results
    }
}

impl<K, V, R, F> CacheCollector<K, V> for MapNotNullSetCollector<R, F>
where
    R: Hash + Eq,
    F: FnMut(&K, &V) -> Option<R>,
{
    fn accept(&mut self, key: &K, value: &Arc<V>) {
        if let Some(result) = (self.transform)(key, value) {
            self.results.insert(result);
        }
    }
}

/// Every item of every transformed entry.
pub struct MapFlattenCollector<R, F> {
    transform: F,
    results: Vec<R>,
}

impl<R, F> MapFlattenCollector<R, F> {
    pub fn new(transform: F) -> Self {
        Self {
            transform,
            results: Vec::new(),
        }
    }

    pub fn finish(self) -> Vec<R> {
        self.results
    }
}

impl<K, V, R, I, F> CacheCollector<K, V> for MapFlattenCollector<R, F>
where
    I: IntoIterator<Item = R>,
    F: FnMut(&K, &V) -> I,
{
    fn accept(&mut self, key: &K, value: &Arc<V>) {
        self.results.extend((self.transform)(key, value));
    }
}

/// Distinct items of every transformed entry.
pub struct MapFlattenSetCollector<R, F> {
    transform: F,
    results: HashSet<R>,
}

impl<R, F> MapFlattenSetCollector<R, F> {
    pub fn new(transform: F) -> Self {
        Self {
            transform,
            results: HashSet::new(),
        }
    }

    pub fn finish(self) -> HashSet<R> {
        self.results
    }
}

impl<K, V, R, I, F> CacheCollector<K, V> for MapFlattenSetCollector<R, F>
where
    R: Hash + Eq,
    I: IntoIterator<Item = R>,
    F: FnMut(&K, &V) -> I,
{
    fn accept(&mut self, key: &K, value: &Arc<V>) {
        self.results.extend((self.transform)(key, value));
    }
}

/// Greatest matching value under a comparator. Ties keep the first seen.
pub struct MaxCollector<V, P, C> {
    predicate: P,
    comparator: C,
    best: Option<Arc<V>>,
}

impl<V, P, C> MaxCollector<V, P, C> {
    pub fn new(predicate: P, comparator: C) -> Self {
        Self {
            predicate,
            comparator,
            best: None,
        }
    }

    pub fn finish(self) -> Option<Arc<V>> {
        self.best
    }
}

impl<K, V, P, C> CacheCollector<K, V> for MaxCollector<V, P, C>
where
    P: FnMut(&K, &V) -> bool,
    C: FnMut(&V, &V) -> Ordering,
{
    fn accept(&mut self, key: &K, value: &Arc<V>) {
        if !(self.predicate)(key, value) {
            return;
        }
        let replace = match &self.best {
            None => true,
            Some(best) => (self.comparator)(value, best) == Ordering::Greater,
        };
        if replace {
            self.best = Some(Arc::clone(value));
        }
    }
}

/// Sum of a numeric projection.
pub struct SumCollector<N, F> {
    selector: F,
    total: N,
}

impl<N: Default, F> SumCollector<N, F> {
    pub fn new(selector: F) -> Self {
        Self {
            selector,
            total: N::default(),
        }
    }

    pub fn finish(self) -> N {
        self.total
    }
}

impl<K, V, N, F> CacheCollector<K, V> for SumCollector<N, F>
where
    N: AddAssign,
    F: FnMut(&K, &V) -> N,
{
    fn accept(&mut self, key: &K, value: &Arc<V>) {
        self.total += (self.selector)(key, value);
    }
}

/// Entries matching a predicate.
pub struct CountCollector<P> {
    predicate: P,
    count: usize,
}

impl<P> CountCollector<P> {
    pub fn new(predicate: P) -> Self {
        Self {
            predicate,
            count: 0,
        }
    }

    pub fn finish(self) -> usize {
        self.count
    }
}

impl<K, V, P> CacheCollector<K, V> for CountCollector<P>
where
    P: FnMut(&K, &V) -> bool,
{
    fn accept(&mut self, key: &K, value: &Arc<V>) {
        if (self.predicate)(key, value) {
            self.count += 1;
        }
    }
}

/// Values grouped by a key function, each group in key order.
pub struct GroupByCollector<G, V, F> {
    group: F,
    groups: HashMap<G, Vec<Arc<V>>>,
}

impl<G, V, F> GroupByCollector<G, V, F> {
    pub fn new(group: F) -> Self {
        Self {
            group,
            groups: HashMap::new(),
        }
    }

    pub fn finish(self) -> HashMap<G, Vec<Arc<V>>> {
        self.groups
    }
}

impl<K, V, G, F> CacheCollector<K, V> for GroupByCollector<G, V, F>
where
    G: Hash + Eq,
    F: FnMut(&K, &V) -> G,
{
    fn accept(&mut self, key: &K, value: &Arc<V>) {
        let group = (self.group)(key, value);
        self.groups.entry(group).or_default().push(Arc::clone(value));
    }
}

/// Entry count per group.
pub struct CountByGroupCollector<G, F> {
    group: F,
    counts: HashMap<G, usize>,
}

impl<G, F> CountByGroupCollector<G, F> {
    pub fn new(group: F) -> Self {
        Self {
            group,
            counts: HashMap::new(),
        }
    }

    pub fn finish(self) -> HashMap<G, usize> {
        self.counts
    }
}

impl<K, V, G, F> CacheCollector<K, V> for CountByGroupCollector<G, F>
where
    G: Hash + Eq,
    F: FnMut(&K, &V) -> G,
{
    fn accept(&mut self, key: &K, value: &Arc<V>) {
        *self.counts.entry((self.group)(key, value)).or_default() += 1;
    }
}

/// Sum of a numeric projection per group.
pub struct SumByGroupCollector<G, N, FG, FN> {
    group: FG,
    selector: FN,
    sums: HashMap<G, N>,
}

impl<G, N, FG, FN> SumByGroupCollector<G, N, FG, FN> {
    pub fn new(group: FG, selector: FN) -> Self {
        Self {
            group,
            selector,
            sums: HashMap::new(),
        }
    }

    pub fn finish(self) -> HashMap<G, N> {
        self.sums
    }
}

impl<K, V, G, N, FG, FN> CacheCollector<K, V> for SumByGroupCollector<G, N, FG, FN>
where
    G: Hash + Eq,
    N: Default + AddAssign,
    FG: FnMut(&K, &V) -> G,
    FN: FnMut(&K, &V) -> N,
{
    fn accept(&mut self, key: &K, value: &Arc<V>) {
        let group = (self.group)(key, value);
        let amount = (self.selector)(key, value);
        *self.sums.entry(group).or_default() += amount;
    }
}

/// Map built from a pair projection. Later keys overwrite earlier ones.
pub struct AssociateCollector<AK, AV, F> {
    transform: F,
    results: HashMap<AK, AV>,
}

impl<AK, AV, F> AssociateCollector<AK, AV, F> {
    pub fn new(transform: F) -> Self {
        Self {
            transform,
            results: HashMap::new(),
        }
    }

    pub fn finish(self) -> HashMap<AK, AV> {
        self.results
    }
}

impl<K, V, AK, AV, F> CacheCollector<K, V> for AssociateCollector<AK, AV, F>
where
    AK: Hash + Eq,
    F: FnMut(&K, &V) -> (AK, AV),
{
    fn accept(&mut self, key: &K, value: &Arc<V>) {
        let (k, v) = (self.transform)(key, value);
        self.results.insert(k, v);
    }
}

/// Map from each cache key to a projection of its value.
pub struct AssociateWithCollector<K, R, F> {
    transform: F,
    results: HashMap<K, R>,
}

impl<K, R, F> AssociateWithCollector<K, R, F> {
    pub fn new(transform: F) -> Self {
        Self {
            transform,
            results: HashMap::new(),
        }
    }

    pub fn finish(self) -> HashMap<K, R> {
        self.results
    }
}

impl<K, V, R, F> CacheCollector<K, V> for AssociateWithCollector<K, R, F>
where
    K: Clone + Hash + Eq,
    F: FnMut(&K, &V) -> R,
{
    fn accept(&mut self, key: &K, value: &Arc<V>) {
        let result = (self.transform)(key, value);
        self.results.insert(key.clone(), result);
    }
}

/// Rendered entries joined by a separator.
pub struct JoinToStringCollector<F> {
    transform: F,
    separator: String,
    postfix: String,
    buffer: String,
    count: usize,
}

impl<F> JoinToStringCollector<F> {
    pub fn new(separator: &str, prefix: &str, postfix: &str, transform: F) -> Self {
        Self {
            transform,
            separator: separator.to_string(),
            postfix: postfix.to_string(),
            buffer: prefix.to_string(),
            count: 0,
        }
    }

    pub fn finish(mut self) -> String {
        self.buffer.push_str(&self.postfix);
        self.buffer
    }
}

impl<K, V, F> CacheCollector<K, V> for JoinToStringCollector<F>
where
    F: FnMut(&K, &V) -> String,
{
    fn accept(&mut self, key: &K, value: &Arc<V>) {
        if self.count > 0 {
            self.buffer.push_str(&self.separator);
        }
        self.count += 1;
        let rendered = (self.transform)(key, value);
        self.buffer.push_str(&rendered);
    }
}
