//! Subscription filters.
//!
//! A [`Filter`] is an immutable query description: ids, authors, kinds,
//! tag constraints, a time window, a limit and a search string. Absent
//! fields are wildcards and are left out of the wire form.
//!
//! A [`PerRelayFilter`] specialises `since` and/or `authors` per relay URL.
//! Different relays may have been read up to different timestamps, and some
//! relays treat an empty author array as "no restriction", so a per-relay
//! filter with no authors for a relay is not sent to that relay at all.

use nostr::Event;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

/// Errors produced when decoding a filter.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("filter must be a JSON object")]
    NotAnObject,

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: String, reason: String },
}

/// NIP-01 filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Filter {
    /// Event ids
    pub ids: Option<BTreeSet<String>>,
    /// Author pubkeys
    pub authors: Option<BTreeSet<String>>,
    /// Event kinds
    pub kinds: Option<BTreeSet<u16>>,
    /// Tag constraints keyed by tag name, without the `#` prefix
    pub tags: Option<BTreeMap<String, BTreeSet<String>>>,
    /// Lower bound on `created_at`, inclusive
    pub since: Option<u64>,
    /// Upper bound on `created_at`, inclusive
    pub until: Option<u64>,
    /// Maximum number of stored events to return
    pub limit: Option<u64>,
    /// NIP-50 search string
    pub search: Option<String>,
}

impl Filter {
    /// Create a new empty filter (matches all events).
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by event ids.
    pub fn ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Filter by authors.
    pub fn authors(mut self, authors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    /// Filter by kinds.
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Add a tag constraint. `name` is the tag name without `#` (e.g. "e").
    pub fn tag(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.tags
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Filter by #e (event reference) tags.
    pub fn event_refs(self, event_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tag("e", event_ids)
    }

    /// Filter by #p (pubkey reference) tags.
    pub fn pubkey_refs(self, pubkeys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tag("p", pubkeys)
    }

    /// Events created at or after `timestamp`.
    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    /// Events created at or before `timestamp`.
    pub fn until(mut self, timestamp: u64) -> Self {
        self.until = Some(timestamp);
        self
    }

    /// Limit number of results.
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Full-text search (NIP-50).
    pub fn search(mut self, query: impl Into<String>) -> Self {
        self.search = Some(query.into());
        self
    }

    /// Check if an event matches this filter.
    ///
    /// Set fields must contain the event's value; an empty set behaves like
    /// an absent one. Tag constraints are ANDed across names and ORed across
    /// the values of one name.
    pub fn matches(&self, event: &Event) -> bool {
        if !empty_or_contains(&self.ids, &event.id) {
            return false;
        }

        if !empty_or_contains(&self.authors, &event.pubkey) {
            return false;
        }

        if !empty_or_contains(&self.kinds, &event.kind) {
            return false;
        }

        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }

        if let Some(until) = self.until {
            if event.created_at > until {
                return false;
            }
        }

        if let Some(tags) = &self.tags {
            for (name, values) in tags {
                if values.is_empty() {
                    continue;
                }
                if !event.tag_values(name).any(|v| values.contains(v)) {
                    return false;
                }
            }
        }

        true
    }

    /// JSON object with only the populated fields.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();

        if let Some(ids) = &self.ids {
            obj.insert("ids".to_string(), string_array(ids));
        }
        if let Some(authors) = &self.authors {
            obj.insert("authors".to_string(), string_array(authors));
        }
        if let Some(kinds) = &self.kinds {
            obj.insert(
                "kinds".to_string(),
                Value::Array(kinds.iter().map(|k| Value::from(*k)).collect()),
            );
        }
        if let Some(tags) = &self.tags {
            for (name, values) in tags {
                obj.insert(format!("#{}", name), string_array(values));
            }
        }
        if let Some(since) = self.since {
            obj.insert("since".to_string(), Value::from(since));
        }
        if let Some(until) = self.until {
            obj.insert("until".to_string(), Value::from(until));
        }
        if let Some(limit) = self.limit {
            obj.insert("limit".to_string(), Value::from(limit));
        }
        if let Some(search) = &self.search {
            obj.insert("search".to_string(), Value::String(search.clone()));
        }

        Value::Object(obj)
    }

    /// Wire form of the filter.
    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    /// Decode a filter from its JSON object form. Unknown keys are ignored.
    pub fn from_value(value: &Value) -> Result<Self, FilterError> {
        let obj = value.as_object().ok_or(FilterError::NotAnObject)?;
        let mut filter = Filter::new();

        for (key, value) in obj {
            match key.as_str() {
                "ids" => filter.ids = Some(parse_strings(key, value)?),
                "authors" => filter.authors = Some(parse_strings(key, value)?),
                "kinds" => {
                    let arr = value.as_array().ok_or_else(|| invalid(key, "expected an array"))?;
                    let mut kinds = BTreeSet::new();
                    for kind in arr {
                        let kind = kind
                            .as_u64()
                            .and_then(|k| u16::try_from(k).ok())
                            .ok_or_else(|| invalid(key, "expected kinds between 0 and 65535"))?;
                        kinds.insert(kind);
                    }
                    filter.kinds = Some(kinds);
                }
                "since" => filter.since = Some(parse_u64(key, value)?),
                "until" => filter.until = Some(parse_u64(key, value)?),
                "limit" => filter.limit = Some(parse_u64(key, value)?),
                "search" => {
                    let search = value.as_str().ok_or_else(|| invalid(key, "expected a string"))?;
                    filter.search = Some(search.to_string());
                }
                tag if tag.starts_with('#') && tag.len() > 1 => {
                    let values = parse_strings(key, value)?;
                    filter
                        .tags
                        .get_or_insert_with(BTreeMap::new)
                        .insert(tag[1..].to_string(), values);
                }
                _ => {}
            }
        }

        Ok(filter)
    }

    /// Parse a filter from JSON text.
    pub fn from_json(json: &str) -> Result<Self, FilterError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Filter::from_value(&value).map_err(D::Error::custom)
    }
}

/// Filter whose `since` and/or `authors` differ per relay.
///
/// Relays missing from `since_per_relay` fall back to `base.since`.
/// When `authors_per_relay` is set, only relays with a non-empty author set
/// receive the filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerRelayFilter {
    /// Fields shared by every relay
    pub base: Filter,
    /// Last-seen timestamp per relay URL
    pub since_per_relay: Option<HashMap<String, u64>>,
    /// Authors to ask each relay for
    pub authors_per_relay: Option<HashMap<String, BTreeSet<String>>>,
}

impl PerRelayFilter {
    pub fn new(base: Filter) -> Self {
        Self {
            base,
            since_per_relay: None,
            authors_per_relay: None,
        }
    }

    /// Set the `since` used for one relay.
    pub fn since_for(mut self, relay_url: impl Into<String>, since: u64) -> Self {
        self.since_per_relay
            .get_or_insert_with(HashMap::new)
            .insert(relay_url.into(), since);
        self
    }

    /// Set the authors requested from one relay.
    pub fn authors_for(
        mut self,
        relay_url: impl Into<String>,
        authors: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.authors_per_relay
            .get_or_insert_with(HashMap::new)
            .insert(relay_url.into(), authors.into_iter().map(Into::into).collect());
        self
    }

    /// Whether this filter should be sent to `relay_url` at all.
    pub fn is_valid_for(&self, relay_url: &str) -> bool {
        match &self.authors_per_relay {
            None => true,
            Some(map) => map.get(relay_url).is_some_and(|authors| !authors.is_empty()),
        }
    }

    /// Whether at least one relay would receive this filter.
    pub fn is_valid_anywhere(&self) -> bool {
        match &self.authors_per_relay {
            None => true,
            Some(map) => map.values().any(|authors| !authors.is_empty()),
        }
    }

    /// Concrete filter for one relay, or the relay-agnostic view for `None`.
    ///
    /// The relay-agnostic view asks for the union of every relay's authors.
    pub fn resolve(&self, relay_url: Option<&str>) -> Filter {
        let mut filter = self.base.clone();

        match relay_url {
            Some(url) => {
                if let Some(since) = self.since_per_relay.as_ref().and_then(|m| m.get(url)) {
                    filter.since = Some(*since);
                }
                if let Some(map) = &self.authors_per_relay {
                    filter.authors = Some(map.get(url).cloned().unwrap_or_default());
                }
            }
            None => {
                if let Some(map) = &self.authors_per_relay {
                    filter.authors = Some(map.values().flatten().cloned().collect());
                }
            }
        }

        filter
    }
}

/// Category of feed a filter serves.
///
/// Relays advertise the categories they take part in. A filter tagged with
/// categories is only sent to relays sharing at least one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedType {
    Follows,
    PublicChats,
    PrivateDms,
    Global,
    Search,
    WalletConnect,
}

impl FeedType {
    pub const ALL: [FeedType; 6] = [
        FeedType::Follows,
        FeedType::PublicChats,
        FeedType::PrivateDms,
        FeedType::Global,
        FeedType::Search,
        FeedType::WalletConnect,
    ];

    pub fn all() -> BTreeSet<FeedType> {
        Self::ALL.into_iter().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Scope {
    Plain(Filter),
    PerRelay(PerRelayFilter),
}

/// Filter as held by a subscription: shared by all relays or specialised
/// per relay, optionally tagged with the feeds it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFilter {
    scope: Scope,
    feed_types: Option<BTreeSet<FeedType>>,
}

impl RelayFilter {
    /// Restrict the filter to relays active for any of `types`.
    pub fn with_feed_types(mut self, types: impl IntoIterator<Item = FeedType>) -> Self {
        self.feed_types = Some(types.into_iter().collect());
        self
    }

    /// `None` when the filter is not tied to any feed.
    pub fn feed_types(&self) -> Option<&BTreeSet<FeedType>> {
        self.feed_types.as_ref()
    }

    /// Whether a relay active for `active` should receive this filter.
    pub fn serves_any(&self, active: &BTreeSet<FeedType>) -> bool {
        match &self.feed_types {
            None => true,
            Some(types) => !types.is_disjoint(active),
        }
    }

    /// Whether this filter should be sent to `relay_url`.
    pub fn is_valid_for(&self, relay_url: &str) -> bool {
        match &self.scope {
            Scope::Plain(_) => true,
            Scope::PerRelay(filter) => filter.is_valid_for(relay_url),
        }
    }

    /// Whether any relay at all would receive this filter.
    pub fn is_valid_anywhere(&self) -> bool {
        match &self.scope {
            Scope::Plain(_) => true,
            Scope::PerRelay(filter) => filter.is_valid_anywhere(),
        }
    }

    /// Concrete filter for `relay_url` (or the relay-agnostic view).
    pub fn resolve(&self, relay_url: Option<&str>) -> Filter {
        match &self.scope {
            Scope::Plain(filter) => filter.clone(),
            Scope::PerRelay(filter) => filter.resolve(relay_url),
        }
    }

    /// JSON object for `relay_url`.
    pub fn to_value(&self, relay_url: Option<&str>) -> Value {
        match &self.scope {
            Scope::Plain(filter) => filter.to_value(),
            Scope::PerRelay(filter) => filter.resolve(relay_url).to_value(),
        }
    }

    /// Wire form for `relay_url`.
    pub fn to_json(&self, relay_url: Option<&str>) -> String {
        self.to_value(relay_url).to_string()
    }

    /// Check an event against the filter as seen by `relay_url`.
    ///
    /// A filter that no relay would receive matches nothing.
    pub fn matches(&self, event: &Event, relay_url: Option<&str>) -> bool {
        let sendable = match relay_url {
            Some(url) => self.is_valid_for(url),
            None => self.is_valid_anywhere(),
        };
        sendable && self.resolve(relay_url).matches(event)
    }
}

impl From<Filter> for RelayFilter {
    fn from(filter: Filter) -> Self {
        RelayFilter {
            scope: Scope::Plain(filter),
            feed_types: None,
        }
    }
}

impl From<PerRelayFilter> for RelayFilter {
    fn from(filter: PerRelayFilter) -> Self {
        RelayFilter {
            scope: Scope::PerRelay(filter),
            feed_types: None,
        }
    }
}

fn empty_or_contains<T: Ord>(set: &Option<BTreeSet<T>>, value: &T) -> bool {
    match set {
        Some(set) if !set.is_empty() => set.contains(value),
        _ => true,
    }
}

fn string_array(values: &BTreeSet<String>) -> Value {
    Value::Array(values.iter().cloned().map(Value::String).collect())
}

fn invalid(field: &str, reason: &str) -> FilterError {
    FilterError::InvalidField {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_strings(field: &str, value: &Value) -> Result<BTreeSet<String>, FilterError> {
    let arr = value
        .as_array()
        .ok_or_else(|| invalid(field, "expected an array"))?;
    arr.iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid(field, "expected strings"))
        })
        .collect()
}

fn parse_u64(field: &str, value: &Value) -> Result<u64, FilterError> {
    value
        .as_u64()
        .ok_or_else(|| invalid(field, "expected a non-negative integer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn event(id: &str, pubkey: &str, kind: u16, created_at: u64, tags: &[(&str, &str)]) -> Event {
        Event {
            id: id.to_string(),
            pubkey: pubkey.to_string(),
            created_at,
            kind,
            tags: tags
                .iter()
                .map(|(n, v)| vec![n.to_string(), v.to_string()])
                .collect(),
            content: String::new(),
            sig: "sig".to_string(),
        }
    }

    #[test]
    fn test_to_json_renders_only_present_fields() {
        let filter = Filter::new().kinds([1]).authors(["abc"]).limit(10);
        let value: Value = serde_json::from_str(&filter.to_json()).unwrap();
        let obj = value.as_object().unwrap();

        let mut keys: Vec<_> = obj.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, vec!["authors", "kinds", "limit"]);
        assert_eq!(obj["kinds"], serde_json::json!([1]));
        assert_eq!(obj["authors"], serde_json::json!(["abc"]));
        assert_eq!(obj["limit"], serde_json::json!(10));
    }

    #[test]
    fn test_tags_render_with_hash_prefix() {
        let filter = Filter::new().event_refs(["x"]).pubkey_refs(["y", "z"]);
        let value = filter.to_value();
        assert_eq!(value["#e"], serde_json::json!(["x"]));
        assert_eq!(value["#p"], serde_json::json!(["y", "z"]));
        assert!(value.get("tags").is_none());
    }

    #[test]
    fn test_from_json_parses_all_fields() {
        let json = r##"{"ids":["a"],"authors":["b"],"kinds":[1,7],"#t":["nostr"],"since":10,"until":20,"limit":5,"search":"hello","unknown":true}"##;
        let filter = Filter::from_json(json).unwrap();

        assert_eq!(
            filter,
            Filter::new()
                .ids(["a"])
                .authors(["b"])
                .kinds([1, 7])
                .tag("t", ["nostr"])
                .since(10)
                .until(20)
                .limit(5)
                .search("hello")
        );
    }

    #[test]
    fn test_from_json_rejects_bad_types() {
        assert!(matches!(
            Filter::from_json(r#"{"kinds":["one"]}"#),
            Err(FilterError::InvalidField { .. })
        ));
        assert!(matches!(
            Filter::from_json(r#"{"kinds":[70000]}"#),
            Err(FilterError::InvalidField { .. })
        ));
        assert!(matches!(Filter::from_json("[]"), Err(FilterError::NotAnObject)));
        assert!(matches!(Filter::from_json("nope"), Err(FilterError::Json(_))));
    }

    #[test]
    fn test_serde_uses_wire_form() {
        let filter = Filter::new().kinds([1]).tag("e", ["x"]);
        let json = serde_json::to_string(&filter).unwrap();
        assert!(json.contains(r##""#e":["x"]"##));
        let back: Filter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, filter);
    }

    #[test]
    fn test_matches_basic_fields() {
        let e = event("id1", "alice", 1, 100, &[]);

        assert!(Filter::new().matches(&e));
        assert!(Filter::new().ids(["id1", "id2"]).matches(&e));
        assert!(!Filter::new().ids(["id2"]).matches(&e));
        assert!(Filter::new().authors(["alice"]).matches(&e));
        assert!(!Filter::new().authors(["bob"]).matches(&e));
        assert!(Filter::new().kinds([1, 3]).matches(&e));
        assert!(!Filter::new().kinds([3]).matches(&e));
        assert!(Filter::new().ids(Vec::<String>::new()).matches(&e));
    }

    #[test]
    fn test_matches_time_window_is_inclusive() {
        let e = event("id1", "alice", 1, 100, &[]);

        assert!(Filter::new().since(100).matches(&e));
        assert!(!Filter::new().since(101).matches(&e));
        assert!(Filter::new().until(100).matches(&e));
        assert!(!Filter::new().until(99).matches(&e));
    }

    #[test]
    fn test_tag_constraints_and_across_names_or_within_name() {
        let filter = Filter::new().tag("e", ["x"]).tag("p", ["y"]);

        let both = event("1", "a", 1, 1, &[("e", "x"), ("p", "y")]);
        let only_e = event("2", "a", 1, 1, &[("e", "x")]);
        let only_p = event("3", "a", 1, 1, &[("p", "y")]);
        assert!(filter.matches(&both));
        assert!(!filter.matches(&only_e));
        assert!(!filter.matches(&only_p));

        let either = Filter::new().tag("e", ["x", "w"]);
        assert!(either.matches(&event("4", "a", 1, 1, &[("e", "w")])));
        assert!(!either.matches(&event("5", "a", 1, 1, &[("e", "v")])));
    }

    #[test]
    fn test_per_relay_filter_resolution() {
        let filter = PerRelayFilter::new(Filter::new().kinds([1]).since(5))
            .since_for("wss://a", 50)
            .authors_for("wss://a", ["alice"])
            .authors_for("wss://b", ["bob"])
            .authors_for("wss://c", Vec::<String>::new());

        let a = filter.resolve(Some("wss://a"));
        assert_eq!(a.since, Some(50));
        assert_eq!(a.authors, Some(BTreeSet::from(["alice".to_string()])));

        let b = filter.resolve(Some("wss://b"));
        assert_eq!(b.since, Some(5));
        assert_eq!(b.authors, Some(BTreeSet::from(["bob".to_string()])));

        let any = filter.resolve(None);
        assert_eq!(any.authors.unwrap().len(), 2);

        assert!(filter.is_valid_for("wss://a"));
        assert!(!filter.is_valid_for("wss://c"));
        assert!(!filter.is_valid_for("wss://unknown"));
    }

    #[test]
    fn test_relay_filter_matches_respects_relay_validity() {
        let filter: RelayFilter = PerRelayFilter::new(Filter::new().kinds([1]))
            .authors_for("wss://a", ["alice"])
            .into();
        let e = event("1", "alice", 1, 1, &[]);

        assert!(filter.matches(&e, Some("wss://a")));
        assert!(!filter.matches(&e, Some("wss://b")));
        assert!(filter.matches(&e, None));

        let json: Value = serde_json::from_str(&filter.to_json(Some("wss://a"))).unwrap();
        assert_eq!(json["authors"], serde_json::json!(["alice"]));
    }

    #[test]
    fn test_per_relay_filter_without_authors_anywhere_matches_nothing() {
        let filter: RelayFilter = PerRelayFilter::new(Filter::new().kinds([1]))
            .authors_for("wss://a", Vec::<String>::new())
            .authors_for("wss://b", Vec::<String>::new())
            .into();
        let e = event("1", "anyone", 1, 1, &[]);

        assert!(!filter.is_valid_anywhere());
        assert!(!filter.matches(&e, None));
        assert!(!filter.matches(&e, Some("wss://a")));

        let partly: RelayFilter = PerRelayFilter::new(Filter::new().kinds([1]))
            .authors_for("wss://a", Vec::<String>::new())
            .authors_for("wss://b", ["anyone"])
            .into();
        assert!(partly.is_valid_anywhere());
        assert!(partly.matches(&e, None));
    }

    #[test]
    fn test_feed_types_route_filters() {
        let dms = RelayFilter::from(Filter::new().kinds([4])).with_feed_types([FeedType::PrivateDms]);
        let untyped = RelayFilter::from(Filter::new().kinds([1]));
        let public = BTreeSet::from([FeedType::Global, FeedType::PublicChats]);

        assert!(!dms.serves_any(&public));
        assert!(dms.serves_any(&FeedType::all()));
        assert!(untyped.serves_any(&public));
        assert!(untyped.serves_any(&BTreeSet::new()));
        assert_eq!(dms.feed_types(), Some(&BTreeSet::from([FeedType::PrivateDms])));
    }

    fn arb_filter() -> impl Strategy<Value = Filter> {
        (
            proptest::option::of(prop::collection::btree_set("[a-f0-9]{4}", 1..4)),
            proptest::option::of(prop::collection::btree_set("[a-f0-9]{4}", 1..4)),
            proptest::option::of(prop::collection::btree_set(any::<u16>(), 1..4)),
            proptest::option::of(prop::collection::btree_map(
                "[a-z]",
                prop::collection::btree_set("[a-z0-9]{1,6}", 1..3),
                1..3,
            )),
            proptest::option::of(any::<u32>()),
            proptest::option::of(any::<u32>()),
            proptest::option::of(0u64..5000),
            proptest::option::of("[a-z ]{0,12}"),
        )
            .prop_map(|(ids, authors, kinds, tags, since, until, limit, search)| Filter {
                ids,
                authors,
                kinds,
                tags,
                since: since.map(u64::from),
                until: until.map(u64::from),
                limit,
                search,
            })
    }

    proptest! {
        #[test]
        fn prop_json_round_trip(filter in arb_filter()) {
            let parsed = Filter::from_json(&filter.to_json()).unwrap();
            prop_assert_eq!(parsed, filter);
        }

        #[test]
        fn prop_widening_sets_never_unmatches(
            base_ids in prop::collection::btree_set("[a-f0-9]{4}", 1..4),
            base_authors in prop::collection::btree_set("[a-f0-9]{4}", 1..4),
            base_kinds in prop::collection::btree_set(any::<u16>(), 1..4),
            extra_ids in prop::collection::btree_set("[a-f0-9]{4}", 0..4),
            extra_authors in prop::collection::btree_set("[a-f0-9]{4}", 0..4),
            extra_kinds in prop::collection::btree_set(any::<u16>(), 0..4),
            pick_id in any::<prop::sample::Index>(),
            pick_author in any::<prop::sample::Index>(),
            pick_kind in any::<prop::sample::Index>(),
        ) {
            let wide_ids: Vec<String> = base_ids.union(&extra_ids).cloned().collect();
            let wide_authors: Vec<String> = base_authors.union(&extra_authors).cloned().collect();
            let wide_kinds: Vec<u16> = base_kinds.union(&extra_kinds).cloned().collect();

            // Draw the event from the widened sets so both outcomes of the
            // narrow filter occur.
            let e = event(
                pick_id.get::<String>(&wide_ids),
                pick_author.get::<String>(&wide_authors),
                *pick_kind.get(&wide_kinds),
                1,
                &[],
            );
            let narrow = Filter {
                ids: Some(base_ids),
                authors: Some(base_authors),
                kinds: Some(base_kinds),
                ..Filter::default()
            };
            let wide = Filter {
                ids: Some(wide_ids.iter().cloned().collect()),
                authors: Some(wide_authors.iter().cloned().collect()),
                kinds: Some(wide_kinds.iter().copied().collect()),
                ..Filter::default()
            };

            prop_assert!(wide.matches(&e));
            if narrow.matches(&e) {
                prop_assert!(wide.matches(&e));
            }
            if !wide.matches(&e) {
                prop_assert!(!narrow.matches(&e));
            }
        }
    }
}
