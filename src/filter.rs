//! Query filters sent to relays.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Declarative predicate set for querying relays.
///
/// Every field is optional; absent fields are omitted from the wire form.
/// Within one filter the predicates are combined with AND; an array of
/// filters in a `REQ` frame is combined with OR. The bridge never evaluates
/// filters itself, it passes them to relays opaquely.
///
/// Tag criteria use `#`-prefixed keys, e.g. `{"#t": ["news"]}`; they are
/// kept in a flattened map so uncommon tag filters pass through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    /// Event ids to match exactly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    /// Author public keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    /// Kind numbers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    /// Earliest `created_at`, inclusive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    /// Latest `created_at`, inclusive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    /// Maximum number of stored events the relay should return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Tag criteria keyed by `#`-prefixed tag name.
    #[serde(flatten)]
    pub tags: BTreeMap<String, Vec<String>>,
}
