//! Minimal structural difference between two documents, for human-readable reporting.
//! Change detection never uses this; the writer compares canonical bytes.

use mtail_core::{Diff, Document};
use serde_json::{Map, Value as Json};

/// Recursive key-level delta of `previous` against `current`.
///
/// Mapping keys present on one side only land in that side's delta; keys on both sides recurse
/// when both values are mappings and are dropped when equal. Any other differing pair (scalars,
/// sequences, mismatched types) contributes the whole old and new value. Empty deltas are `None`.
pub fn minimal_difference(previous: &Json, current: &Json) -> (Option<Json>, Option<Json>) {
    match (previous, current) {
        (Json::Object(prev), Json::Object(cur)) => {
            let mut old = Map::new();
            let mut new = Map::new();
            for (key, pv) in prev {
                match cur.get(key) {
                    None => {
                        old.insert(key.clone(), pv.clone());
                    }
                    Some(cv) => {
                        let (po, co) = minimal_difference(pv, cv);
                        if let Some(po) = po {
                            old.insert(key.clone(), po);
                        }
                        if let Some(co) = co {
                            new.insert(key.clone(), co);
                        }
                    }
                }
            }
            for (key, cv) in cur {
                if !prev.contains_key(key) {
                    new.insert(key.clone(), cv.clone());
                }
            }
            (non_empty(old), non_empty(new))
        }
        (p, c) if p == c => (None, None),
        (p, c) => (Some(p.clone()), Some(c.clone())),
    }
}

fn non_empty(map: Map<String, Json>) -> Option<Json> {
    if map.is_empty() { None } else { Some(Json::Object(map)) }
}

/// Reporting deltas for a whole diff.
pub trait MinimalDiff {
    /// `(None, current)` for creations, `(previous, None)` for deletions, and the minimal
    /// key-level delta for modifications.
    fn minimal_difference(&self) -> (Option<Document>, Option<Document>);
}

impl MinimalDiff for Diff {
    fn minimal_difference(&self) -> (Option<Document>, Option<Document>) {
        match self {
            Diff::Created { current } => (None, Some(current.clone())),
            Diff::Deleted { previous } => (Some(previous.clone()), None),
            Diff::Modified { previous, current } => minimal_difference(previous, current),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equal_documents_have_no_delta() {
        let doc = json!({"kind": "Pod", "metadata": {"name": "a", "labels": {"x": "1"}}, "spec": {"ports": [1, 2]}});
        assert_eq!(minimal_difference(&doc, &doc.clone()), (None, None));
    }

    #[test]
    fn yaml_and_json_of_same_object_have_no_delta() {
        let from_yaml: Json = serde_yaml::from_str("kind: Pod\nmetadata:\n  name: a\n  labels: {b: '2', a: '1'}\n").unwrap();
        let from_json: Json = serde_json::from_str(r#"{"metadata":{"labels":{"a":"1","b":"2"},"name":"a"},"kind":"Pod"}"#).unwrap();
        assert_eq!(minimal_difference(&from_yaml, &from_json), (None, None));
    }

    #[test]
    fn single_nested_change_yields_only_that_path() {
        let prev = json!({"metadata": {"name": "a", "labels": {"tier": "web", "keep": "y"}}, "data": {"k": "v"}});
        let cur = json!({"metadata": {"name": "a", "labels": {"tier": "api", "keep": "y"}}, "data": {"k": "v"}});
        let (old, new) = minimal_difference(&prev, &cur);
        assert_eq!(old, Some(json!({"metadata": {"labels": {"tier": "web"}}})));
        assert_eq!(new, Some(json!({"metadata": {"labels": {"tier": "api"}}})));
    }

    #[test]
    fn added_and_removed_keys_land_on_their_side() {
        let prev = json!({"a": 1, "gone": {"deep": true}});
        let cur = json!({"a": 1, "fresh": [1]});
        let (old, new) = minimal_difference(&prev, &cur);
        assert_eq!(old, Some(json!({"gone": {"deep": true}})));
        assert_eq!(new, Some(json!({"fresh": [1]})));
    }

    #[test]
    fn sequences_are_atomic() {
        let prev = json!({"spec": {"args": ["a", "b", "c"]}});
        let cur = json!({"spec": {"args": ["a", "x", "c"]}});
        let (old, new) = minimal_difference(&prev, &cur);
        assert_eq!(old, Some(json!({"spec": {"args": ["a", "b", "c"]}})));
        assert_eq!(new, Some(json!({"spec": {"args": ["a", "x", "c"]}})));
    }

    #[test]
    fn type_change_reports_both_values() {
        let (old, new) = minimal_difference(&json!({"v": {"n": 1}}), &json!({"v": "flat"}));
        assert_eq!(old, Some(json!({"v": {"n": 1}})));
        assert_eq!(new, Some(json!({"v": "flat"})));
    }

    #[test]
    fn whole_diff_deltas_by_action() {
        let doc = json!({"kind": "Pod", "metadata": {"name": "a"}});
        assert_eq!(Diff::Created { current: doc.clone() }.minimal_difference(), (None, Some(doc.clone())));
        assert_eq!(Diff::Deleted { previous: doc.clone() }.minimal_difference(), (Some(doc.clone()), None));
        let changed = json!({"kind": "Pod", "metadata": {"name": "a", "labels": {"n": "1"}}});
        let (old, new) = Diff::Modified { previous: doc, current: changed }.minimal_difference();
        assert_eq!(old, None);
        assert_eq!(new, Some(json!({"metadata": {"labels": {"n": "1"}}})));
    }
}
