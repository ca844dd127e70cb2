//! Exported-type extraction
//!
//! Walks an exported value graph breadth-first and records every reachable
//! type under the dotted path it was first discovered at. The root itself
//! is keyed by the empty string.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::arena::{MemberValue, TypeHandle};
use crate::value::ExportValue;

/// Policy deciding whether a type nested under another type is tracked,
/// given its name (or export key when the name is empty)
pub type NamePolicy = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Default policy: track only names starting with an uppercase letter.
/// Filters out de-facto utility values that happen to look like types.
pub fn default_name_policy() -> NamePolicy {
    Arc::new(|name| name.chars().next().is_some_and(|c| c.is_uppercase()))
}

/// Extract the type registry of an exported value graph.
///
/// Deterministic given the graph's enumeration order; every reachable value
/// is visited at most once (identity dedup), so cyclic graphs terminate.
/// Plain containers are traversed but not recorded; only types are enqueued.
/// When the parent is itself a type, `policy` gates which children are
/// followed.
pub fn exported_types(exports: &ExportValue, policy: &NamePolicy) -> BTreeMap<String, TypeHandle> {
    let mut types = BTreeMap::new();
    let mut seen: HashSet<(usize, usize)> = HashSet::new();
    let mut queue: VecDeque<(String, ExportValue)> = VecDeque::new();
    queue.push_back((String::new(), exports.clone()));

    while let Some((path, value)) = queue.pop_front() {
        let Some(identity) = value.identity() else { continue };
        if !seen.insert(identity) {
            continue;
        }
        match value {
            ExportValue::Type(handle) => {
                types.insert(path.clone(), handle.clone());
                for (key, member) in handle.statics() {
                    let MemberValue::Type(child) = member.value else { continue };
                    let name = child.name();
                    let label = if name.is_empty() { key.as_str() } else { name.as_str() };
                    if !policy(label) {
                        continue;
                    }
                    queue.push_back((join_key(&path, &key), ExportValue::Type(child)));
                }
            }
            ExportValue::Map(map) => {
                for (key, child) in map.iter() {
                    if matches!(child, ExportValue::Type(_)) {
                        queue.push_back((join_key(&path, key), child.clone()));
                    }
                }
            }
            ExportValue::Data(_) => {}
        }
    }
    types
}

fn join_key(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{Member, TypeArena, TypeBuilder};
    use crate::value::{ExportMap, Value};

    #[test]
    fn test_root_type_keyed_empty() {
        let arena = TypeArena::new();
        let root = TypeBuilder::new("Root").build(&arena);
        let types = exported_types(&ExportValue::Type(root.clone()), &default_name_policy());
        assert_eq!(types.len(), 1);
        assert_eq!(types[""], root);
    }

    #[test]
    fn test_dotted_paths_through_containers_and_types() {
        let arena = TypeArena::new();
        let inner = TypeBuilder::new("Inner").build(&arena);
        let outer = TypeBuilder::new("Outer")
            .with_static_type("Inner", inner.clone())
            .build(&arena);

        let mut map = ExportMap::new();
        map.insert("Outer", ExportValue::Type(outer.clone()));
        map.insert("notes", ExportValue::Data(Value::from("ignored")));

        let types = exported_types(&map.into_value(), &default_name_policy());
        assert_eq!(types.len(), 2);
        assert_eq!(types["Outer"], outer);
        assert_eq!(types["Outer.Inner"], inner);
    }

    #[test]
    fn test_container_nested_in_container_not_traversed() {
        let arena = TypeArena::new();
        let buried = TypeBuilder::new("Buried").build(&arena);
        let mut inner = ExportMap::new();
        inner.insert("Buried", ExportValue::Type(buried));
        let mut root = ExportMap::new();
        root.insert("group", inner.into_value());

        let types = exported_types(&root.into_value(), &default_name_policy());
        assert!(types.is_empty());
    }

    #[test]
    fn test_cycle_terminates_and_records_once() {
        let arena = TypeArena::new();
        let a = TypeBuilder::new("A").build(&arena);
        let b = TypeBuilder::new("B").with_static_type("A", a.clone()).build(&arena);
        a.define_static("B", Member::nested(b.clone()));
        a.define_static("Me", Member::nested(a.clone()));

        let types = exported_types(&ExportValue::Type(a.clone()), &default_name_policy());
        assert_eq!(types.len(), 2);
        // recorded under the first discovered path only
        assert_eq!(types[""], a);
        assert_eq!(types["B"], b);
        assert!(!types.contains_key("Me"));
        assert!(!types.contains_key("B.A"));
    }

    #[test]
    fn test_name_policy_applies_only_under_types() {
        let arena = TypeArena::new();
        let helper = TypeBuilder::new("helper").build(&arena);
        let parent = TypeBuilder::new("Parent")
            .with_static_type("helper", helper.clone())
            .build(&arena);

        let mut map = ExportMap::new();
        map.insert("Parent", ExportValue::Type(parent));
        map.insert("helper", ExportValue::Type(helper));

        let types = exported_types(&map.into_value(), &default_name_policy());
        // under the container the lowercase name is fine; under the type it is not
        assert_eq!(types.len(), 2);
        assert!(types.contains_key("Parent"));
        assert!(types.contains_key("helper"));
        assert!(!types.contains_key("Parent.helper"));
    }

    #[test]
    fn test_policy_falls_back_to_key_for_anonymous_types() {
        let arena = TypeArena::new();
        let anon = TypeBuilder::new("").build(&arena);
        let parent = TypeBuilder::new("Parent")
            .with_static_type("Anon", anon.clone())
            .build(&arena);

        let types = exported_types(&ExportValue::Type(parent), &default_name_policy());
        assert_eq!(types["Anon"], anon);
    }
}
