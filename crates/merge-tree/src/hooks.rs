//! Transform hooks run over items passing through a read or remote-write
//! stream.

use perspectivedb_types::Item;

/// A read-only view of the store a hook may consult for ancillary lookups.
/// Deliberately narrow: a hook observes only the item handed to it plus
/// whatever this trait exposes, never the full `Tree`/`MergeTree` API.
pub trait HookStore {
    fn get_by_version(&self, v: &perspectivedb_types::Version) -> Option<Item>;
}

/// `(store, item, options) -> Option<item>`. Returning `None` drops the item
/// from the stream; hooks run in declared order and the first `None`
/// short-circuits the rest.
pub trait Hook: Send + Sync {
    fn apply(&self, store: &dyn HookStore, item: Item) -> Option<Item>;
}

impl<F> Hook for F
where
    F: Fn(&dyn HookStore, Item) -> Option<Item> + Send + Sync,
{
    fn apply(&self, store: &dyn HookStore, item: Item) -> Option<Item> {
        self(store, item)
    }
}

/// Runs `hooks` over `item` in order, stopping at the first one that drops
/// it.
pub fn run_hooks(store: &dyn HookStore, hooks: &[Box<dyn Hook>], item: Item) -> Option<Item> {
    let mut current = item;
    for hook in hooks {
        current = hook.apply(store, current)?;
    }
    Some(current)
}

/// A read filter expressed as body-attribute equality, the form
/// `create_local_write_stream`/read-stream filters take.
#[derive(Clone, Debug)]
pub struct AttributeEquals {
    pub key: String,
    pub value: serde_json::Value,
}

impl AttributeEquals {
    #[must_use]
    pub fn matches(&self, item: &Item) -> bool {
        item.body.get(&self.key) == Some(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use perspectivedb_types::{Body, Header, Id};
    use serde_json::json;

    use super::*;

    struct NoStore;
    impl HookStore for NoStore {
        fn get_by_version(&self, _v: &perspectivedb_types::Version) -> Option<Item> {
            None
        }
    }

    fn item(body: Vec<(&str, serde_json::Value)>) -> Item {
        let mut b = Body::new();
        for (k, v) in body {
            let _ = b.insert(k.to_owned(), v);
        }
        Item::new(Header::root(Id::from("X")), b)
    }

    #[test]
    fn first_none_short_circuits() {
        let drop_all: Box<dyn Hook> = Box::new(|_: &dyn HookStore, _: Item| None);
        let would_panic: Box<dyn Hook> = Box::new(|_: &dyn HookStore, _item: Item| {
            panic!("should never run after an earlier hook drops the item")
        });

        let result = run_hooks(&NoStore, &[drop_all, would_panic], item(vec![]));
        assert!(result.is_none());
    }

    #[test]
    fn hooks_run_in_declared_order() {
        let add_a: Box<dyn Hook> = Box::new(|_: &dyn HookStore, mut item: Item| {
            let _ = item.body.insert("seen".to_owned(), json!("a"));
            Some(item)
        });
        let overwrite_b: Box<dyn Hook> = Box::new(|_: &dyn HookStore, mut item: Item| {
            let _ = item.body.insert("seen".to_owned(), json!("b"));
            Some(item)
        });

        let result = run_hooks(&NoStore, &[add_a, overwrite_b], item(vec![])).unwrap();
        assert_eq!(result.body.get("seen"), Some(&json!("b")));
    }

    #[test]
    fn attribute_filter_matches_exact_value() {
        let filter = AttributeEquals {
            key: "status".to_owned(),
            value: json!("active"),
        };
        assert!(filter.matches(&item(vec![("status", json!("active"))])));
        assert!(!filter.matches(&item(vec![("status", json!("inactive"))])));
        assert!(!filter.matches(&item(vec![])));
    }
}
