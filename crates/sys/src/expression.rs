//! Composite tree of named sys expressions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

type Sampler = Arc<dyn Fn() -> i64 + Send + Sync>;

/// A named node in the `sys` tree: either a sampled counter or an object of
/// named children.
#[derive(Clone)]
pub enum SysExpression {
    Leaf(Sampler),
    Object(BTreeMap<String, SysExpression>),
}

/// Value of an expression at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SysValue {
    Long(i64),
    Object(BTreeMap<String, SysValue>),
}

impl SysExpression {
    pub fn leaf(sample: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        SysExpression::Leaf(Arc::new(sample))
    }

    pub fn object<K: Into<String>>(children: impl IntoIterator<Item = (K, SysExpression)>) -> Self {
        SysExpression::Object(children.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn child(&self, name: &str) -> Option<&SysExpression> {
        match self {
            SysExpression::Leaf(_) => None,
            SysExpression::Object(children) => children.get(name),
        }
    }

    /// Follow a dotted path such as `connections.initiated`. An empty path is `self`.
    pub fn resolve(&self, path: &str) -> Option<&SysExpression> {
        if path.is_empty() {
            return Some(self);
        }
        path.split('.')
            .try_fold(self, |expr, segment| expr.child(segment))
    }

    pub fn child_names(&self) -> Vec<&str> {
        match self {
            SysExpression::Leaf(_) => Vec::new(),
            SysExpression::Object(children) => children.keys().map(String::as_str).collect(),
        }
    }

    /// Sample every leaf beneath this node.
    pub fn value(&self) -> SysValue {
        match self {
            SysExpression::Leaf(sample) => SysValue::Long(sample()),
            SysExpression::Object(children) => SysValue::Object(
                children
                    .iter()
                    .map(|(name, child)| (name.clone(), child.value()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Debug for SysExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SysExpression::Leaf(_) => f.write_str("Leaf"),
            SysExpression::Object(children) => f.debug_map().entries(children.iter()).finish(),
        }
    }
}

impl SysValue {
    pub fn as_long(&self) -> Option<i64> {
        match self {
            SysValue::Long(v) => Some(*v),
            SysValue::Object(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};

    use super::{SysExpression, SysValue};

    #[test]
    fn leaves_are_sampled_on_every_read() {
        let counter = Arc::new(AtomicI64::new(1));
        let sampled = Arc::clone(&counter);
        let expr = SysExpression::object([(
            "a",
            SysExpression::object([(
                "b",
                SysExpression::leaf(move || sampled.load(Ordering::SeqCst)),
            )]),
        )]);

        let leaf = expr.resolve("a.b").expect("path");
        assert_eq!(leaf.value(), SysValue::Long(1));
        counter.store(5, Ordering::SeqCst);
        assert_eq!(leaf.value().as_long(), Some(5));
    }

    #[test]
    fn unknown_paths_resolve_to_none() {
        let expr = SysExpression::object([("a", SysExpression::leaf(|| 0))]);
        assert!(expr.resolve("b").is_none());
        assert!(expr.resolve("a.b").is_none());
        assert!(expr.resolve("").is_some());
        assert_eq!(expr.child_names(), vec!["a"]);
    }

    #[test]
    fn object_values_serialize_as_nested_maps() {
        let expr = SysExpression::object([
            ("x", SysExpression::leaf(|| 1)),
            ("y", SysExpression::object([("z", SysExpression::leaf(|| -1))])),
        ]);
        let json = serde_json::to_string(&expr.value()).expect("json");
        assert_eq!(json, r#"{"x":1,"y":{"z":-1}}"#);
    }
}
