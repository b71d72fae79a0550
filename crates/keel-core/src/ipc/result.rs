//! Aggregated answers of a fan-out invoke.

use std::time::Duration;

use serde_json::Value;

use super::binding::BindingInfo;
use crate::process::ProcessId;

/// One target's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeItem {
    /// The binding that answered.
    pub binding: BindingInfo,
    /// Its result; `Null` when the target produced nothing.
    pub result: Value,
    /// Time from dispatch to answer.
    pub time: Duration,
}

/// Returns `true` for `null`, `""`, `[]` and `{}`.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Answers in completion order. Targets that missed the deadline are absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvokeResultSet {
    items: Vec<InvokeItem>,
}

impl InvokeResultSet {
    pub fn new(items: Vec<InvokeItem>) -> Self {
        Self { items }
    }

    /// The first responder, whatever it returned.
    pub fn first(&self) -> Option<&InvokeItem> {
        self.items.first()
    }

    /// The first responder with a non-empty result.
    pub fn one(&self) -> Option<&InvokeItem> {
        self.items.iter().find(|item| !is_empty_value(&item.result))
    }

    pub fn last(&self) -> Option<&InvokeItem> {
        self.items.last()
    }

    /// The answer from the process with the given logical name.
    pub fn by_name(&self, name: &str) -> Option<&InvokeItem> {
        self.items
            .iter()
            .find(|item| item.binding.process_name() == Some(name))
    }

    /// The answer from the process with the given id.
    pub fn by_id(&self, id: ProcessId) -> Option<&InvokeItem> {
        self.items.iter().find(|item| item.binding.id == id)
    }

    pub fn list(&self) -> &[InvokeItem] {
        &self.items
    }

    pub fn into_list(self) -> Vec<InvokeItem> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl IntoIterator for InvokeResultSet {
    type Item = InvokeItem;
    type IntoIter = std::vec::IntoIter<InvokeItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessHandle;
    use serde_json::json;

    fn item(id: ProcessId, name: &str, result: Value) -> InvokeItem {
        let handle = ProcessHandle::renderer(id, name);
        InvokeItem {
            binding: BindingInfo::new("ch", &handle),
            result,
            time: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_accessors() {
        let set = InvokeResultSet::new(vec![
            item(1, "a", Value::Null),
            item(2, "b", json!("")),
            item(3, "c", json!({"ok": true})),
            item(4, "d", json!(0)),
        ]);

        assert_eq!(set.first().unwrap().binding.id, 1);
        assert_eq!(set.one().unwrap().binding.id, 3);
        assert_eq!(set.last().unwrap().binding.id, 4);
        assert_eq!(set.by_name("b").unwrap().binding.id, 2);
        assert_eq!(set.by_id(4).unwrap().result, json!(0));
        assert!(set.by_name("zzz").is_none());
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_empty_set() {
        let set = InvokeResultSet::default();
        assert!(set.first().is_none());
        assert!(set.one().is_none());
        assert!(set.last().is_none());
        assert!(set.is_empty());
    }

    #[test]
    fn test_zero_and_false_are_not_empty() {
        assert!(!is_empty_value(&json!(false)));
        assert!(!is_empty_value(&json!(0)));
        assert!(is_empty_value(&json!([])));
    }
}
