//! The authoritative channel-to-bindings table.
//!
//! Exactly one [`BindingRegistry`] exists per application and it lives in the
//! main process. Renderer processes never touch it directly; they go through
//! the `get-ipc` / `add-ipc` / `remove-ipc` housekeeping channels.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, error};

use super::binding::BindingInfo;
use crate::process::ProcessId;

/// Snapshot of the registry as sent over the wire.
pub type BindingMap = HashMap<String, Vec<BindingInfo>>;

/// Ordered bindings per channel. At most one binding per (channel, process).
#[derive(Debug, Default)]
pub struct BindingRegistry {
    channels: RwLock<BindingMap>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a binding. Returns `false` if its process already has one on
    /// that channel.
    pub fn add(&self, binding: BindingInfo) -> bool {
        let mut channels = self.channels.write();
        let list = channels.entry(binding.name.clone()).or_default();
        if list.iter().any(|existing| existing.id == binding.id) {
            error!(
                channel = %binding.name,
                process = binding.id,
                "IPC binding already exists for this process"
            );
            return false;
        }
        debug!(channel = %binding.name, process = binding.id, "IPC binding added");
        list.push(binding);
        true
    }

    /// Removes the binding of process `id` on `channel`.
    pub fn remove(&self, channel: &str, id: ProcessId) -> bool {
        let mut channels = self.channels.write();
        let Some(list) = channels.get_mut(channel) else {
            return false;
        };
        let Some(pos) = list.iter().position(|binding| binding.id == id) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            channels.remove(channel);
        }
        debug!(channel = %channel, process = id, "IPC binding removed");
        true
    }

    /// Drops every binding owned by process `id`. Returns how many went.
    pub fn remove_process(&self, id: ProcessId) -> usize {
        let mut channels = self.channels.write();
        let mut removed = 0;
        channels.retain(|_, list| {
            let before = list.len();
            list.retain(|binding| binding.id != id);
            removed += before - list.len();
            !list.is_empty()
        });
        if removed > 0 {
            debug!(process = id, count = removed, "IPC bindings cleared for process");
        }
        removed
    }

    /// Bindings on `channel` in registration order.
    pub fn get(&self, channel: &str) -> Vec<BindingInfo> {
        self.channels
            .read()
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }

    /// Full copy of the table.
    pub fn snapshot(&self) -> BindingMap {
        self.channels.read().clone()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Total number of bindings across all channels.
    pub fn len(&self) -> usize {
        self.channels.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessHandle;

    fn binding(channel: &str, id: ProcessId) -> BindingInfo {
        let handle = if id == -1 {
            ProcessHandle::main()
        } else {
            ProcessHandle::renderer(id, format!("win{id}"))
        };
        BindingInfo::new(channel, &handle)
    }

    #[test]
    fn test_duplicate_binding_rejected() {
        let registry = BindingRegistry::new();
        assert!(registry.add(binding("ping", 1)));
        assert!(!registry.add(binding("ping", 1)));
        assert!(registry.add(binding("ping", 2)));
        assert_eq!(registry.get("ping").len(), 2);
    }

    #[test]
    fn test_registration_order_preserved() {
        let registry = BindingRegistry::new();
        for id in [3, 1, 2] {
            registry.add(binding("ch", id));
        }
        let ids: Vec<_> = registry.get("ch").iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn test_remove_drops_empty_channel() {
        let registry = BindingRegistry::new();
        registry.add(binding("ch", 1));
        assert!(registry.remove("ch", 1));
        assert!(!registry.remove("ch", 1));
        assert_eq!(registry.channel_count(), 0);
    }

    #[test]
    fn test_remove_process_clears_all_channels() {
        let registry = BindingRegistry::new();
        registry.add(binding("a", 5));
        registry.add(binding("b", 5));
        registry.add(binding("b", -1));

        assert_eq!(registry.remove_process(5), 2);
        assert!(registry.get("a").is_empty());
        assert_eq!(registry.get("b").len(), 1);
        assert_eq!(registry.len(), 1);
    }
}
