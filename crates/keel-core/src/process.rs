//! Addressable process handles and the table that tracks live ones.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Numeric identifier of a routable process. [`MAIN_PROCESS_ID`] is the main process.
pub type ProcessId = i64;

/// Identifier reserved for the main process.
pub const MAIN_PROCESS_ID: ProcessId = -1;

/// Logical name given to the main process.
pub const MAIN_PROCESS_NAME: &str = "main";

/// Which side of the main/renderer split a process runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessRole {
    Main,
    Renderer,
}

impl ProcessRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Renderer => "renderer",
        }
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing metadata for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessHandle {
    pub id: ProcessId,
    pub is_main_process: bool,
    pub name: String,
    pub web_content_id: ProcessId,
}

impl ProcessHandle {
    /// The handle of the main process.
    pub fn main() -> Self {
        Self {
            id: MAIN_PROCESS_ID,
            is_main_process: true,
            name: MAIN_PROCESS_NAME.to_string(),
            web_content_id: MAIN_PROCESS_ID,
        }
    }

    /// A renderer-style process; its content id doubles as its routing id.
    pub fn renderer(id: ProcessId, name: impl Into<String>) -> Self {
        Self {
            id,
            is_main_process: false,
            name: name.into(),
            web_content_id: id,
        }
    }

    pub fn role(&self) -> ProcessRole {
        if self.is_main_process {
            ProcessRole::Main
        } else {
            ProcessRole::Renderer
        }
    }
}

/// Table of live processes keyed by name.
///
/// Entries are inserted when a process is created and removed when it
/// terminates. Lookups by id scan the table; it never holds more than a
/// handful of windows.
#[derive(Debug, Default)]
pub struct ProcessTable {
    processes: RwLock<HashMap<String, ProcessHandle>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a handle, returning the one it replaced under the same name.
    pub fn insert(&self, handle: ProcessHandle) -> Option<ProcessHandle> {
        debug!(process = %handle.name, id = handle.id, "Process registered");
        self.processes.write().insert(handle.name.clone(), handle)
    }

    pub fn remove(&self, name: &str) -> Option<ProcessHandle> {
        let removed = self.processes.write().remove(name);
        if let Some(ref handle) = removed {
            debug!(process = %handle.name, id = handle.id, "Process removed");
        }
        removed
    }

    pub fn by_name(&self, name: &str) -> Option<ProcessHandle> {
        self.processes.read().get(name).cloned()
    }

    pub fn by_id(&self, id: ProcessId) -> Option<ProcessHandle> {
        self.processes
            .read()
            .values()
            .find(|handle| handle.id == id)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processes.read().contains_key(name)
    }

    /// All live handles, sorted by id.
    pub fn list(&self) -> Vec<ProcessHandle> {
        let mut handles: Vec<_> = self.processes.read().values().cloned().collect();
        handles.sort_by_key(|handle| handle.id);
        handles
    }

    pub fn len(&self) -> usize {
        self.processes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_handle() {
        let main = ProcessHandle::main();
        assert_eq!(main.id, MAIN_PROCESS_ID);
        assert_eq!(main.role(), ProcessRole::Main);
        assert_eq!(main.name, "main");
    }

    #[test]
    fn test_table_lookup_by_id_and_name() {
        let table = ProcessTable::new();
        table.insert(ProcessHandle::main());
        table.insert(ProcessHandle::renderer(3, "settings"));

        assert_eq!(table.by_id(3).map(|h| h.name), Some("settings".to_string()));
        assert_eq!(table.by_name("main").map(|h| h.id), Some(-1));
        assert_eq!(table.list().len(), 2);

        table.remove("settings");
        assert!(table.by_id(3).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_handle_serializes_camel_case() {
        let value = serde_json::to_value(ProcessHandle::renderer(2, "editor")).unwrap();
        assert_eq!(value["isMainProcess"], false);
        assert_eq!(value["webContentId"], 2);
    }
}
