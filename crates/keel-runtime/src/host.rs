//! Hosting of in-process endpoints.
//!
//! [`ProcessHost`] owns the [`Bus`], the main router and one router per
//! renderer. Renderers are created and torn down at runtime; the main
//! process lives as long as the host.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use keel_core::{Bus, IpcRouter, MAIN_PROCESS_ID, ProcessHandle, ProcessId, ProcessTable};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::context::Context;
use crate::error::{RuntimeError, RuntimeResult};

struct Hosted {
    router: IpcRouter,
    task: JoinHandle<()>,
}

/// Owns every endpoint of one application.
pub struct ProcessHost {
    bus: Arc<Bus>,
    main: IpcRouter,
    table: ProcessTable,
    routers: RwLock<HashMap<ProcessId, Hosted>>,
    next_id: AtomicI64,
    timeout: Duration,
}

impl ProcessHost {
    /// Starts the main endpoint. Every router uses `timeout` as its default
    /// `invoke` deadline.
    pub fn new(timeout: Duration) -> Self {
        let bus = Arc::new(Bus::new());
        let main = IpcRouter::main(bus.clone());
        main.set_timeout(timeout);
        let task = main.serve(bus.attach(MAIN_PROCESS_ID));

        let table = ProcessTable::new();
        table.insert(main.process().clone());

        let mut routers = HashMap::new();
        routers.insert(
            MAIN_PROCESS_ID,
            Hosted {
                router: main.clone(),
                task,
            },
        );
        info!(timeout_ms = timeout.as_millis() as u64, "Process host started");

        Self {
            bus,
            main,
            table,
            routers: RwLock::new(routers),
            next_id: AtomicI64::new(1),
            timeout,
        }
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    /// Context of the main process.
    pub fn main(&self) -> Context {
        Context::new(self.main.clone())
    }

    fn router(&self, id: ProcessId) -> Option<IpcRouter> {
        self.routers.read().get(&id).map(|hosted| hosted.router.clone())
    }

    /// Starts a renderer endpoint named `name`.
    pub fn spawn(&self, name: &str) -> RuntimeResult<Context> {
        if self.table.contains(name) {
            return Err(RuntimeError::ProcessExists(name.to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = ProcessHandle::renderer(id, name);
        let router = IpcRouter::new(handle.clone(), self.bus.clone());
        router.set_timeout(self.timeout);
        let task = router.serve(self.bus.attach(id));

        self.table.insert(handle);
        self.routers.write().insert(
            id,
            Hosted {
                router: router.clone(),
                task,
            },
        );
        info!(process = %name, id, "Renderer started");
        Ok(Context::new(router))
    }

    /// Context of a live process.
    pub fn get(&self, name: &str) -> Option<Context> {
        let handle = self.table.by_name(name)?;
        self.router(handle.id).map(Context::new)
    }

    /// Stops renderer `name`: its shared bindings are purged and its
    /// endpoint detached.
    pub async fn kill(&self, name: &str) -> RuntimeResult<()> {
        let handle = self
            .table
            .by_name(name)
            .filter(|handle| !handle.is_main_process)
            .ok_or_else(|| RuntimeError::ProcessNotFound(name.to_string()))?;

        self.main.clear(Some(handle.id)).await;
        self.table.remove(name);
        self.bus.detach(handle.id);
        if let Some(hosted) = self.routers.write().remove(&handle.id) {
            hosted.task.abort();
        }
        info!(process = %name, id = handle.id, "Renderer stopped");
        Ok(())
    }

    /// Stops every renderer.
    pub async fn kill_all(&self) {
        let renderers: Vec<String> = self
            .table
            .list()
            .into_iter()
            .filter(|handle| !handle.is_main_process)
            .map(|handle| handle.name)
            .collect();
        debug!(count = renderers.len(), "Stopping renderers");
        for name in renderers {
            // A concurrent kill may have stopped it first.
            if let Err(e) = self.kill(&name).await {
                debug!(process = %name, error = %e, "Renderer already gone");
            }
        }
    }

    pub fn processes(&self) -> Vec<ProcessHandle> {
        self.table.list()
    }

    pub fn stats(&self) -> HostStats {
        let routers = self.routers.read();
        HostStats {
            processes: routers.len(),
            renderers: routers.keys().filter(|id| **id != MAIN_PROCESS_ID).count(),
            pending: routers.values().map(|hosted| hosted.router.pending_count()).sum(),
        }
    }
}

impl Drop for ProcessHost {
    fn drop(&mut self) {
        for hosted in self.routers.get_mut().values() {
            hosted.task.abort();
        }
    }
}

/// Snapshot of a [`ProcessHost`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostStats {
    /// Hosted endpoints including main.
    pub processes: usize,
    pub renderers: usize,
    /// Cross-process calls still awaiting an answer.
    pub pending: usize,
}

impl fmt::Display for HostStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processes: {} ({} renderers), {} pending calls",
            self.processes, self.renderers, self.pending
        )
    }
}
