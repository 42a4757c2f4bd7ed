//! `ClusterOps` — the narrow interface the controller consumes (spec §4.1
//! "Cluster abstraction"). The backing container-orchestration API is an
//! external collaborator (spec §1); this crate ships only what's needed for
//! a runnable binary: an in-memory fake for tests and a process-based
//! implementation that spawns/kills `exchange-worker` child processes,
//! rather than inventing a fake Kubernetes client.

use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::worker_spec::WorkerSpec;

#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// Idempotent: starting an already-running worker is success (spec §4.1 step 4).
    async fn start(&self, spec: WorkerSpec) -> anyhow::Result<()>;
    /// Idempotent: stopping a worker that doesn't exist is success (spec §4.1 step 5).
    async fn stop(&self, exch_id: &str) -> anyhow::Result<()>;
    async fn list(&self) -> anyhow::Result<HashSet<String>>;
    async fn healthy(&self, exch_id: &str) -> anyhow::Result<bool>;
}

/// In-memory fake used by tests and local development without spawning
/// real processes.
#[derive(Default)]
pub struct InMemoryClusterOps {
    running: Mutex<HashMap<String, WorkerSpec>>,
}

impl InMemoryClusterOps {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ClusterOps for InMemoryClusterOps {
    async fn start(&self, spec: WorkerSpec) -> anyhow::Result<()> {
        self.running.lock().await.insert(spec.exch_id.clone(), spec);
        Ok(())
    }

    async fn stop(&self, exch_id: &str) -> anyhow::Result<()> {
        self.running.lock().await.remove(exch_id);
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<HashSet<String>> {
        Ok(self.running.lock().await.keys().cloned().collect())
    }

    async fn healthy(&self, exch_id: &str) -> anyhow::Result<bool> {
        Ok(self.running.lock().await.contains_key(exch_id))
    }
}

/// Spawns the `exchange-worker` binary as a child process per `exch_id`,
/// passing `WorkerSpec::env` through the process environment. Healthy is
/// approximated by "the child hasn't exited"; a real readiness probe would
/// hit the worker's `/healthz`, but that endpoint is reachable only once
/// the lifecycle and market crates share a deployment topology, which is
/// out of scope here.
pub struct ProcessClusterOps {
    binary_path: String,
    children: Mutex<HashMap<String, Child>>,
}

impl ProcessClusterOps {
    pub fn new(binary_path: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            binary_path: binary_path.into(),
            children: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl ClusterOps for ProcessClusterOps {
    async fn start(&self, spec: WorkerSpec) -> anyhow::Result<()> {
        let mut children = self.children.lock().await;
        if let Some(child) = children.get_mut(&spec.exch_id) {
            if matches!(child.try_wait(), Ok(None)) {
                return Ok(());
            }
        }

        let mut cmd = Command::new(&self.binary_path);
        cmd.envs(spec.env.iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = cmd.spawn()?;
        children.insert(spec.exch_id, child);
        Ok(())
    }

    async fn stop(&self, exch_id: &str) -> anyhow::Result<()> {
        let mut children = self.children.lock().await;
        if let Some(mut child) = children.remove(exch_id) {
            child.kill().await.or_else(|e| {
                if e.kind() == std::io::ErrorKind::InvalidInput {
                    Ok(())
                } else {
                    Err(e)
                }
            })?;
        }
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<HashSet<String>> {
        let mut children = self.children.lock().await;
        let mut alive = HashSet::new();
        for (exch_id, child) in children.iter_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                alive.insert(exch_id.clone());
            }
        }
        Ok(alive)
    }

    async fn healthy(&self, exch_id: &str) -> anyhow::Result<bool> {
        let mut children = self.children.lock().await;
        Ok(children
            .get_mut(exch_id)
            .is_some_and(|child| matches!(child.try_wait(), Ok(None))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str) -> WorkerSpec {
        WorkerSpec {
            exch_id: id.to_string(),
            resource_name: format!("exchange-service-{id}"),
            image: "test".to_string(),
            cpu_request: "100m".to_string(),
            memory_request: "128Mi".to_string(),
            env: vec![],
            ports: vec![],
        }
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let ops = InMemoryClusterOps::new();
        ops.start(spec("e1")).await.unwrap();
        ops.start(spec("e1")).await.unwrap();
        assert_eq!(ops.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let ops = InMemoryClusterOps::new();
        ops.start(spec("e1")).await.unwrap();
        ops.stop("e1").await.unwrap();
        ops.stop("e1").await.unwrap();
        assert!(ops.list().await.unwrap().is_empty());
    }
}
