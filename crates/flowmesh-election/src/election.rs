//! Per-job election tick over the worker's child edges.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use flowmesh_core::{Edge, JobId, LockKey, PipelineNode, Role, WorkerId};
use flowmesh_store::CoordStore;

/// A role decision the caller must apply: bind a new adapter, or upgrade
/// an existing slave to master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleChange {
    pub edge: Edge,
    pub role: Role,
    /// True when an existing slave won the lock and took over.
    pub upgraded: bool,
}

/// Lock-based election over one worker's child edges.
pub struct Election {
    store: Arc<dyn CoordStore>,
    job_id: JobId,
    worker_id: WorkerId,
    node: PipelineNode,
    roles: HashMap<Edge, Role>,
}

impl Election {
    pub fn new(
        store: Arc<dyn CoordStore>,
        job_id: &str,
        worker_id: &str,
        node: PipelineNode,
    ) -> Self {
        Self {
            store,
            job_id: job_id.to_string(),
            worker_id: worker_id.to_string(),
            node,
            roles: HashMap::new(),
        }
    }

    /// One acquisition round over every child edge.
    ///
    /// Returns only *changes*: the first role seen for an edge, and
    /// slave-to-master upgrades. A sitting master that loses the lock
    /// stays master and produces no change. A store error skips that edge
    /// for this tick; the next tick retries.
    pub async fn tick(&mut self) -> Vec<RoleChange> {
        let mut changes = Vec::new();

        for child in self.node.children.clone() {
            let edge = Edge::new(&self.node.node_name, &child);
            let key = LockKey::new(&self.job_id, &edge.source, &edge.target);

            let acquired = match self.store.acquire_lock(&key, &self.worker_id).await {
                Ok(acquired) => acquired,
                Err(e) => {
                    warn!(lock = %key.path(), error = %e, "lock attempt failed, edge skipped");
                    continue;
                }
            };

            match self.roles.get(&edge) {
                None => {
                    let role = if acquired { Role::Master } else { Role::Slave };
                    info!(
                        job = %self.job_id,
                        edge = %key.path(),
                        ?role,
                        "edge role decided"
                    );
                    self.roles.insert(edge.clone(), role);
                    changes.push(RoleChange {
                        edge,
                        role,
                        upgraded: false,
                    });
                }
                Some(Role::Slave) if acquired => {
                    info!(job = %self.job_id, edge = %key.path(), "slave promoted to master");
                    self.roles.insert(edge.clone(), Role::Master);
                    changes.push(RoleChange {
                        edge,
                        role: Role::Master,
                        upgraded: true,
                    });
                }
                Some(Role::Master) if !acquired => {
                    // Sticky master: losing a renewal does not demote.
                    debug!(edge = %key.path(), "master lost the lock attempt, keeping role");
                }
                _ => {}
            }
        }

        changes
    }

    /// Current role for an edge, if one has been decided.
    pub fn role(&self, edge: &Edge) -> Option<Role> {
        self.roles.get(edge).copied()
    }

    /// Every decided role. Callers re-apply the whole set after a tick, so
    /// an application that failed once is retried on the next round.
    pub fn roles(&self) -> Vec<(Edge, Role)> {
        self.roles.iter().map(|(e, r)| (e.clone(), *r)).collect()
    }

    /// Give up every mastered edge. Release failures are logged and left
    /// to lease expiry; nothing retries them.
    pub async fn release_all(&mut self) {
        for (edge, role) in self.roles.drain() {
            if role != Role::Master {
                continue;
            }
            let key = LockKey::new(&self.job_id, &edge.source, &edge.target);
            if let Err(e) = self.store.release_lock(&key, &self.worker_id).await {
                debug!(lock = %key.path(), error = %e, "lock release failed, lease will expire");
            }
        }
    }
}
