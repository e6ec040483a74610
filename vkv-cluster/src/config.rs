// Immutable cluster-config snapshot and its copy-on-write update API
// (spec.md §4.9). `ClusterConfig` itself is a plain value type; all the
// mutating operations live on `ClusterConfigHandle`, which swaps a new
// `Arc<ClusterConfig>` in under a single CAS so concurrent readers
// (`load`) never observe a partially-applied update.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use vkv_base::NodeId;

pub const SLOT_COUNT: usize = 16384;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Role {
    Primary,
    Replica,
    Unassigned,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub node_id: NodeId,
    pub role: Role,
    pub address: String,
    pub port: u16,
    pub primary_of: Option<NodeId>,
    pub hostname: Option<String>,
    /// Per-worker config epoch, as carried in the gossiped table --
    /// distinct from `ClusterConfig::config_epoch`, which is only this
    /// local node's own epoch. The merge algorithm compares this field.
    pub config_epoch: u64,
}

impl Worker {
    pub fn unassigned(node_id: NodeId, address: String, port: u16) -> Self {
        Worker {
            node_id,
            role: Role::Unassigned,
            address,
            port,
            primary_of: None,
            hostname: None,
            config_epoch: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub local_node_id: NodeId,
    pub config_epoch: u64,
    pub current_config_epoch: u64,
    pub last_voted_epoch: u64,
    pub slots: Vec<Option<NodeId>>,
    pub workers: BTreeMap<NodeId, Worker>,
    /// node-id -> tick at which the ban lifts.
    pub banned: BTreeMap<NodeId, i64>,
}

impl ClusterConfig {
    pub fn new(local_node_id: NodeId, address: String, port: u16) -> Self {
        let mut workers = BTreeMap::new();
        workers.insert(
            local_node_id.clone(),
            Worker { role: Role::Unassigned, ..Worker::unassigned(local_node_id.clone(), address, port) },
        );
        ClusterConfig {
            local_node_id,
            config_epoch: 0,
            current_config_epoch: 0,
            last_voted_epoch: 0,
            slots: vec![None; SLOT_COUNT],
            workers,
            banned: BTreeMap::new(),
        }
    }

    pub fn local_worker(&self) -> &Worker {
        self.workers.get(&self.local_node_id).expect("local node always has a worker entry")
    }

    pub fn owner_of_slot(&self, slot: u16) -> Option<&NodeId> {
        self.slots.get(slot as usize).and_then(|o| o.as_ref())
    }

    fn owner_epoch(&self, node: &NodeId) -> u64 {
        self.workers.get(node).map(|w| w.config_epoch).unwrap_or(0)
    }

    /// The merge algorithm, spec.md §4.9: per worker, accept the version
    /// with the higher `config_epoch`; never overwrite the local node's
    /// own fields; ignore banned nodes entirely; slot ownership follows
    /// whichever primary's `config_epoch` is higher after the worker
    /// table merge, breaking an equal-epoch tie by the lower `NodeId` so
    /// the winner doesn't depend on merge order. Commutative and
    /// idempotent because every field it touches is resolved by a
    /// pairwise max (ties broken by a total order, not "whoever merged
    /// last").
    pub fn merge(&self, other: &ClusterConfig) -> ClusterConfig {
        let mut merged = self.clone();
        for (id, incoming) in &other.workers {
            if *id == self.local_node_id {
                continue;
            }
            if merged.banned.contains_key(id) || other.banned.contains_key(id) {
                continue;
            }
            let adopt = match merged.workers.get(id) {
                Some(existing) => incoming.config_epoch > existing.config_epoch,
                None => true,
            };
            if adopt {
                merged.workers.insert(id.clone(), incoming.clone());
            }
        }
        for (id, expiry) in &other.banned {
            merged.banned.entry(id.clone()).and_modify(|e| *e = (*e).max(*expiry)).or_insert(*expiry);
        }
        for slot in 0..SLOT_COUNT {
            let Some(other_owner) = other.owner_of_slot(slot as u16) else { continue };
            if merged.banned.contains_key(other_owner) {
                continue;
            }
            let other_epoch = other.owner_epoch(other_owner);
            let current_owner = merged.owner_of_slot(slot as u16).cloned();
            let current_epoch = current_owner.as_ref().map(|owner| merged.owner_epoch(owner)).unwrap_or(0);
            let adopt_other = match &current_owner {
                None => true,
                Some(current_owner) => {
                    other_epoch > current_epoch
                        || (other_epoch == current_epoch && other_owner < current_owner)
                }
            };
            if adopt_other {
                merged.slots[slot] = Some(other_owner.clone());
            }
        }
        merged.current_config_epoch = merged.current_config_epoch.max(other.current_config_epoch);
        merged
    }
}

pub struct ClusterConfigHandle {
    current: ArcSwap<ClusterConfig>,
}

impl ClusterConfigHandle {
    pub fn new(initial: ClusterConfig) -> Self {
        ClusterConfigHandle { current: ArcSwap::from_pointee(initial) }
    }

    pub fn load(&self) -> Arc<ClusterConfig> {
        self.current.load_full()
    }

    pub fn initialize_local_worker(&self, address: String, port: u16) {
        self.current.rcu(|cur| {
            let mut cfg = (**cur).clone();
            let id = cfg.local_node_id.clone();
            cfg.workers.insert(
                id.clone(),
                Worker { address: address.clone(), port, ..Worker::unassigned(id, address.clone(), port) },
            );
            cfg
        });
    }

    pub fn add_worker(&self, worker: Worker) {
        self.current.rcu(|cur| {
            let mut cfg = (**cur).clone();
            cfg.workers.insert(worker.node_id.clone(), worker.clone());
            cfg
        });
    }

    /// Removes a peer and bans it from re-admission until `now + expiry_ticks`.
    pub fn remove_worker(&self, node_id: &NodeId, expiry_ticks: i64, now: i64) {
        self.current.rcu(|cur| {
            let mut cfg = (**cur).clone();
            cfg.workers.remove(node_id);
            cfg.banned.insert(node_id.clone(), now + expiry_ticks);
            cfg
        });
    }

    pub fn make_replica_of(&self, primary_id: NodeId) {
        self.current.rcu(|cur| {
            let mut cfg = (**cur).clone();
            let local = cfg.local_node_id.clone();
            if let Some(w) = cfg.workers.get_mut(&local) {
                w.role = Role::Replica;
                w.primary_of = Some(primary_id.clone());
            }
            cfg
        });
    }

    pub fn bump_config_epoch(&self) -> u64 {
        let updated = self.current.rcu(|cur| {
            let mut cfg = (**cur).clone();
            cfg.config_epoch += 1;
            cfg.current_config_epoch = cfg.current_config_epoch.max(cfg.config_epoch);
            let local = cfg.local_node_id.clone();
            if let Some(w) = cfg.workers.get_mut(&local) {
                w.config_epoch = cfg.config_epoch;
            }
            cfg
        });
        updated.config_epoch
    }

    pub fn assign_slot(&self, slot: u16, owner: NodeId) {
        self.current.rcu(|cur| {
            let mut cfg = (**cur).clone();
            cfg.slots[slot as usize] = Some(owner.clone());
            cfg
        });
    }

    /// Promotes `node_id` (expected to be a replica) to Primary,
    /// transferring its former primary's slots to it and demoting that
    /// former primary to Replica-of-`node_id`. Used both by an operator
    /// driving `CLUSTER FAILOVER` manually and by `vkv-gossip`'s failover
    /// state machine on self-promotion.
    pub fn promote_to_primary(&self, node_id: &NodeId) {
        self.current.rcu(|cur| {
            let mut cfg = (**cur).clone();
            let old_primary = cfg.workers.get(node_id).and_then(|w| w.primary_of.clone());
            cfg.config_epoch += 1;
            cfg.current_config_epoch = cfg.current_config_epoch.max(cfg.config_epoch);
            let new_epoch = cfg.config_epoch;
            if let Some(w) = cfg.workers.get_mut(node_id) {
                w.role = Role::Primary;
                w.primary_of = None;
                w.config_epoch = new_epoch;
            }
            if let Some(old_id) = &old_primary {
                for slot in cfg.slots.iter_mut() {
                    if slot.as_ref() == Some(old_id) {
                        *slot = Some(node_id.clone());
                    }
                }
                if let Some(old_worker) = cfg.workers.get_mut(old_id) {
                    old_worker.role = Role::Replica;
                    old_worker.primary_of = Some(node_id.clone());
                }
            }
            cfg
        });
    }

    pub fn merge(&self, other: &ClusterConfig) {
        self.current.rcu(|cur| cur.merge(other));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn node(s: &str) -> NodeId {
        NodeId(s.to_string())
    }

    fn base_config() -> ClusterConfig {
        ClusterConfig::new(node("local"), "127.0.0.1".into(), 7000)
    }

    fn worker(id: &str, role: Role, epoch: u64) -> Worker {
        Worker { role, config_epoch: epoch, ..Worker::unassigned(node(id), "10.0.0.1".into(), 7001) }
    }

    #[test]
    fn merge_adopts_higher_epoch_worker() {
        let local = base_config();
        let mut other = base_config();
        other.workers.insert(node("peer"), worker("peer", Role::Primary, 5));
        let merged = local.merge(&other);
        assert_eq!(merged.workers.get(&node("peer")).unwrap().config_epoch, 5);
    }

    #[test]
    fn merge_keeps_higher_epoch_on_conflicting_duplicate_node_id() {
        let mut local = base_config();
        local.workers.insert(node("peer"), worker("peer", Role::Primary, 9));
        let mut other = base_config();
        other.workers.insert(node("peer"), worker("peer", Role::Replica, 3));
        let merged = local.merge(&other);
        assert_eq!(merged.workers.get(&node("peer")).unwrap().config_epoch, 9);
        assert_eq!(merged.workers.get(&node("peer")).unwrap().role, Role::Primary);
    }

    #[test]
    fn merge_never_overwrites_local_node_fields() {
        let local = base_config();
        let mut other = base_config();
        other.workers.insert(node("local"), worker("local", Role::Primary, 999));
        let merged = local.merge(&other);
        assert_eq!(merged.local_worker().role, Role::Unassigned);
    }

    #[test]
    fn merge_is_commutative_under_epoch_max() {
        let base = base_config();
        let mut d1 = base_config();
        d1.workers.insert(node("a"), worker("a", Role::Primary, 3));
        d1.slots[0] = Some(node("a"));
        let mut d2 = base_config();
        d2.workers.insert(node("a"), worker("a", Role::Primary, 7));
        d2.slots[0] = Some(node("a"));
        d2.workers.insert(node("b"), worker("b", Role::Primary, 2));

        let order_a = base.merge(&d1).merge(&d2);
        let order_b = base.merge(&d2).merge(&d1);
        assert_eq!(order_a.workers, order_b.workers);
        assert_eq!(order_a.slots, order_b.slots);
        assert_eq!(order_a.current_config_epoch, order_b.current_config_epoch);
    }

    #[test]
    fn merge_breaks_equal_epoch_slot_ties_by_node_id_regardless_of_order() {
        // Two distinct owners claim slot 0 at the same config_epoch --
        // commutativity requires both merge orders to agree on a winner.
        let base = base_config();
        let mut d1 = base_config();
        d1.workers.insert(node("a"), worker("a", Role::Primary, 4));
        d1.slots[0] = Some(node("a"));
        let mut d2 = base_config();
        d2.workers.insert(node("b"), worker("b", Role::Primary, 4));
        d2.slots[0] = Some(node("b"));

        let order_a = base.merge(&d1).merge(&d2);
        let order_b = base.merge(&d2).merge(&d1);
        assert_eq!(order_a.owner_of_slot(0), order_b.owner_of_slot(0));
        assert_eq!(order_a.owner_of_slot(0), Some(&node("a")));
    }

    #[test]
    fn merge_ignores_banned_nodes() {
        let mut local = base_config();
        local.banned.insert(node("evil"), i64::MAX);
        let mut other = base_config();
        other.workers.insert(node("evil"), worker("evil", Role::Primary, 100));
        let merged = local.merge(&other);
        assert!(!merged.workers.contains_key(&node("evil")));
    }

    #[test]
    fn promote_to_primary_transfers_old_primarys_slots() {
        let handle = ClusterConfigHandle::new({
            let mut cfg = ClusterConfig::new(node("replica"), "127.0.0.1".into(), 7000);
            cfg.workers.insert(node("primary"), worker("primary", Role::Primary, 1));
            if let Some(w) = cfg.workers.get_mut(&node("replica")) {
                w.role = Role::Replica;
                w.primary_of = Some(node("primary"));
            }
            cfg.slots[0] = Some(node("primary"));
            cfg.slots[1] = Some(node("primary"));
            cfg
        });
        let before_epoch = handle.load().config_epoch;
        handle.promote_to_primary(&node("replica"));
        let after = handle.load();
        assert!(after.config_epoch > before_epoch);
        assert_eq!(after.local_worker().role, Role::Primary);
        assert_eq!(after.owner_of_slot(0), Some(&node("replica")));
        assert_eq!(after.owner_of_slot(1), Some(&node("replica")));
        assert_eq!(after.workers.get(&node("primary")).unwrap().role, Role::Replica);
        assert_eq!(after.workers.get(&node("primary")).unwrap().primary_of, Some(node("replica")));
    }
}
