//! Cluster topology parsed from one CLUSTER NODES reply

use std::collections::HashMap;

use tracing::debug;

use super::node::{parse_cluster_node_line, ClusterNode};
use super::slot::SLOT_COUNT;
use crate::config::NodeAddress;
use crate::utils::ClusterError;

/// Immutable slot-to-node view of the cluster
#[derive(Debug, Clone)]
pub struct ClusterTopology {
    /// All addressable nodes in the cluster
    nodes: Vec<ClusterNode>,
    /// Slot to node index mapping
    slot_map: Vec<Option<usize>>,
    /// Primary node indices
    primary_indices: Vec<usize>,
    /// Replica node indices grouped by primary ID
    replica_map: HashMap<String, Vec<usize>>,
}

impl ClusterTopology {
    /// Parse CLUSTER NODES response
    ///
    /// Only plain slot ranges assign ownership; migration annotations leave
    /// the slot with the node that lists it as a range.
    pub fn from_cluster_nodes(
        response: &str,
        responder: Option<&NodeAddress>,
    ) -> Result<Self, ClusterError> {
        let mut nodes = Vec::new();
        let mut slot_map = vec![None; SLOT_COUNT];
        let mut primary_indices = Vec::new();
        let mut replica_map: HashMap<String, Vec<usize>> = HashMap::new();

        for line in response.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let node = parse_cluster_node_line(line, responder)?;

            // Nodes still in handshake or without a known address cannot be dialled
            if node.address.port == 0 || node.flags.iter().any(|f| f == "noaddr" || f == "handshake") {
                debug!("Skipping unaddressable cluster node {}", node.id);
                continue;
            }

            let idx = nodes.len();
            if node.is_primary {
                primary_indices.push(idx);
                for &(start, end) in &node.slots {
                    for slot in start..=end {
                        slot_map[slot as usize] = Some(idx);
                    }
                }
                replica_map.entry(node.id.clone()).or_default();
            }

            nodes.push(node);
        }

        // Map replicas to primaries
        for (idx, node) in nodes.iter().enumerate() {
            if let Some(ref primary_id) = node.primary_id {
                if let Some(replicas) = replica_map.get_mut(primary_id) {
                    replicas.push(idx);
                }
            }
        }

        if primary_indices.is_empty() {
            return Err(ClusterError::NoPrimaries);
        }

        Ok(Self {
            nodes,
            slot_map,
            primary_indices,
            replica_map,
        })
    }

    /// Topology with no nodes and no assigned slots
    pub fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            slot_map: vec![None; SLOT_COUNT],
            primary_indices: Vec::new(),
            replica_map: HashMap::new(),
        }
    }

    /// Get node owning a slot
    pub fn owner(&self, slot: u16) -> Option<&ClusterNode> {
        self.slot_map
            .get(slot as usize)
            .copied()
            .flatten()
            .map(|idx| &self.nodes[idx])
    }

    pub fn owner_address(&self, slot: u16) -> Option<&NodeAddress> {
        self.owner(slot).map(|n| &n.address)
    }

    /// Get all primary nodes
    pub fn primaries(&self) -> impl Iterator<Item = &ClusterNode> {
        self.primary_indices.iter().map(|&idx| &self.nodes[idx])
    }

    /// Get replicas for a primary
    pub fn replicas_of(&self, primary_id: &str) -> Vec<&ClusterNode> {
        self.replica_map
            .get(primary_id)
            .map(|indices| indices.iter().map(|&idx| &self.nodes[idx]).collect())
            .unwrap_or_default()
    }

    /// Every addressable node, primaries and replicas
    pub fn nodes(&self) -> &[ClusterNode] {
        &self.nodes
    }

    pub fn node_by_address(&self, address: &NodeAddress) -> Option<&ClusterNode> {
        self.nodes.iter().find(|n| &n.address == address)
    }

    /// Get number of primary nodes
    pub fn num_primaries(&self) -> usize {
        self.primary_indices.len()
    }

    /// Get total number of nodes
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Slots no primary claims
    pub fn unassigned_slots(&self) -> usize {
        self.slot_map.iter().filter(|s| s.is_none()).count()
    }

    /// Fail when any slot is unassigned
    pub fn check_coverage(&self) -> Result<(), ClusterError> {
        match self.unassigned_slots() {
            0 => Ok(()),
            unassigned => Err(ClusterError::IncompleteCoverage { unassigned }),
        }
    }
}
