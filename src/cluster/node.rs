//! Cluster node representation

use crate::config::NodeAddress;
use crate::utils::ClusterError;

/// In-flight slot move announced next to a node's ranges
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotMigration {
    /// `[slot->-target]`: keys are leaving this node
    Migrating { slot: u16, to: String },
    /// `[slot-<-source]`: keys are arriving on this node
    Importing { slot: u16, from: String },
}

/// Cluster node information
#[derive(Debug, Clone)]
pub struct ClusterNode {
    /// Node ID from CLUSTER NODES
    pub id: String,
    pub address: NodeAddress,
    /// Cluster bus port, when reported
    pub bus_port: Option<u16>,
    /// Is this a primary node?
    pub is_primary: bool,
    /// Primary node ID (if replica)
    pub primary_id: Option<String>,
    /// Owned slot ranges, inclusive (primaries only)
    pub slots: Vec<(u16, u16)>,
    /// Migration annotations; these never change ownership
    pub migrations: Vec<SlotMigration>,
    /// Node flags (myself, fail, handshake, ...)
    pub flags: Vec<String>,
    /// Link state is `connected`
    pub connected: bool,
}

impl ClusterNode {
    /// Usable as a routing target for optional traffic (replica reads, keyless commands)
    pub fn is_available(&self) -> bool {
        self.connected
            && !self
                .flags
                .iter()
                .any(|f| f == "fail" || f == "fail?" || f == "handshake" || f == "noaddr")
    }

    pub fn is_replica(&self) -> bool {
        !self.is_primary
    }

    pub fn is_myself(&self) -> bool {
        self.flags.iter().any(|f| f == "myself")
    }

    /// Number of slots owned
    pub fn slot_count(&self) -> usize {
        self.slots
            .iter()
            .map(|&(start, end)| (end - start) as usize + 1)
            .sum()
    }
}

/// Parse a line from CLUSTER NODES response
///
/// Format: `<id> <ip:port@cport> <flags> <master> <ping-sent> <pong-recv> <config-epoch> <link-state> <slot> <slot> ... <slot>`
///
/// `responder` fills in the host when a node reports its own address with an
/// empty host (`:7000@17000`), which happens before it learns its public IP.
///
/// Example:
/// ```text
/// 07c37dfeb235213a872192d90877d0cd55635b91 127.0.0.1:30004@31004 slave e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 0 1426238317239 4 connected
/// ```
pub fn parse_cluster_node_line(
    line: &str,
    responder: Option<&NodeAddress>,
) -> Result<ClusterNode, ClusterError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 8 {
        return Err(ClusterError::ParseFailed(format!(
            "expected at least 8 fields, got {}: {}",
            parts.len(),
            line
        )));
    }

    let id = parts[0].to_string();
    let (host, port, bus_port) = parse_node_address(parts[1])
        .ok_or_else(|| ClusterError::ParseFailed(format!("bad node address '{}'", parts[1])))?;

    let host = match (host.is_empty(), responder) {
        (true, Some(responder)) => responder.host.clone(),
        _ => host,
    };

    let flags: Vec<String> = parts[2].split(',').map(String::from).collect();
    let is_primary = flags.iter().any(|f| f == "master");

    let primary_id = if !is_primary && parts[3] != "-" {
        Some(parts[3].to_string())
    } else {
        None
    };

    let connected = parts[7] == "connected";

    let mut slots = Vec::new();
    let mut migrations = Vec::new();
    for &token in &parts[8..] {
        if token.starts_with('[') {
            migrations.push(parse_migration(token)?);
        } else {
            slots.push(parse_slot_range(token)?);
        }
    }

    Ok(ClusterNode {
        id,
        address: NodeAddress::new(host, port),
        bus_port,
        is_primary,
        primary_id,
        slots,
        migrations,
        flags,
        connected,
    })
}

/// Parse node address from CLUSTER NODES
/// Formats: "host:port@cport", "host:port", "host:port@cport,hostname"
fn parse_node_address(addr: &str) -> Option<(String, u16, Option<u16>)> {
    // Handle announced-hostname format: ip:port@cport,hostname
    let addr = addr.split(',').next().unwrap_or(addr);

    let (host_port, bus) = match addr.split_once('@') {
        Some((hp, bus)) => (hp, bus.parse().ok()),
        None => (addr, None),
    };

    let (host, port) = host_port.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;

    Some((host.to_string(), port, bus))
}

/// Parse slot range: "0-5460" or "0"
fn parse_slot_range(s: &str) -> Result<(u16, u16), ClusterError> {
    let bad = || ClusterError::ParseFailed(format!("bad slot range '{}'", s));
    let (start, end) = match s.split_once('-') {
        Some((start, end)) => (
            start.parse::<u16>().map_err(|_| bad())?,
            end.parse::<u16>().map_err(|_| bad())?,
        ),
        None => {
            let slot = s.parse::<u16>().map_err(|_| bad())?;
            (slot, slot)
        }
    };
    if start > end || end as usize >= super::slot::SLOT_COUNT {
        return Err(bad());
    }
    Ok((start, end))
}

/// Parse "[123->-node_id]" or "[123-<-node_id]"
fn parse_migration(s: &str) -> Result<SlotMigration, ClusterError> {
    let bad = || ClusterError::ParseFailed(format!("bad migration annotation '{}'", s));
    let inner = s
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(bad)?;

    if let Some((slot, to)) = inner.split_once("->-") {
        let slot = slot.parse().map_err(|_| bad())?;
        return Ok(SlotMigration::Migrating {
            slot,
            to: to.to_string(),
        });
    }
    if let Some((slot, from)) = inner.split_once("-<-") {
        let slot = slot.parse().map_err(|_| bad())?;
        return Ok(SlotMigration::Importing {
            slot,
            from: from.to_string(),
        });
    }
    Err(bad())
}
