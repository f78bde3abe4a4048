//! In-process RESP servers for tests
//!
//! `MockNode` accepts TCP connections on an ephemeral port and answers each
//! decoded command through a closure; returning `None` from the closure drops
//! the connection. `ASKING` and `READONLY` are handled per connection so tests
//! can assert on the handshake. `MockCluster` wires several nodes to one shared
//! slot layout and key/value store and answers `MOVED` for slots a node does
//! not own.

use std::collections::HashMap;
use std::io::{BufReader, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};

use crate::cluster::slot::{slot_for_key, SLOT_COUNT};
use crate::config::NodeAddress;
use crate::utils::{RespDecoder, RespEncoder, RespValue};

/// Per-connection state visible to handlers
#[derive(Debug, Default, Clone)]
pub struct ConnState {
    /// Set by `ASKING`, cleared after the following command
    pub asking: bool,
    /// Set by `READONLY`
    pub readonly: bool,
}

type Handler = Arc<dyn Fn(&mut ConnState, &[String]) -> Option<RespValue> + Send + Sync>;

struct Shared {
    log: Mutex<Vec<Vec<String>>>,
    streams: Mutex<Vec<TcpStream>>,
    stopped: AtomicBool,
    accepted: AtomicUsize,
}

pub struct MockNode {
    address: NodeAddress,
    shared: Arc<Shared>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl MockNode {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&mut ConnState, &[String]) -> Option<RespValue> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handler: Handler = Arc::new(handler);
        let shared = Arc::new(Shared {
            log: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            accepted: AtomicUsize::new(0),
        });

        let accept_shared = Arc::clone(&shared);
        let accept_thread = thread::spawn(move || {
            for stream in listener.incoming() {
                if accept_shared.stopped.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(stream) = stream else { continue };
                accept_shared.accepted.fetch_add(1, Ordering::SeqCst);
                if let Ok(clone) = stream.try_clone() {
                    accept_shared.streams.lock().push(clone);
                }
                let shared = Arc::clone(&accept_shared);
                let handler = Arc::clone(&handler);
                thread::spawn(move || serve(stream, shared, handler));
            }
        });

        Self {
            address: NodeAddress::new("127.0.0.1", port),
            shared,
            accept_thread: Mutex::new(Some(accept_thread)),
        }
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// Every command received, in arrival order
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.shared.log.lock().clone()
    }

    /// Number of received commands named `name`
    pub fn count(&self, name: &str) -> usize {
        self.shared
            .log
            .lock()
            .iter()
            .filter(|args| args[0].eq_ignore_ascii_case(name))
            .count()
    }

    /// Number of accepted TCP connections
    pub fn connections(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    pub fn clear_log(&self) {
        self.shared.log.lock().clear();
    }

    /// Close the listener and every open connection; later connects are refused
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for stream in self.shared.streams.lock().drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
        // wake the accept loop so it observes the flag and drops the listener
        let _ = TcpStream::connect(("127.0.0.1", self.address.port));
        if let Some(handle) = self.accept_thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(stream: TcpStream, shared: Arc<Shared>, handler: Handler) {
    let Ok(read_half) = stream.try_clone() else {
        return;
    };
    let mut decoder = RespDecoder::new(BufReader::new(read_half));
    let mut writer = stream;
    let mut encoder = RespEncoder::with_capacity(256);
    let mut state = ConnState::default();

    while let Ok(RespValue::Array(items)) = decoder.decode() {
        if shared.stopped.load(Ordering::SeqCst) || items.is_empty() {
            break;
        }
        let args: Vec<String> = items
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes().unwrap_or_default()).into_owned())
            .collect();
        shared.log.lock().push(args.clone());

        let reply = match args[0].to_ascii_uppercase().as_str() {
            "ASKING" => {
                state.asking = true;
                Some(RespValue::ok())
            }
            "READONLY" => {
                state.readonly = true;
                Some(RespValue::ok())
            }
            _ => {
                let reply = handler(&mut state, &args);
                state.asking = false;
                reply
            }
        };

        match reply {
            Some(value) => {
                encoder.clear();
                encoder.encode_value(&value);
                if writer.write_all(encoder.as_bytes()).is_err() {
                    break;
                }
            }
            None => {
                let _ = writer.shutdown(Shutdown::Both);
                break;
            }
        }
    }
}

/// What a cluster hook wants done with a command
pub enum Action {
    Reply(RespValue),
    Drop,
    /// Fall through to the default cluster behaviour
    Pass,
}

type Hook = Arc<dyn Fn(usize, &ConnState, &[String]) -> Action + Send + Sync>;

struct Layout {
    addresses: Vec<NodeAddress>,
    ids: Vec<String>,
    /// Replica index -> primary index
    primary_of: Vec<Option<usize>>,
    /// Slot -> primary index
    owners: Vec<usize>,
    hook: Option<Hook>,
}

impl Layout {
    fn render(&self, me: usize) -> String {
        let mut out = String::new();
        for (i, address) in self.addresses.iter().enumerate() {
            let myself = if i == me { "myself," } else { "" };
            let (role, master) = match self.primary_of[i] {
                Some(p) => ("slave", self.ids[p].as_str()),
                None => ("master", "-"),
            };
            out.push_str(&format!(
                "{} {}@{} {}{} {} 0 0 {} connected",
                self.ids[i], address, address.port, myself, role, master, i + 1
            ));
            if self.primary_of[i].is_none() {
                for (start, end) in self.ranges_of(i) {
                    if start == end {
                        out.push_str(&format!(" {}", start));
                    } else {
                        out.push_str(&format!(" {}-{}", start, end));
                    }
                }
            }
            out.push('\n');
        }
        out
    }

    fn ranges_of(&self, node: usize) -> Vec<(usize, usize)> {
        let mut ranges = Vec::new();
        let mut start = None;
        for slot in 0..=SLOT_COUNT {
            let owned = slot < SLOT_COUNT && self.owners[slot] == node;
            match (owned, start) {
                (true, None) => start = Some(slot),
                (false, Some(s)) => {
                    ranges.push((s, slot - 1));
                    start = None;
                }
                _ => {}
            }
        }
        ranges
    }
}

/// Several mock nodes sharing one slot layout and one key space
pub struct MockCluster {
    nodes: Vec<MockNode>,
    layout: Arc<RwLock<Layout>>,
}

impl MockCluster {
    /// Primaries only, slots split evenly in index order
    pub fn start(primaries: usize) -> Self {
        Self::with_replicas(primaries, 0)
    }

    /// Primaries `0..primaries`, then `replicas_per_primary` replicas for each
    pub fn with_replicas(primaries: usize, replicas_per_primary: usize) -> Self {
        let total = primaries * (1 + replicas_per_primary);
        let layout = Arc::new(RwLock::new(Layout {
            addresses: Vec::new(),
            ids: (0..total).map(|i| format!("{:040x}", i + 1)).collect(),
            primary_of: (0..total)
                .map(|i| (i >= primaries).then(|| (i - primaries) / replicas_per_primary.max(1)))
                .collect(),
            owners: (0..SLOT_COUNT).map(|s| s * primaries / SLOT_COUNT).collect(),
            hook: None,
        }));
        let store: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(HashMap::new()));

        let nodes: Vec<MockNode> = (0..total)
            .map(|me| {
                let layout = Arc::clone(&layout);
                let store = Arc::clone(&store);
                MockNode::start(move |state, args| respond(me, state, args, &layout, &store))
            })
            .collect();

        layout.write().addresses = nodes.iter().map(|n| n.address().clone()).collect();

        Self { nodes, layout }
    }

    pub fn node(&self, index: usize) -> &MockNode {
        &self.nodes[index]
    }

    pub fn address(&self, index: usize) -> NodeAddress {
        self.nodes[index].address().clone()
    }

    pub fn seeds(&self) -> Vec<NodeAddress> {
        self.nodes.iter().map(|n| n.address().clone()).collect()
    }

    pub fn owner_of(&self, slot: u16) -> usize {
        self.layout.read().owners[slot as usize]
    }

    /// Reassign slots `start..=end` to primary `to`
    pub fn assign(&self, start: u16, end: u16, to: usize) {
        let mut layout = self.layout.write();
        for slot in start..=end {
            layout.owners[slot as usize] = to;
        }
    }

    /// Intercept commands before the default behaviour
    pub fn set_hook<F>(&self, hook: F)
    where
        F: Fn(usize, &ConnState, &[String]) -> Action + Send + Sync + 'static,
    {
        self.layout.write().hook = Some(Arc::new(hook));
    }

    /// Total `name` commands received across all nodes
    pub fn count(&self, name: &str) -> usize {
        self.nodes.iter().map(|n| n.count(name)).sum()
    }

    pub fn clear_logs(&self) {
        for node in &self.nodes {
            node.clear_log();
        }
    }
}

fn respond(
    me: usize,
    state: &mut ConnState,
    args: &[String],
    layout: &RwLock<Layout>,
    store: &Mutex<HashMap<String, String>>,
) -> Option<RespValue> {
    let hook = layout.read().hook.clone();
    if let Some(hook) = hook {
        match hook(me, state, args) {
            Action::Reply(value) => return Some(value),
            Action::Drop => return None,
            Action::Pass => {}
        }
    }

    let layout = layout.read();
    let cmd = args[0].to_ascii_uppercase();
    let reply = match cmd.as_str() {
        "CLUSTER" => RespValue::bulk(layout.render(me)),
        "PING" => RespValue::SimpleString("PONG".to_string()),
        "ECHO" => RespValue::bulk(args.get(1).cloned().unwrap_or_default()),
        "AUTH" => RespValue::ok(),
        "DBSIZE" => {
            let primary = layout.primary_of[me].unwrap_or(me);
            let count = store
                .lock()
                .keys()
                .filter(|k| layout.owners[slot_for_key(k.as_bytes()) as usize] == primary)
                .count();
            RespValue::Integer(count as i64)
        }
        "FLUSHALL" => RespValue::ok(),
        _ if args.len() < 2 => {
            RespValue::Error(format!("ERR wrong number of arguments for '{}'", args[0]))
        }
        _ => {
            let slot = slot_for_key(args[1].as_bytes());
            let owner = layout.owners[slot as usize];
            let replica_read = layout.primary_of[me] == Some(owner)
                && state.readonly
                && matches!(cmd.as_str(), "GET" | "MGET" | "EXISTS");
            if me != owner && !replica_read {
                RespValue::Error(format!("MOVED {} {}", slot, layout.addresses[owner]))
            } else {
                apply(&cmd, args, &mut store.lock())
            }
        }
    };
    Some(reply)
}

fn apply(cmd: &str, args: &[String], store: &mut HashMap<String, String>) -> RespValue {
    match cmd {
        "GET" => store
            .get(&args[1])
            .map(RespValue::bulk)
            .unwrap_or(RespValue::Null),
        "SET" if args.len() == 3 => {
            store.insert(args[1].clone(), args[2].clone());
            RespValue::ok()
        }
        "DEL" => RespValue::Integer(
            args[1..]
                .iter()
                .filter(|k| store.remove(*k).is_some())
                .count() as i64,
        ),
        "EXISTS" => RespValue::Integer(args[1..].iter().filter(|k| store.contains_key(*k)).count() as i64),
        "MGET" => RespValue::Array(
            args[1..]
                .iter()
                .map(|k| store.get(k).map(RespValue::bulk).unwrap_or(RespValue::Null))
                .collect(),
        ),
        "INCR" => {
            let entry = store.entry(args[1].clone()).or_insert_with(|| "0".to_string());
            match entry.parse::<i64>() {
                Ok(n) => {
                    *entry = (n + 1).to_string();
                    RespValue::Integer(n + 1)
                }
                Err(_) => RespValue::Error(
                    "ERR value is not an integer or out of range".to_string(),
                ),
            }
        }
        _ => RespValue::Error(format!("ERR unknown command '{}'", args[0])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{CommandChannelExt, ConnectionFactory};
    use std::time::Duration;

    #[test]
    fn test_mock_cluster_moves_foreign_slots() {
        let cluster = MockCluster::start(2);
        let factory = ConnectionFactory::new(Duration::from_secs(1), Duration::from_secs(1));

        // "foo" hashes to 12182, owned by the second half
        assert_eq!(cluster.owner_of(12182), 1);
        let mut conn = factory.create(&cluster.address(0), false).unwrap();
        let reply = conn.execute(&["GET", "foo"]).unwrap();
        assert_eq!(
            reply,
            RespValue::Error(format!("MOVED 12182 {}", cluster.address(1)))
        );

        let nodes = conn.cluster_nodes().unwrap();
        assert_eq!(nodes.lines().count(), 2);
        assert!(nodes.contains("myself,master"));
        assert!(nodes.contains(" 0-8191"));
        assert!(nodes.contains(" 8192-16383"));
    }
}
