//! cluster_probe - inspect how a cluster routes keys
//!
//! Discovers the cluster from the given seeds, prints its nodes and slot
//! ranges, the slot and owner of each `--key`, and optionally routes one
//! command through the router.

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

use valkey_cluster_router::cluster::{slot_for_key, ClusterClient, ClusterNode, Command};
use valkey_cluster_router::config::{NodeAddress, ProbeArgs};
use valkey_cluster_router::utils::RespValue;

fn setup_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

#[derive(Serialize)]
struct NodeReport {
    id: String,
    address: NodeAddress,
    role: &'static str,
    primary_id: Option<String>,
    flags: Vec<String>,
    slots: Vec<String>,
    slot_count: usize,
}

#[derive(Serialize)]
struct KeyReport {
    key: String,
    slot: u16,
    owner: Option<NodeAddress>,
}

#[derive(Serialize)]
struct ProbeReport {
    generation: u64,
    primaries: usize,
    unassigned_slots: usize,
    nodes: Vec<NodeReport>,
    keys: Vec<KeyReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<serde_json::Value>,
}

fn node_report(node: &ClusterNode) -> NodeReport {
    NodeReport {
        id: node.id.clone(),
        address: node.address.clone(),
        role: if node.is_primary { "primary" } else { "replica" },
        primary_id: node.primary_id.clone(),
        flags: node.flags.clone(),
        slots: node
            .slots
            .iter()
            .map(|&(start, end)| {
                if start == end {
                    start.to_string()
                } else {
                    format!("{}-{}", start, end)
                }
            })
            .collect(),
        slot_count: node.slot_count(),
    }
}

/// First word is the command name, second (if any) is routed as the key
fn build_command(words: &[String]) -> Option<Command> {
    let (name, rest) = words.split_first()?;
    let mut command = Command::new(name);
    for (i, word) in rest.iter().enumerate() {
        command = if i == 0 { command.key(word) } else { command.arg(word) };
    }
    Some(command)
}

fn reply_to_json(reply: &RespValue) -> serde_json::Value {
    use serde_json::Value;
    match reply {
        RespValue::SimpleString(s) => Value::String(s.clone()),
        RespValue::Error(e) => serde_json::json!({ "error": e }),
        RespValue::Integer(n) => Value::from(*n),
        RespValue::BulkString(data) => Value::String(String::from_utf8_lossy(data).into_owned()),
        RespValue::Null => Value::Null,
        RespValue::Array(items) => Value::Array(items.iter().map(reply_to_json).collect()),
    }
}

fn render_reply(reply: &RespValue, indent: usize, out: &mut String) {
    match reply {
        RespValue::SimpleString(s) => out.push_str(s),
        RespValue::Error(e) => {
            out.push_str("(error) ");
            out.push_str(e);
        }
        RespValue::Integer(n) => out.push_str(&format!("(integer) {}", n)),
        RespValue::BulkString(data) => {
            out.push_str(&format!("\"{}\"", String::from_utf8_lossy(data)))
        }
        RespValue::Null => out.push_str("(nil)"),
        RespValue::Array(items) if items.is_empty() => out.push_str("(empty array)"),
        RespValue::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push('\n');
                    out.push_str(&" ".repeat(indent));
                }
                out.push_str(&format!("{}) ", i + 1));
                render_reply(item, indent + 3, out);
            }
        }
    }
}

fn print_text(report: &ProbeReport, reply: Option<&RespValue>) {
    println!(
        "Cluster generation {}: {} primaries, {} nodes, {} unassigned slots",
        report.generation,
        report.primaries,
        report.nodes.len(),
        report.unassigned_slots
    );
    for node in &report.nodes {
        let role = match &node.primary_id {
            Some(primary) if node.role == "replica" => format!("replica of {}", primary),
            _ => node.role.to_string(),
        };
        println!(
            "  {} {} {} [{}] slots: {}",
            node.id,
            node.address,
            role,
            node.flags.join(","),
            if node.slots.is_empty() {
                "-".to_string()
            } else {
                node.slots.join(" ")
            }
        );
    }

    for key in &report.keys {
        match &key.owner {
            Some(owner) => println!("key {:?} -> slot {} -> {}", key.key, key.slot, owner),
            None => println!("key {:?} -> slot {} -> (unassigned)", key.key, key.slot),
        }
    }

    if let Some(reply) = reply {
        let mut out = String::new();
        render_reply(reply, 0, &mut out);
        println!("{}", out);
    }
}

fn run(args: &ProbeArgs) -> Result<()> {
    let config = args
        .to_router_config()
        .context("Invalid router configuration")?;
    let client = ClusterClient::connect(&config).context("Cluster discovery failed")?;

    let snapshot = client.topology();
    let topology = snapshot.topology();
    let keys = args
        .keys
        .iter()
        .map(|key| {
            let slot = slot_for_key(key.as_bytes());
            KeyReport {
                key: key.clone(),
                slot,
                owner: topology.owner_address(slot).cloned(),
            }
        })
        .collect();

    let reply = match build_command(&args.command) {
        Some(command) => Some(
            client
                .execute(&command)
                .with_context(|| format!("{} failed", command.name()))?,
        ),
        None => None,
    };

    let report = ProbeReport {
        generation: snapshot.generation(),
        primaries: topology.num_primaries(),
        unassigned_slots: topology.unassigned_slots(),
        nodes: topology.nodes().iter().map(node_report).collect(),
        keys,
        reply: reply.as_ref().map(reply_to_json),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text(&report, reply.as_ref());
    }

    client.close();
    Ok(())
}

fn main() -> Result<()> {
    let args = ProbeArgs::parse();
    setup_logging(args.verbose, args.quiet);

    if let Err(e) = args.validate() {
        bail!(e);
    }

    if let Err(e) = run(&args) {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}
