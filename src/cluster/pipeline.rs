//! Cross-node pipelining
//!
//! Queued commands are grouped by the node they resolve to in one snapshot.
//! Each group is written on a single connection in queue order and the
//! groups run concurrently. Results come back in queue order.
//!
//! A group whose replies contain any redirect is replayed command by command
//! through the [`Dispatcher`]. A group that fails at the connection level is
//! not replayed, since some of its writes may already have been applied.

use std::collections::BTreeMap;
use std::thread;

use tracing::{debug, warn};

use super::command::{Command, Route};
use super::dispatcher::Dispatcher;
use super::redirect::RedirectSignal;
use crate::config::NodeAddress;
use crate::utils::{RespValue, Result, RouterError};

pub struct ClusterPipeline<'a> {
    dispatcher: &'a Dispatcher,
    commands: Vec<Command>,
}

/// Outcome of one node's sub-batch
enum BatchOutcome {
    Replies(Vec<RespValue>),
    Redirected { moved: bool },
    Failed(String),
}

impl<'a> ClusterPipeline<'a> {
    pub fn new(dispatcher: &'a Dispatcher) -> Self {
        Self {
            dispatcher,
            commands: Vec::new(),
        }
    }

    /// Queue a command; returns its position in the result list
    pub fn queue(&mut self, command: Command) -> usize {
        self.commands.push(command);
        self.commands.len() - 1
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Send everything queued and return one result per command, in queue order
    pub fn execute(self) -> Vec<Result<RespValue>> {
        let commands = self.commands;
        let dispatcher = self.dispatcher;
        let mut results: Vec<Option<Result<RespValue>>> = commands.iter().map(|_| None).collect();
        if commands.is_empty() {
            return Vec::new();
        }

        let snapshot = dispatcher.cache().snapshot();
        let mut groups: BTreeMap<NodeAddress, Vec<usize>> = BTreeMap::new();
        // keyless or unresolvable commands go through the dispatcher individually
        let mut replay: Vec<usize> = Vec::new();

        for (idx, command) in commands.iter().enumerate() {
            match command.route() {
                Ok(Route::Slot(slot)) => {
                    match dispatcher.pick(&snapshot, slot, command.is_read_only()) {
                        Ok(target) => groups.entry(target).or_default().push(idx),
                        Err(_) => replay.push(idx),
                    }
                }
                Ok(Route::Keyless) => replay.push(idx),
                Err(e) => results[idx] = Some(Err(e)),
            }
        }

        let run = |node: &NodeAddress, indices: &[usize]| -> BatchOutcome {
            let batch: Vec<&Command> = indices.iter().map(|&i| &commands[i]).collect();
            match dispatcher.send_batch(&snapshot, node, &batch) {
                Ok(replies) => {
                    let signals: Vec<RedirectSignal> =
                        replies.iter().map(RedirectSignal::classify).collect();
                    if signals.iter().any(RedirectSignal::is_redirect) {
                        let moved = signals
                            .iter()
                            .any(|s| matches!(s, RedirectSignal::Moved { .. }));
                        BatchOutcome::Redirected { moved }
                    } else {
                        BatchOutcome::Replies(replies)
                    }
                }
                Err(e) => BatchOutcome::Failed(e.to_string()),
            }
        };

        let outcomes: Vec<(&NodeAddress, &Vec<usize>, BatchOutcome)> = if groups.len() == 1 {
            groups
                .iter()
                .map(|(node, indices)| (node, indices, run(node, indices.as_slice())))
                .collect()
        } else {
            thread::scope(|scope| {
                let handles: Vec<_> = groups
                    .iter()
                    .map(|(node, indices)| {
                        let run = &run;
                        (node, indices, scope.spawn(move || run(node, indices.as_slice())))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|(node, indices, handle)| {
                        let outcome = handle
                            .join()
                            .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
                        (node, indices, outcome)
                    })
                    .collect()
            })
        };

        let mut refresh_needed = false;
        for (node, indices, outcome) in outcomes {
            match outcome {
                BatchOutcome::Replies(replies) => {
                    for (&idx, reply) in indices.iter().zip(replies) {
                        results[idx] = Some(Ok(reply));
                    }
                }
                BatchOutcome::Redirected { moved } => {
                    debug!(
                        "Pipeline sub-batch of {} commands to {} redirected, replaying",
                        indices.len(),
                        node
                    );
                    refresh_needed |= moved;
                    replay.extend(indices.iter().copied());
                }
                BatchOutcome::Failed(reason) => {
                    warn!("Pipeline sub-batch to {} failed: {}", node, reason);
                    for &idx in indices {
                        results[idx] = Some(Err(RouterError::BatchAborted {
                            node: node.clone(),
                            reason: reason.clone(),
                        }));
                    }
                }
            }
        }

        if refresh_needed {
            if let Err(e) = dispatcher.cache().refresh_if_stale(snapshot.generation()) {
                warn!("Topology refresh after pipeline redirect failed: {}", e);
            }
        }

        replay.sort_unstable();
        for idx in replay {
            results[idx] = Some(dispatcher.execute(&commands[idx]));
        }

        debug_assert!(results.iter().all(Option::is_some));
        results.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::command::cmd;
    use crate::cluster::topology_cache::TopologyCache;
    use crate::config::RouterConfig;
    use crate::utils::mock_node::{Action, MockCluster};
    use std::sync::Arc;
    use std::time::Duration;

    fn dispatcher(cluster: &MockCluster) -> Dispatcher {
        let config = RouterConfig::with_seeds(cluster.seeds());
        let cache = Arc::new(TopologyCache::connect(&config).unwrap());
        Dispatcher::new(cache, &config)
    }

    fn values(results: Vec<Result<RespValue>>) -> Vec<RespValue> {
        results.into_iter().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_empty_pipeline() {
        let cluster = MockCluster::start(2);
        let d = dispatcher(&cluster);
        let pipeline = ClusterPipeline::new(&d);
        assert!(pipeline.is_empty());
        assert!(pipeline.execute().is_empty());
    }

    #[test]
    fn test_results_in_queue_order_despite_slow_node() {
        let cluster = MockCluster::start(2);
        let d = dispatcher(&cluster);
        for key in ["foo", "bar", "hello", "e"] {
            d.execute(&cmd("SET").key(key).arg(format!("v-{}", key))).unwrap();
        }

        // node 1 (foo, e) answers late
        cluster.set_hook(|me, _, args| {
            if me == 1 && args[0] == "GET" {
                std::thread::sleep(Duration::from_millis(100));
            }
            Action::Pass
        });
        cluster.clear_logs();

        let mut pipeline = ClusterPipeline::new(&d);
        for key in ["foo", "bar", "e", "hello", "missing"] {
            pipeline.queue(cmd("GET").key(key));
        }
        assert_eq!(pipeline.len(), 5);

        let results = values(pipeline.execute());
        assert_eq!(
            results,
            vec![
                RespValue::bulk("v-foo"),
                RespValue::bulk("v-bar"),
                RespValue::bulk("v-e"),
                RespValue::bulk("v-hello"),
                RespValue::Null,
            ]
        );

        // per node, commands arrive in queue order; "missing" (slot 5513) is on node 0
        let gets = |node: usize| -> Vec<String> {
            cluster.node(node).commands().into_iter().map(|c| c[1].clone()).collect()
        };
        assert_eq!(gets(0), vec!["bar", "hello", "missing"]);
        assert_eq!(gets(1), vec!["foo", "e"]);
    }

    #[test]
    fn test_redirected_sub_batch_is_replayed() {
        let cluster = MockCluster::start(2);
        let d = dispatcher(&cluster);
        let refreshes = d.cache().refresh_count();

        // the client still believes node 1 owns "foo"
        cluster.assign(12182, 12182, 0);

        let mut pipeline = ClusterPipeline::new(&d);
        pipeline.queue(cmd("SET").key("foo").arg("1"));
        pipeline.queue(cmd("SET").key("bar").arg("2"));
        pipeline.queue(cmd("GET").key("foo"));
        pipeline.queue(cmd("SET").key("e").arg("3"));

        let results = values(pipeline.execute());
        assert_eq!(
            results,
            vec![
                RespValue::ok(),
                RespValue::ok(),
                RespValue::bulk("1"),
                RespValue::ok()
            ]
        );

        assert_eq!(d.cache().refresh_count(), refreshes + 1);
        assert_eq!(d.cache().resolve(12182).unwrap(), cluster.address(0));
        // node 1's whole sub-batch ran again: "e" was written twice
        assert_eq!(
            cluster
                .node(1)
                .commands()
                .iter()
                .filter(|c| c[0] == "SET" && c[1] == "e")
                .count(),
            2
        );
    }

    #[test]
    fn test_failed_sub_batch_is_not_replayed() {
        let cluster = MockCluster::start(2);
        let d = dispatcher(&cluster);
        cluster.set_hook(|me, _, args| {
            if me == 0 && args[0] == "INCR" {
                Action::Drop
            } else {
                Action::Pass
            }
        });

        let mut pipeline = ClusterPipeline::new(&d);
        pipeline.queue(cmd("INCR").key("bar"));
        pipeline.queue(cmd("INCR").key("foo"));
        pipeline.queue(cmd("INCR").key("hello"));

        let results = pipeline.execute();
        assert!(matches!(
            &results[0],
            Err(RouterError::BatchAborted { node, .. }) if node == &cluster.address(0)
        ));
        assert_eq!(results[1].as_ref().unwrap(), &RespValue::Integer(1));
        assert!(matches!(&results[2], Err(RouterError::BatchAborted { .. })));
        assert_eq!(cluster.node(0).count("INCR"), 1);
    }

    #[test]
    fn test_cross_slot_and_keyless_entries() {
        let cluster = MockCluster::start(2);
        let d = dispatcher(&cluster);

        let mut pipeline = ClusterPipeline::new(&d);
        pipeline.queue(cmd("MGET").key("foo").key("bar"));
        pipeline.queue(cmd("PING"));
        pipeline.queue(cmd("SET").key("{user}.a").arg("x"));

        let results = pipeline.execute();
        assert!(matches!(results[0], Err(RouterError::CrossSlot { .. })));
        assert_eq!(
            results[1].as_ref().unwrap(),
            &RespValue::SimpleString("PONG".to_string())
        );
        assert_eq!(results[2].as_ref().unwrap(), &RespValue::ok());
    }
}
