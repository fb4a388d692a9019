//! Workflow analyzer (spec §4.K): classifies each upstream→downstream edge
//! in a batch of workflow log entries.

use std::collections::{HashMap, HashSet};

/// One agent's observed arrival/finish within a workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowLogEntry {
    pub agent_name: String,
    pub upstream: Option<String>,
    pub arrive_time: f64,
    pub finish_time: f64,
}

/// Classification of an `upstream -> agent_name` edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgePattern {
    /// The only child of its parent.
    Simple,
    /// Ran with no overlapping sibling.
    Sequential,
    /// Overlapped in time with at least one sibling.
    Parallel,
    /// Part of a dependency cycle — classification doesn't apply.
    Feedback,
}

/// Builds the upstream→children graph from a batch of log entries and
/// classifies every edge.
pub struct WorkflowAnalyzer {
    logs: Vec<WorkflowLogEntry>,
    agent_details: HashMap<String, WorkflowLogEntry>,
    graph: HashMap<String, Vec<String>>,
}

impl WorkflowAnalyzer {
    pub fn new(mut logs: Vec<WorkflowLogEntry>) -> Self {
        logs.sort_by(|a, b| a.arrive_time.total_cmp(&b.arrive_time));
        let agent_details = logs
            .iter()
            .map(|log| (log.agent_name.clone(), log.clone()))
            .collect();
        Self {
            logs,
            agent_details,
            graph: HashMap::new(),
        }
    }

    fn build_graph(&mut self) {
        self.graph.clear();
        for log in &self.logs {
            if let Some(upstream) = &log.upstream {
                self.graph
                    .entry(upstream.clone())
                    .or_default()
                    .push(log.agent_name.clone());
            }
        }
    }

    /// The sole root agent when the batch forms a single-node workflow (no
    /// upstream/downstream relationships at all).
    pub fn root_agent(&self) -> Option<&str> {
        if self.graph.is_empty() {
            self.logs.first().map(|log| log.agent_name.as_str())
        } else {
            None
        }
    }

    /// Classifies every `(upstream, child)` edge. Deterministic in input
    /// order: ties in arrival time are broken by finish-before-arrival at
    /// the same instant not counting as overlap (mirrors the source's tuple
    /// sort on `(time, event_type)`).
    pub fn analyze(&mut self) -> HashMap<(String, String), EdgePattern> {
        self.build_graph();
        let mut results = HashMap::new();
        if self.graph.is_empty() {
            return results;
        }

        let feedback_edges = detect_feedback_edges(&self.graph);

        for (upstream, children) in self.graph.clone() {
            let mut children = children;
            children.sort_by(|a, b| {
                self.agent_details[a]
                    .arrive_time
                    .total_cmp(&self.agent_details[b].arrive_time)
            });

            if children.len() == 1 {
                let child = children.into_iter().next().unwrap();
                let edge = (upstream.clone(), child);
                let pattern = if feedback_edges.contains(&edge) {
                    EdgePattern::Feedback
                } else {
                    EdgePattern::Simple
                };
                results.insert(edge, pattern);
                continue;
            }

            let mut child_is_parallel: HashMap<String, bool> =
                children.iter().map(|c| (c.clone(), false)).collect();

            // (time, event_type, name); event_type -1 sorts before +1 at a
            // tie, so a sibling finishing exactly when another arrives does
            // not count as overlap.
            let mut events: Vec<(f64, i8, String)> = Vec::new();
            for child in &children {
                let details = &self.agent_details[child];
                events.push((details.arrive_time, 1, child.clone()));
                events.push((details.finish_time, -1, child.clone()));
            }
            events.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

            let mut running_siblings: HashSet<String> = HashSet::new();
            for (_, event_type, name) in events {
                if event_type == 1 {
                    if !running_siblings.is_empty() {
                        child_is_parallel.insert(name.clone(), true);
                        for sibling in &running_siblings {
                            child_is_parallel.insert(sibling.clone(), true);
                        }
                    }
                    running_siblings.insert(name);
                } else {
                    running_siblings.remove(&name);
                }
            }

            for (child, is_parallel) in child_is_parallel {
                let edge = (upstream.clone(), child);
                let pattern = if feedback_edges.contains(&edge) {
                    EdgePattern::Feedback
                } else if is_parallel {
                    EdgePattern::Parallel
                } else {
                    EdgePattern::Sequential
                };
                results.insert(edge, pattern);
            }
        }

        results
    }
}

/// DFS cycle detection over the upstream→children adjacency map. Every edge
/// on a detected cycle is reported so the caller can tag it `Feedback`
/// instead of classifying it as simple/sequential/parallel.
fn detect_feedback_edges(graph: &HashMap<String, Vec<String>>) -> HashSet<(String, String)> {
    // State values: 0 = unvisited, 1 = on the current DFS stack, 2 = done.
    let mut state: HashMap<String, u8> = HashMap::new();
    let mut stack: Vec<String> = Vec::new();
    let mut feedback = HashSet::new();

    fn visit(
        node: &str,
        graph: &HashMap<String, Vec<String>>,
        state: &mut HashMap<String, u8>,
        stack: &mut Vec<String>,
        feedback: &mut HashSet<(String, String)>,
    ) {
        state.insert(node.to_string(), 1);
        stack.push(node.to_string());

        if let Some(children) = graph.get(node) {
            for child in children.clone() {
                match state.get(&child).copied().unwrap_or(0) {
                    0 => visit(&child, graph, state, stack, feedback),
                    1 => {
                        if let Some(pos) = stack.iter().position(|n| n == &child) {
                            for window in stack[pos..].windows(2) {
                                feedback.insert((window[0].clone(), window[1].clone()));
                            }
                        }
                        feedback.insert((node.to_string(), child));
                    }
                    _ => {}
                }
            }
        }

        stack.pop();
        state.insert(node.to_string(), 2);
    }

    let mut nodes: Vec<&String> = graph.keys().collect();
    nodes.sort();
    for node in nodes {
        if state.get(node).copied().unwrap_or(0) == 0 {
            visit(node, graph, &mut state, &mut stack, &mut feedback);
        }
    }

    feedback
}
