//! Live progress events emitted while a run executes.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

use crate::router::NodeId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeOutcome {
    Success,
    Failure { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    NodeStarted {
        run_id: String,
        timestamp: u64,
        node: NodeId,
        step: usize,
    },
    NodeFinished {
        run_id: String,
        timestamp: u64,
        node: NodeId,
        outcome: NodeOutcome,
        duration_ms: u64,
    },
    Routed {
        run_id: String,
        timestamp: u64,
        from: NodeId,
        to: NodeId,
        reason: String,
    },
}

impl WorkflowEvent {
    pub fn run_id(&self) -> &str {
        match self {
            WorkflowEvent::NodeStarted { run_id, .. }
            | WorkflowEvent::NodeFinished { run_id, .. }
            | WorkflowEvent::Routed { run_id, .. } => run_id,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            WorkflowEvent::NodeStarted { timestamp, .. }
            | WorkflowEvent::NodeFinished { timestamp, .. }
            | WorkflowEvent::Routed { timestamp, .. } => *timestamp,
        }
    }
}

/// Sending half handed to the graph engine. Dropped receivers are tolerated.
#[derive(Clone)]
pub struct EventCollector {
    sender: mpsc::UnboundedSender<WorkflowEvent>,
}

impl EventCollector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn emit_started(&self, run_id: &str, node: NodeId, step: usize) {
        self.send(WorkflowEvent::NodeStarted {
            run_id: run_id.to_string(),
            timestamp: current_timestamp(),
            node,
            step,
        });
    }

    pub fn emit_finished(&self, run_id: &str, node: NodeId, outcome: NodeOutcome, duration_ms: u64) {
        self.send(WorkflowEvent::NodeFinished {
            run_id: run_id.to_string(),
            timestamp: current_timestamp(),
            node,
            outcome,
            duration_ms,
        });
    }

    pub fn emit_routed(&self, run_id: &str, from: NodeId, to: NodeId, reason: &str) {
        self.send(WorkflowEvent::Routed {
            run_id: run_id.to_string(),
            timestamp: current_timestamp(),
            from,
            to,
            reason: reason.to_string(),
        });
    }

    fn send(&self, event: WorkflowEvent) {
        if let Err(err) = self.sender.send(event) {
            tracing::debug!(error = %err, "event receiver dropped");
        }
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
