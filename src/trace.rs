/// Append-only record of pipeline decisions.
///
/// Stages push events onto a `DebugTrace` they receive by `&mut` and the orchestrator
/// returns it alongside the result. Each event is mirrored to `tracing` at debug level
/// so the same decisions show up in structured logs.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Routing,
    Budget,
    Dense,
    Sparse,
    Fusion,
    Strategy,
    Merge,
    Rerank,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Routing => "routing",
            Stage::Budget => "budget",
            Stage::Dense => "dense",
            Stage::Sparse => "sparse",
            Stage::Fusion => "fusion",
            Stage::Strategy => "strategy",
            Stage::Merge => "merge",
            Stage::Rerank => "rerank",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub stage: Stage,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugTrace {
    events: Vec<TraceEvent>,
}

impl DebugTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(stage = %stage, "{}", message);
        self.events.push(TraceEvent { stage, message });
    }

    /// Append another trace's events, preserving their order.
    pub fn extend(&mut self, other: DebugTrace) {
        self.events.extend(other.events);
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events for one stage, in insertion order.
    pub fn stage(&self, stage: Stage) -> impl Iterator<Item = &TraceEvent> {
        self.events.iter().filter(move |e| e.stage == stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_preserves_order_across_extend() {
        let mut a = DebugTrace::new();
        a.push(Stage::Routing, "first");
        let mut b = DebugTrace::new();
        b.push(Stage::Dense, "second");
        b.push(Stage::Routing, "third");
        a.extend(b);

        let messages: Vec<&str> = a.events().iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second", "third"]);
        assert_eq!(a.stage(Stage::Routing).count(), 2);
    }
}
