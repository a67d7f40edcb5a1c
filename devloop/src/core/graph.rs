//! Static stage graph: entry point and outgoing edges.

use crate::core::types::{RoutingDecision, StageId};

/// Stage the engine starts every run at.
pub const ENTRY: StageId = StageId::Orchestrator;

/// Outgoing edge of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Unconditional transition.
    Static(StageId),
    /// The conditional edge, keyed by the routing decision label.
    Branch { revise: StageId, approve: StageId },
    /// No outgoing edge; the run ends here.
    Terminal,
}

impl Edge {
    /// Follow a branch for `decision`. Non-branch edges ignore the label.
    pub fn select(self, decision: RoutingDecision) -> Option<StageId> {
        match self {
            Edge::Static(next) => Some(next),
            Edge::Branch { revise, approve } => Some(match decision {
                RoutingDecision::Revise => revise,
                RoutingDecision::Approve => approve,
            }),
            Edge::Terminal => None,
        }
    }
}

/// Edge table. One row per stage.
pub fn edge(stage: StageId) -> Edge {
    match stage {
        StageId::Orchestrator => Edge::Static(StageId::CodeWriter),
        StageId::CodeWriter => Edge::Static(StageId::CodeReviewer),
        StageId::CodeReviewer => Edge::Branch {
            revise: StageId::CodeWriter,
            approve: StageId::TestWriter,
        },
        StageId::TestWriter => Edge::Terminal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_conditional_edge_and_one_terminal() {
        let branches = StageId::ALL
            .iter()
            .filter(|s| matches!(edge(**s), Edge::Branch { .. }))
            .count();
        let terminals = StageId::ALL
            .iter()
            .filter(|s| edge(**s) == Edge::Terminal)
            .count();
        assert_eq!(branches, 1);
        assert_eq!(terminals, 1);
    }

    #[test]
    fn approve_path_from_entry_reaches_terminal_in_order() {
        let mut order = vec![ENTRY];
        let mut current = ENTRY;
        while let Some(next) = edge(current).select(RoutingDecision::Approve) {
            order.push(next);
            current = next;
            assert!(order.len() <= StageId::ALL.len(), "approve path must not cycle");
        }
        assert_eq!(
            order,
            vec![
                StageId::Orchestrator,
                StageId::CodeWriter,
                StageId::CodeReviewer,
                StageId::TestWriter,
            ]
        );
    }

    #[test]
    fn revise_loops_back_to_writer() {
        assert_eq!(
            edge(StageId::CodeReviewer).select(RoutingDecision::Revise),
            Some(StageId::CodeWriter)
        );
    }
}
