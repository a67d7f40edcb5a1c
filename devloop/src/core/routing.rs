//! Routing function evaluated on the conditional edge after review.

use crate::core::types::{RoutingDecision, Severity};

/// Default hard cap on loop-backs from the reviewer to the writer.
pub const DEFAULT_MAX_REVISIONS: u32 = 3;

/// Signature of a routing predicate: `(severity, revisions, max_revisions)`.
/// The engine accepts any function of this shape but enforces the loop bound
/// itself.
pub type Router = fn(Severity, u32, u32) -> RoutingDecision;

/// Decide whether reviewed code goes back to the writer.
///
/// `revisions` counts the loop-backs already taken in this run, i.e. the
/// writer's `iteration_count` minus its first pass. Returns `Revise` iff
/// `severity` is `critical` and `revisions` is below `max_revisions`;
/// everything else approves. Unknown tags are parsed with
/// [`Severity::from_tag_lenient`], so malformed input routes as `none`.
pub fn route_after_review(severity: Severity, revisions: u32, max_revisions: u32) -> RoutingDecision {
    if severity == Severity::Critical && revisions < max_revisions {
        RoutingDecision::Revise
    } else {
        RoutingDecision::Approve
    }
}
