//! 5-step edge selection algorithm.
//!
//! After a node completes, this module determines which outgoing edge to follow
//! based on a priority cascade: condition match, preferred label, suggested next
//! IDs, highest weight, and lexical tiebreak.

use crate::condition::{evaluate_condition, parse_condition};
use crate::graph::{PipelineEdge, PipelineGraph};

/// Select the next edge to follow after a node completes.
/// Returns `None` if no edges are available (terminal node).
pub fn select_edge<'a>(
    node_id: &str,
    outcome: &attractor_types::Outcome,
    resolve: &dyn Fn(&str) -> String,
    graph: &'a PipelineGraph,
) -> Option<&'a PipelineEdge> {
    let edges = graph.outgoing_edges(node_id);
    if edges.is_empty() {
        return None;
    }

    // Step 1: Condition-matching edges
    let condition_edges: Vec<_> = edges
        .iter()
        .filter(|e| {
            if let Some(ref cond) = e.condition {
                if let Ok(expr) = parse_condition(cond) {
                    evaluate_condition(&expr, resolve)
                } else {
                    false
                }
            } else {
                false
            }
        })
        .collect();
    if !condition_edges.is_empty() {
        return Some(best_by_weight_then_lexical(&condition_edges));
    }

    // Step 2: Preferred label match
    if let Some(ref label) = outcome.preferred_label {
        let normalized = normalize_label(label);
        for edge in edges {
            if let Some(ref elabel) = edge.label {
                if normalize_label(elabel) == normalized {
                    return Some(edge);
                }
            }
        }
    }

    // Step 3: Suggested next IDs
    for suggested in &outcome.suggested_next_ids {
        for edge in edges {
            if edge.to == *suggested {
                return Some(edge);
            }
        }
    }

    // Step 4 & 5: Unconditional edges by weight with lexical tiebreak
    let unconditional: Vec<_> = edges.iter().filter(|e| e.condition.is_none()).collect();
    if unconditional.is_empty() {
        // Last resort: return first edge regardless
        return edges.first();
    }
    Some(best_by_weight_then_lexical(&unconditional))
}

/// Select the next edge to follow after a node returns FAIL.
///
/// Narrower than [`select_edge`]: only edges with a non-empty guard that
/// evaluates true are eligible (picked by weight DESC, to_node ASC). There is
/// no fall-through to preferred-label, suggested-ids, or unconditional edges —
/// an edge with an empty condition is never a fail-route target.
pub fn select_fail_edge<'a>(
    node_id: &str,
    resolve: &dyn Fn(&str) -> String,
    graph: &'a PipelineGraph,
) -> Option<&'a PipelineEdge> {
    let edges = graph.outgoing_edges(node_id);
    let condition_edges: Vec<_> = edges
        .iter()
        .filter(|e| {
            if let Some(ref cond) = e.condition {
                if let Ok(expr) = parse_condition(cond) {
                    evaluate_condition(&expr, resolve)
                } else {
                    false
                }
            } else {
                false
            }
        })
        .collect();
    if condition_edges.is_empty() {
        return None;
    }
    Some(best_by_weight_then_lexical(&condition_edges))
}

/// Normalize a label for comparison: lowercase, strip accelerator prefixes like
/// `[Y]`, `Y)`, `Y-`.
fn normalize_label(label: &str) -> String {
    let s = label.trim().to_lowercase();
    // Strip accelerator prefixes: [Y] , Y) , Y-
    // Only match if there's an actual accelerator pattern followed by content.
    regex::Regex::new(r"^(?:\[\w\]\s*|\w\)\s*|\w\s?-\s*)")
        .unwrap()
        .replace(&s, "")
        .to_string()
}

/// Pick the edge with the highest weight; break ties by lexicographically
/// smallest `to` field.
fn best_by_weight_then_lexical<'a>(edges: &[&'a PipelineEdge]) -> &'a PipelineEdge {
    edges
        .iter()
        .copied()
        .max_by(|a, b| {
            a.weight
                .cmp(&b.weight)
                .then(b.to.cmp(&a.to)) // lexical ascending = reverse compare
        })
        .unwrap()
}
