//! Reconciles the decisions of a multi-part query pattern.

use super::decision::{ConnectorDecision, Decision};
use crate::error::ResolveError;

fn incompatible(pattern: &str, reason: String) -> Decision {
    Decision::error(
        ResolveError::IncompatibleParts {
            pattern: pattern.to_string(),
            reason,
        },
        "Incompatible decisions for indexes matching the pattern.",
    )
}

/// Merge `rhs` into `lhs`, connector by connector.
fn merge_connectors(
    pattern: &str,
    lhs: &mut [ConnectorDecision],
    rhs: &[ConnectorDecision],
    rhs_index: &str,
) -> Result<(), Decision> {
    for right in rhs {
        let mut found = false;
        for left in lhs.iter_mut() {
            match (left, right) {
                (ConnectorDecision::Elastic { .. }, ConnectorDecision::Elastic { .. }) => {
                    found = true;
                }
                (
                    ConnectorDecision::Clickhouse {
                        table_name: lt,
                        indexes: li,
                        is_common_table: lc,
                    },
                    ConnectorDecision::Clickhouse {
                        table_name: rt,
                        indexes: ri,
                        is_common_table: rc,
                    },
                ) => {
                    if *lt != *rt {
                        return Err(incompatible(
                            pattern,
                            format!("different ClickHouse tables [{}] and [{}]", lt, rt),
                        ));
                    }
                    if *lc != *rc {
                        return Err(incompatible(
                            pattern,
                            "one index uses the common table, another does not".to_string(),
                        ));
                    }
                    if *lc {
                        for index in ri {
                            if !li.contains(index) {
                                li.push(index.clone());
                            }
                        }
                    } else if *li != *ri {
                        return Err(incompatible(
                            pattern,
                            format!("table [{}] serves indexes {:?} and {:?}", lt, li, ri),
                        ));
                    }
                    found = true;
                }
                _ => {}
            }
        }
        if !found {
            return Err(incompatible(
                pattern,
                format!(
                    "connector {} used for index [{}] is not used by the other indexes",
                    right, rhs_index
                ),
            ));
        }
    }
    Ok(())
}

/// Combine per-part decisions into one.
///
/// An error in any part wins. Empty parts are dropped and a pattern with
/// only empty parts is empty. Closed parts are dropped unless every part is
/// closed. The remaining parts must use the same backends; common table
/// parts union their indexes.
pub fn merge_decisions(pattern: &str, decisions: Vec<Decision>) -> Decision {
    if decisions.len() == 1 {
        return decisions.into_iter().next().unwrap_or_default();
    }

    if let Some(failed) = decisions.iter().find(|d| d.is_err()) {
        return failed.clone();
    }

    let non_empty: Vec<Decision> = decisions.into_iter().filter(|d| !d.is_empty).collect();
    if non_empty.is_empty() {
        return Decision::empty("No indexes matched, no decisions made.");
    }

    let open: Vec<Decision> = non_empty.iter().filter(|d| !d.is_closed).cloned().collect();
    if open.is_empty() {
        return Decision::closed("All indexes matching the pattern are closed.");
    }

    let mut parts = open.into_iter();
    let Some(first) = parts.next() else {
        return Decision::empty("No indexes matched, no decisions made.");
    };
    let mut merged = first.use_connectors.clone();

    for decision in parts {
        if decision.use_connectors.len() != merged.len() {
            return incompatible(
                pattern,
                format!(
                    "index [{}] uses {} connectors, index [{}] uses {}",
                    decision.index_pattern,
                    decision.use_connectors.len(),
                    first.index_pattern,
                    merged.len()
                ),
            );
        }
        if let Err(d) = merge_connectors(
            pattern,
            &mut merged,
            &decision.use_connectors,
            &decision.index_pattern,
        ) {
            return d;
        }
    }

    Decision::connectors(merged, "Merged decisions")
}
