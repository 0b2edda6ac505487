// Decides which parts of a filter tree the database enforces.
//
// The generator and the residual evaluator both walk the tree from the root in
// an "enforced" context and consult `placement` at every node, so they always
// agree on what SQL already guaranteed.

use querydsl_core::{Filter, LogicalOperator};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The whole subtree becomes one SQL fragment.
    Pushed,
    /// An AND group holding custom conditions: each child is placed on its own.
    Split,
    /// Evaluated entirely in-process; contributes nothing to the WHERE clause.
    Residual,
}

/// Placement of a node reached through AND groups only (or the root).
///
/// Dropping a predicate from an AND only widens the fetched set, so AND groups
/// may be split. Under OR/NOT/NOR/XOR a dropped sibling changes the meaning,
/// so such a group is pushed whole or not at all.
///
/// A fully native NOR/XOR has no SQL translation. Generators reject it wherever
/// it appears in the tree, including under groups evaluated in-process, so the
/// outcome never depends on its parent.
pub fn placement(filter: &Filter) -> Placement {
    if filter.is_fully_native() {
        return Placement::Pushed;
    }
    match filter {
        Filter::Group(group) if group.operator == LogicalOperator::And => Placement::Split,
        _ => Placement::Residual,
    }
}

/// Whether rows returned by the pushed-down SQL still need in-process filtering.
pub fn needs_residual(filter: &Filter) -> bool {
    !filter.is_fully_native()
}

/// Fields read by the parts of the tree evaluated in-process.
pub fn residual_fields(filter: &Filter, fields: &mut BTreeSet<String>) {
    match placement(filter) {
        Placement::Pushed => {}
        Placement::Split => {
            if let Filter::Group(group) = filter {
                for child in &group.conditions {
                    residual_fields(child, fields);
                }
            }
        }
        Placement::Residual => all_fields(filter, fields),
    }
}

/// Every field referenced by any condition in the tree.
pub fn all_fields(filter: &Filter, fields: &mut BTreeSet<String>) {
    filter.for_each_condition(&mut |cond| {
        fields.insert(cond.field.clone());
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use querydsl_core::Operator;

    fn native(field: &str) -> Filter {
        Filter::condition(field, Operator::Gt, 1)
    }

    #[test]
    fn test_fully_native_is_pushed() {
        let filter = Filter::or(vec![native("a"), Filter::not(native("b"))]);
        assert_eq!(placement(&filter), Placement::Pushed);
        assert!(!needs_residual(&filter));
    }

    #[test]
    fn test_and_with_custom_is_split() {
        let filter = Filter::and(vec![native("a"), Filter::custom("b", "is_odd")]);
        assert_eq!(placement(&filter), Placement::Split);

        let mut fields = BTreeSet::new();
        residual_fields(&filter, &mut fields);
        assert_eq!(fields.into_iter().collect::<Vec<_>>(), vec!["b".to_string()]);
    }

    #[test]
    fn test_mixed_or_is_residual() {
        let filter = Filter::and(vec![
            native("a"),
            Filter::or(vec![native("b"), Filter::custom("c", "is_odd")]),
        ]);
        let mut fields = BTreeSet::new();
        residual_fields(&filter, &mut fields);
        // `a` is enforced by SQL; the OR is not, so both of its fields are needed.
        assert_eq!(fields.into_iter().collect::<Vec<_>>(), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_not_over_mixed_and_is_residual() {
        let filter = Filter::not(Filter::and(vec![native("a"), Filter::custom("c", "is_odd")]));
        assert_eq!(placement(&filter), Placement::Residual);
    }

    #[test]
    fn test_custom_condition_is_residual() {
        assert_eq!(placement(&Filter::custom("age", "is_adult")), Placement::Residual);
    }
}
