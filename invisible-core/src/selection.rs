//! Coin selection.
//!
//! Two strategies, tried in order:
//!
//! 1. A depth-first search over combinations of the candidate notes (sorted
//!    ascending) for a set whose sum lands in `[target, target + dust]`. A
//!    branch stops growing as soon as its sum reaches the target. Among the
//!    qualifying sets the one with the most notes wins; ties go to the first
//!    found. No refund note is produced; the excess (at most `dust`) is
//!    absorbed by the order.
//! 2. Largest-first greedy accumulation, with `refund = sum - target`.
//!
//! The search visits at most [`MAX_SEARCH_NODES`] nodes. When the budget runs
//! out the best set found so far is kept, or the greedy fallback is used.

use tracing::debug;

use crate::error::{Result, WalletError};
use crate::state::Note;

/// Upper bound on combination-search nodes per selection.
pub const MAX_SEARCH_NODES: usize = 1 << 16;

/// Minimum number of notes a split must consolidate to be worth submitting.
pub const MIN_SPLIT_NOTES: usize = 6;

/// Chosen inputs for a spend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    /// Selected notes: ascending for the no-refund branch, largest first for the fallback.
    pub notes: Vec<Note>,
    /// Amount owed back to the spender as a refund note.
    pub refund: u64,
    /// Amount above the target absorbed without a refund note (no-refund branch only).
    pub excess: u64,
    /// Whether the no-refund search produced this selection.
    pub exact: bool,
}

impl Selection {
    /// Exact sum of the selected amounts.
    pub fn total(&self) -> u128 {
        self.notes.iter().map(|n| u128::from(n.amount)).sum()
    }
}

struct Search<'a> {
    amounts: &'a [u64],
    target: u128,
    ceiling: u128,
    budget: usize,
    current: Vec<usize>,
    best: Option<Vec<usize>>,
}

impl Search<'_> {
    fn run(&mut self, start: usize, sum: u128) {
        for i in start..self.amounts.len() {
            if self.budget == 0 {
                return;
            }
            self.budget -= 1;

            self.current.push(i);
            let next = sum + u128::from(self.amounts[i]);
            if next >= self.target {
                let more_notes = self
                    .best
                    .as_ref()
                    .map_or(true, |best| self.current.len() > best.len());
                if next <= self.ceiling && more_notes {
                    self.best = Some(self.current.clone());
                }
            } else {
                self.run(i + 1, next);
            }
            self.current.pop();
        }
    }
}

fn sorted_ascending(notes: &[Note]) -> Vec<Note> {
    let mut sorted = notes.to_vec();
    sorted.sort_by_key(|n| n.amount);
    sorted
}

fn narrow(amount: u128) -> Result<u64> {
    u64::try_from(amount)
        .map_err(|_| WalletError::InvalidInput(format!("amount {amount} does not fit in u64")))
}

fn plan(notes: &[Note], target: u64, dust: u64) -> Result<Selection> {
    if target == 0 {
        return Err(WalletError::InvalidInput("spend amount must be positive".into()));
    }

    let available: u128 = notes.iter().map(|n| u128::from(n.amount)).sum();
    if available < u128::from(target) {
        return Err(WalletError::InsufficientFunds {
            token: notes.first().map(|n| n.token).unwrap_or_default(),
            requested: target,
            available: u64::try_from(available).unwrap_or(u64::MAX),
        });
    }

    let sorted = sorted_ascending(notes);
    let amounts: Vec<u64> = sorted.iter().map(|n| n.amount).collect();

    let mut search = Search {
        amounts: &amounts,
        target: u128::from(target),
        ceiling: u128::from(target) + u128::from(dust),
        budget: MAX_SEARCH_NODES,
        current: Vec::new(),
        best: None,
    };
    search.run(0, 0);
    if search.budget == 0 {
        debug!(candidates = sorted.len(), "combination search budget exhausted");
    }

    if let Some(indices) = search.best {
        let chosen: Vec<Note> = indices.iter().map(|&i| sorted[i].clone()).collect();
        let total: u128 = chosen.iter().map(|n| u128::from(n.amount)).sum();
        return Ok(Selection {
            notes: chosen,
            refund: 0,
            excess: narrow(total - u128::from(target))?,
            exact: true,
        });
    }

    let mut chosen = Vec::new();
    let mut total: u128 = 0;
    for note in sorted.iter().rev() {
        if total >= u128::from(target) {
            break;
        }
        total += u128::from(note.amount);
        chosen.push(note.clone());
    }

    Ok(Selection {
        notes: chosen,
        refund: narrow(total - u128::from(target))?,
        excess: 0,
        exact: false,
    })
}

/// Pick notes covering `target`.
pub fn select_inputs(notes: &[Note], target: u64, dust: u64) -> Result<Selection> {
    let selection = plan(notes, target, dust)?;
    debug!(
        target,
        inputs = selection.notes.len(),
        refund = selection.refund,
        exact = selection.exact,
        "selected inputs"
    );
    Ok(selection)
}

/// Pick notes for a restructuring split.
///
/// Returns `None` when the split would not reduce fragmentation: the
/// no-refund set has fewer than [`MIN_SPLIT_NOTES`] notes, or the greedy
/// refund is below `dust`.
pub fn select_for_split(notes: &[Note], target: u64, dust: u64) -> Result<Option<Selection>> {
    let selection = plan(notes, target, dust)?;
    let beneficial = if selection.exact {
        selection.notes.len() >= MIN_SPLIT_NOTES
    } else {
        selection.refund >= dust
    };
    if !beneficial {
        debug!(target, inputs = selection.notes.len(), "no beneficial split");
        return Ok(None);
    }
    Ok(Some(selection))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Felt;
    use proptest::prelude::*;

    fn notes(amounts: &[u64]) -> Vec<Note> {
        amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| {
                Note::new(i as u64 + 1, Felt::from(100 + i as u64), 55555, *amount, Felt::ONE)
            })
            .collect()
    }

    fn amounts(selection: &Selection) -> Vec<u64> {
        selection.notes.iter().map(|n| n.amount).collect()
    }

    #[test]
    fn test_prefers_combination_with_most_notes() {
        let selection = select_inputs(&notes(&[100, 200, 5]), 300, 5).expect("should select");
        assert!(selection.exact);
        assert_eq!(amounts(&selection), vec![5, 100, 200]);
        assert_eq!(selection.refund, 0);
        assert_eq!(selection.excess, 5);
    }

    #[test]
    fn test_falls_back_to_largest_first() {
        let selection = select_inputs(&notes(&[100, 250, 400]), 300, 5).expect("should select");
        assert!(!selection.exact);
        assert_eq!(amounts(&selection), vec![400]);
        assert_eq!(selection.refund, 100);
    }

    #[test]
    fn test_fallback_accumulates_several_notes() {
        let selection = select_inputs(&notes(&[10, 20, 400, 500]), 880, 0).expect("should select");
        assert_eq!(amounts(&selection), vec![500, 400]);
        assert_eq!(selection.refund, 20);
    }

    #[test]
    fn test_insufficient_funds() {
        let result = select_inputs(&notes(&[1, 2, 3]), 7, 0);
        assert!(matches!(
            result,
            Err(WalletError::InsufficientFunds { requested: 7, available: 6, .. })
        ));
    }

    #[test]
    fn test_zero_target_rejected() {
        assert!(matches!(select_inputs(&notes(&[1]), 0, 0), Err(WalletError::InvalidInput(_))));
    }

    #[test]
    fn test_split_rejected_for_few_notes() {
        let result = select_for_split(&notes(&[50, 50, 50, 50]), 150, 5).expect("should run");
        assert!(result.is_none());
    }

    #[test]
    fn test_split_accepted_for_many_small_notes() {
        let result = select_for_split(&notes(&[10; 8]), 60, 0).expect("should run");
        let selection = result.expect("split should be beneficial");
        assert_eq!(selection.notes.len(), 6);
        assert_eq!(selection.refund, 0);
    }

    #[test]
    fn test_split_accepted_with_refund() {
        let result = select_for_split(&notes(&[100, 250, 400]), 300, 5).expect("should run");
        assert_eq!(result.map(|s| s.refund), Some(100));
    }

    #[test]
    fn test_search_budget_bounds_large_inputs() {
        let many = notes(&[1; 64]);
        let selection = select_inputs(&many, 40, 0).expect("should select");
        assert_eq!(selection.total(), 40);
    }

    #[test]
    fn test_amounts_near_u64_max_do_not_overflow() {
        let selection =
            select_inputs(&notes(&[u64::MAX, u64::MAX]), u64::MAX - 1, 10).expect("should select");
        assert_eq!(amounts(&selection), vec![u64::MAX]);
        assert_eq!(selection.excess, 1);

        let selection = select_inputs(&notes(&[u64::MAX - 5, 10]), u64::MAX, 0).expect("should select");
        assert!(!selection.exact);
        assert_eq!(selection.total(), u128::from(u64::MAX) + 5);
        assert_eq!(selection.refund, 5);
    }

    proptest! {
        #[test]
        fn prop_total_value_law(
            values in prop::collection::vec(1u64..1_000, 1..12),
            target in 1u64..3_000,
            dust in 0u64..50,
        ) {
            let candidates = notes(&values);
            let total: u64 = values.iter().sum();
            match select_inputs(&candidates, target, dust) {
                Ok(selection) => {
                    prop_assert_eq!(
                        selection.total(),
                        u128::from(target) + u128::from(selection.refund) + u128::from(selection.excess)
                    );
                    prop_assert!(selection.excess <= dust);
                    if selection.exact {
                        prop_assert_eq!(selection.refund, 0);
                    } else {
                        prop_assert_eq!(selection.excess, 0);
                    }
                }
                Err(WalletError::InsufficientFunds { .. }) => prop_assert!(total < target),
                Err(other) => prop_assert!(false, "unexpected error {}", other),
            }
        }
    }
}
