//! Stacking-strategy optimizer
//!
//! Takes the applicable candidates (already filtered and priced) and picks
//! the subset that actually applies. The output is always sorted by
//! priority descending with insertion order breaking ties.

use tracing::debug;

use crate::types::{Discount, DiscountApplication, StackingBehavior, StackingStrategy};

/// Above this many candidates, `bestCombination` falls back to
/// `byPriority` instead of enumerating subsets.
pub const BEST_COMBINATION_LIMIT: usize = 10;

/// One applicable discount with its computed application and its position
/// in the original discount list.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub discount: Discount,
    pub application: DiscountApplication,
    pub index: usize,
}

/// Apply a stacking strategy to the candidate set.
pub fn select(mut candidates: Vec<Candidate>, strategy: StackingStrategy) -> Vec<Candidate> {
    candidates.sort_by_key(|candidate| candidate.index);
    let mut selected = match strategy {
        StackingStrategy::None => best_single(candidates),
        StackingStrategy::All => candidates,
        StackingStrategy::ByPriority => by_priority(candidates),
        StackingStrategy::BestCombination => {
            if candidates.len() > BEST_COMBINATION_LIMIT {
                debug!(
                    count = candidates.len(),
                    "too many candidates for bestCombination, falling back to byPriority"
                );
                by_priority(candidates)
            } else {
                best_combination(candidates)
            }
        }
    };
    // Priority descending, insertion order on ties
    selected.sort_by(|a, b| {
        b.discount
            .priority
            .cmp(&a.discount.priority)
            .then(a.index.cmp(&b.index))
    });
    selected
}

/// Single best candidate by amount, then priority, then insertion order.
fn best_single(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut best: Option<Candidate> = None;
    for candidate in candidates {
        let wins = match &best {
            None => true,
            Some(current) => {
                candidate.application.amount > current.application.amount
                    || (candidate.application.amount == current.application.amount
                        && candidate.discount.priority > current.discount.priority)
            }
        };
        if wins {
            best = Some(candidate);
        }
    }
    best.into_iter().collect()
}

/// Walk priority-descending, honoring exclusive markings as we go.
fn by_priority(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.discount
            .priority
            .cmp(&a.discount.priority)
            .then(a.index.cmp(&b.index))
    });
    let mut selected: Vec<Candidate> = Vec::new();
    let mut used_targets: Vec<String> = Vec::new();
    for candidate in candidates {
        let target_key = candidate.discount.target.key();
        match candidate.discount.stacking {
            StackingBehavior::Exclusive => {
                if !selected.is_empty() {
                    continue;
                }
                selected.push(candidate);
                // An applied exclusive discount ends the walk
                break;
            }
            StackingBehavior::ExclusiveByTarget => {
                if used_targets.contains(&target_key) {
                    continue;
                }
                used_targets.push(target_key);
                selected.push(candidate);
            }
            StackingBehavior::Stackable => {
                used_targets.push(target_key);
                selected.push(candidate);
            }
        }
    }
    selected
}

/// Whether a subset obeys the exclusive/exclusiveByTarget constraints.
fn subset_is_legal(subset: &[&Candidate]) -> bool {
    if subset.len() > 1
        && subset
            .iter()
            .any(|c| c.discount.stacking == StackingBehavior::Exclusive)
    {
        return false;
    }
    for candidate in subset {
        if candidate.discount.stacking != StackingBehavior::ExclusiveByTarget {
            continue;
        }
        let key = candidate.discount.target.key();
        let sharing = subset
            .iter()
            .filter(|other| other.discount.target.key() == key)
            .count();
        if sharing > 1 {
            return false;
        }
    }
    true
}

/// Exhaustive subset search: greatest total amount, then fewest discounts,
/// then priorities descending.
fn best_combination(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let n = candidates.len();
    if n == 0 {
        return candidates;
    }
    // (mask, total, size, priorities sorted descending)
    let mut best: Option<(usize, f64, usize, Vec<i64>)> = None;

    for mask in 1usize..(1 << n) {
        let subset: Vec<&Candidate> = (0..n)
            .filter(|bit| mask & (1 << bit) != 0)
            .map(|bit| &candidates[bit])
            .collect();
        if !subset_is_legal(&subset) {
            continue;
        }
        let total: f64 = subset.iter().map(|c| c.application.amount).sum();
        let mut priorities: Vec<i64> = subset.iter().map(|c| c.discount.priority).collect();
        priorities.sort_unstable_by(|a, b| b.cmp(a));

        let wins = match &best {
            None => true,
            Some((_, best_total, best_len, best_priorities)) => {
                total > *best_total
                    || (total == *best_total
                        && (subset.len() < *best_len
                            || (subset.len() == *best_len && priorities > *best_priorities)))
            }
        };
        if wins {
            best = Some((mask, total, subset.len(), priorities));
        }
    }
    let best_mask = best.map(|(mask, ..)| mask).unwrap_or(0);

    candidates
        .into_iter()
        .enumerate()
        .filter(|(position, _)| best_mask & (1 << position) != 0)
        .map(|(_, candidate)| candidate)
        .collect()
}
