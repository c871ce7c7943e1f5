//! External archive of the best non-dominated solutions found so far.
//!
//! Membership invariant: no two members ε-dominate each other, and no two
//! members share an ε-box (the box duel keeps a single representative).
//! Individuals are cloned on promotion; the archive never aliases the
//! population. The archive is the durable record of a run and serializes
//! independently of the live population.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::individual::Individual;
use crate::sorter::{
    crowding_distances, epsilon_dominates, normalized_sum, objective_ranges, same_box,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Archive {
    pub members: Vec<Individual>,
    /// Hard cap; `None` means unbounded. Exceeding it evicts the member with
    /// the lowest crowding distance.
    pub capacity: Option<usize>,
}

impl Archive {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            members: Vec::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Offer one candidate. Returns true if it was admitted.
    pub fn insert(&mut self, candidate: &Individual, epsilon: &[f64]) -> bool {
        let Some(cand_obj) = candidate.objectives.as_ref() else {
            return false;
        };
        if cand_obj.iter().any(|o| !o.is_finite()) {
            return false;
        }

        // Reject if any incumbent dominates the candidate, or wins its box.
        for member in &self.members {
            let member_obj = member.objectives.as_ref().map(|o| o.as_slice()).unwrap_or(&[]);
            if epsilon_dominates(member_obj, cand_obj, epsilon) {
                return false;
            }
            if same_box(member_obj, cand_obj, epsilon) {
                let all: Vec<&[f64]> = vec![member_obj, cand_obj];
                let ranges = objective_ranges(&all);
                // Incumbent keeps the box on ties: deterministic for a fixed
                // insertion sequence.
                if normalized_sum(member_obj, &ranges) <= normalized_sum(cand_obj, &ranges) {
                    return false;
                }
            }
        }

        // Candidate is in: drop everyone it dominates or out-duels.
        self.members.retain(|member| {
            let member_obj = member.objectives.as_ref().map(|o| o.as_slice()).unwrap_or(&[]);
            if epsilon_dominates(cand_obj, member_obj, epsilon) {
                return false;
            }
            if same_box(cand_obj, member_obj, epsilon) {
                let all: Vec<&[f64]> = vec![member_obj, cand_obj];
                let ranges = objective_ranges(&all);
                return normalized_sum(member_obj, &ranges) <= normalized_sum(cand_obj, &ranges);
            }
            true
        });

        self.members.push(candidate.clone());

        if let Some(cap) = self.capacity {
            while self.members.len() > cap {
                self.evict_most_crowded();
            }
        }
        true
    }

    /// Offer a batch; returns how many were admitted.
    pub fn update(&mut self, candidates: &[Individual], epsilon: &[f64]) -> usize {
        let mut admitted = 0;
        for candidate in candidates {
            if self.insert(candidate, epsilon) {
                admitted += 1;
            }
        }
        if admitted > 0 {
            debug!(admitted, size = self.members.len(), "archive updated");
        }
        admitted
    }

    /// Re-establish the pairwise invariant under a new epsilon vector, e.g.
    /// after an accepted epsilon edit.
    pub fn rebuild(&mut self, epsilon: &[f64]) {
        let old = std::mem::take(&mut self.members);
        for member in &old {
            self.insert(member, epsilon);
        }
    }

    /// Evict the member with the lowest crowding distance (first one on ties).
    fn evict_most_crowded(&mut self) {
        let objs: Vec<&[f64]> = self
            .members
            .iter()
            .map(|m| m.objectives.as_ref().map(|o| o.as_slice()).unwrap_or(&[]))
            .collect();
        let crowding = crowding_distances(&objs);
        let mut victim = 0;
        for (i, &c) in crowding.iter().enumerate() {
            if c < crowding[victim] {
                victim = i;
            }
        }
        let removed = self.members.remove(victim);
        debug!(id = %removed.id, "archive capacity eviction");
    }

    /// Set of occupied ε-boxes, used to detect a stalled front across
    /// generations.
    pub fn box_signature(&self, epsilon: &[f64]) -> BTreeSet<Vec<i64>> {
        self.members
            .iter()
            .filter_map(|m| m.objectives.as_ref())
            .map(|o| crate::sorter::epsilon_box(o, epsilon))
            .collect()
    }
}
