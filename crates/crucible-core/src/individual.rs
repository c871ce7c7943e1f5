//! Core value types: one candidate solution and the working population.

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JSON has no representation for infinity (`serde_json` writes `null`), but
/// boundary members of every front carry infinite crowding. Round-trip it as
/// an optional: `null` on the wire restores to infinity.
mod crowding_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

/// A single candidate: parameter vector plus cached evaluation and ranking
/// state. Parameters are immutable once evaluated except through accepted
/// agent edits, which go through [`Individual::edit_param`] and drop the
/// cached evaluation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Individual {
    pub id: Uuid,
    pub params: Vec<f64>,
    /// Present only after evaluation; cleared by any parameter edit.
    pub objectives: Option<Vec<f64>>,
    /// Surrogate confidence for the cached objectives, in [0, 1].
    pub confidence: Option<f64>,
    /// Pareto rank assigned by the sorter; undefined before the first sort.
    pub rank: Option<usize>,
    /// Crowding distance within the individual's front. Tie-breaking only.
    /// Infinite for boundary members.
    #[serde(with = "crowding_serde")]
    pub crowding: f64,
    pub born_at_generation: u64,
    /// Finite objectives and confidence at or above the run's threshold.
    pub feasible: bool,
}

impl Individual {
    /// Ids are drawn from the run's seeded RNG so a resumed run mints the
    /// same ids for the same offspring.
    pub fn new(params: Vec<f64>, generation: u64, rng: &mut impl Rng) -> Self {
        Self {
            id: Uuid::from_u128(rng.gen()),
            params,
            objectives: None,
            confidence: None,
            rank: None,
            crowding: 0.0,
            born_at_generation: generation,
            feasible: false,
        }
    }

    pub fn is_evaluated(&self) -> bool {
        self.objectives.is_some()
    }

    pub fn set_evaluation(&mut self, objectives: Vec<f64>, confidence: f64, threshold: f64) {
        self.feasible = objectives.iter().all(|o| o.is_finite()) && confidence >= threshold;
        self.objectives = Some(objectives);
        self.confidence = Some(confidence);
    }

    /// Overwrite one parameter and invalidate everything derived from it.
    pub fn edit_param(&mut self, index: usize, value: f64) {
        self.params[index] = value;
        self.objectives = None;
        self.confidence = None;
        self.rank = None;
        self.crowding = 0.0;
        self.feasible = false;
    }
}

/// Ordered collection of individuals. Order is insertion-stable and
/// load-bearing: the sorter's tie-breaks depend on it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Population {
    pub members: Vec<Individual>,
    pub target_size: usize,
    pub generation: u64,
}

impl Population {
    pub fn new(target_size: usize) -> Self {
        Self {
            members: Vec::with_capacity(target_size),
            target_size,
            generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn find(&self, id: Uuid) -> Option<&Individual> {
        self.members.iter().find(|i| i.id == id)
    }

    pub fn find_mut(&mut self, id: Uuid) -> Option<&mut Individual> {
        self.members.iter_mut().find(|i| i.id == id)
    }

    pub fn infeasible_count(&self) -> usize {
        self.members.iter().filter(|i| !i.feasible).count()
    }

    pub fn front0_size(&self) -> usize {
        self.members.iter().filter(|i| i.rank == Some(0)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn edit_invalidates_evaluation() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut ind = Individual::new(vec![0.5, 0.5], 0, &mut rng);
        ind.set_evaluation(vec![1.0, 2.0], 0.9, 0.5);
        assert!(ind.is_evaluated());
        assert!(ind.feasible);

        ind.edit_param(0, 0.7);
        assert!(!ind.is_evaluated());
        assert!(ind.rank.is_none());
        assert!(!ind.feasible);
        assert_eq!(ind.params[0], 0.7);
    }

    #[test]
    fn low_confidence_marks_infeasible() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut ind = Individual::new(vec![0.1], 0, &mut rng);
        ind.set_evaluation(vec![1.0], 0.2, 0.5);
        assert!(!ind.feasible);

        ind.set_evaluation(vec![f64::NAN], 0.9, 0.5);
        assert!(!ind.feasible);
    }

    #[test]
    fn ids_are_deterministic_per_seed() {
        let mut a = ChaCha8Rng::seed_from_u64(7);
        let mut b = ChaCha8Rng::seed_from_u64(7);
        let x = Individual::new(vec![0.0], 0, &mut a);
        let y = Individual::new(vec![0.0], 0, &mut b);
        assert_eq!(x.id, y.id);
    }
}
