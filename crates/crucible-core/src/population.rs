//! Population management: parent selection and environmental truncation.

use rand::Rng;

use crate::individual::{Individual, Population};
use crate::sorter::environmental_selection;

/// Binary tournament by (rank asc, crowding desc). Members must be ranked.
pub fn binary_tournament(members: &[Individual], rng: &mut impl Rng) -> usize {
    debug_assert!(!members.is_empty());
    let a = rng.gen_range(0..members.len());
    let b = rng.gen_range(0..members.len());
    let better = |i: usize, j: usize| -> usize {
        let (ri, rj) = (
            members[i].rank.unwrap_or(usize::MAX),
            members[j].rank.unwrap_or(usize::MAX),
        );
        match ri.cmp(&rj) {
            std::cmp::Ordering::Less => i,
            std::cmp::Ordering::Greater => j,
            std::cmp::Ordering::Equal => {
                if members[i].crowding >= members[j].crowding {
                    i
                } else {
                    j
                }
            }
        }
    };
    better(a, b)
}

/// Draw `pairs` parent pairs by repeated binary tournament.
pub fn select_parent_pairs(
    population: &Population,
    pairs: usize,
    rng: &mut impl Rng,
) -> Vec<(usize, usize)> {
    (0..pairs)
        .map(|_| {
            (
                binary_tournament(&population.members, rng),
                binary_tournament(&population.members, rng),
            )
        })
        .collect()
}

/// Merge offspring into the population and truncate back to the target size
/// via environmental selection.
pub fn merge_and_truncate(population: &mut Population, offspring: Vec<Individual>, epsilon: &[f64]) {
    let mut merged = std::mem::take(&mut population.members);
    merged.extend(offspring);
    population.members = environmental_selection(merged, population.target_size, epsilon);
}
