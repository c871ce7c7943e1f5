//! ε-dominance Pareto sorting: front partitioning, crowding distance, and
//! environmental selection.
//!
//! Dominance is evaluated on ε-box coordinates (each objective floored to its
//! ε grid): A dominates B iff A's box is no worse everywhere and strictly
//! better somewhere. Two individuals in the same box never dominate each
//! other here; the archive resolves box representatives separately.
//!
//! All tie-breaks are stable in input order, so a fixed input ordering gives
//! a fixed output ordering and runs stay replayable.

use crate::individual::Individual;

/// Floor each objective to its ε-box boundary.
pub fn epsilon_box(objectives: &[f64], epsilon: &[f64]) -> Vec<i64> {
    objectives
        .iter()
        .zip(epsilon.iter())
        .map(|(o, e)| (o / e).floor() as i64)
        .collect()
}

/// A ε-dominates B on box coordinates: ≤ everywhere, < somewhere.
pub fn epsilon_dominates(a: &[f64], b: &[f64], epsilon: &[f64]) -> bool {
    let box_a = epsilon_box(a, epsilon);
    let box_b = epsilon_box(b, epsilon);
    let mut strictly_better = false;
    for (ba, bb) in box_a.iter().zip(box_b.iter()) {
        if ba > bb {
            return false;
        }
        if ba < bb {
            strictly_better = true;
        }
    }
    strictly_better
}

pub fn same_box(a: &[f64], b: &[f64], epsilon: &[f64]) -> bool {
    epsilon_box(a, epsilon) == epsilon_box(b, epsilon)
}

/// Secondary scalar used when two candidates share an ε-box: sum of
/// objectives normalized by the per-objective (min, max) ranges of the set
/// being compared. Lower is better.
pub fn normalized_sum(objectives: &[f64], ranges: &[(f64, f64)]) -> f64 {
    objectives
        .iter()
        .zip(ranges.iter())
        .map(|(o, &(lo, hi))| {
            let span = hi - lo;
            if span > 0.0 {
                (o - lo) / span
            } else {
                0.0
            }
        })
        .sum()
}

/// Per-objective (min, max) over a set of objective vectors.
pub fn objective_ranges(objectives: &[&[f64]]) -> Vec<(f64, f64)> {
    if objectives.is_empty() {
        return Vec::new();
    }
    let m = objectives[0].len();
    (0..m)
        .map(|j| {
            let mut lo = f64::INFINITY;
            let mut hi = f64::NEG_INFINITY;
            for obj in objectives {
                lo = lo.min(obj[j]);
                hi = hi.max(obj[j]);
            }
            (lo, hi)
        })
        .collect()
}

/// Partition indices into successive non-dominated fronts. Front membership
/// is order-independent; order *within* a front follows input order.
pub fn partition_fronts(objectives: &[Vec<f64>], epsilon: &[f64]) -> Vec<Vec<usize>> {
    let n = objectives.len();
    let mut fronts: Vec<Vec<usize>> = Vec::new();
    let mut remaining: Vec<usize> = (0..n).collect();

    while !remaining.is_empty() {
        let mut front = Vec::new();
        for &i in &remaining {
            let dominated = remaining
                .iter()
                .any(|&j| j != i && epsilon_dominates(&objectives[j], &objectives[i], epsilon));
            if !dominated {
                front.push(i);
            }
        }
        // Defensive: with finite objectives somebody is always non-dominated,
        // but NaNs would otherwise loop forever.
        if front.is_empty() {
            front = remaining.clone();
        }
        remaining.retain(|i| !front.contains(i));
        fronts.push(front);
    }
    fronts
}

/// Crowding distance for one front, indexed like `front_objectives`.
/// Boundary members get infinity and are always preserved by truncation.
pub fn crowding_distances(front_objectives: &[&[f64]]) -> Vec<f64> {
    let n = front_objectives.len();
    if n == 0 {
        return Vec::new();
    }
    if n <= 2 {
        return vec![f64::INFINITY; n];
    }

    let m = front_objectives[0].len();
    let mut distance = vec![0.0_f64; n];

    for j in 0..m {
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            front_objectives[a][j]
                .partial_cmp(&front_objectives[b][j])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let lo = front_objectives[order[0]][j];
        let hi = front_objectives[order[n - 1]][j];
        let span = hi - lo;

        distance[order[0]] = f64::INFINITY;
        distance[order[n - 1]] = f64::INFINITY;

        if span > 0.0 {
            for k in 1..n - 1 {
                let gap = front_objectives[order[k + 1]][j] - front_objectives[order[k - 1]][j];
                distance[order[k]] += gap / span;
            }
        }
    }
    distance
}

/// Assign rank and crowding distance to every member in place. Members must
/// all be evaluated.
pub fn assign_ranks(members: &mut [Individual], epsilon: &[f64]) {
    let objectives: Vec<Vec<f64>> = members
        .iter()
        .map(|i| i.objectives.clone().unwrap_or_default())
        .collect();

    let fronts = partition_fronts(&objectives, epsilon);
    for (rank, front) in fronts.iter().enumerate() {
        let front_objs: Vec<&[f64]> = front.iter().map(|&i| objectives[i].as_slice()).collect();
        let crowding = crowding_distances(&front_objs);
        for (pos, &i) in front.iter().enumerate() {
            members[i].rank = Some(rank);
            members[i].crowding = crowding[pos];
        }
    }
}

/// Environmental selection to `n` members: whole fronts in rank order, then
/// the overflow front by descending crowding distance with stable ties.
/// Returns the survivors with ranks and crowding already assigned.
pub fn environmental_selection(
    mut merged: Vec<Individual>,
    n: usize,
    epsilon: &[f64],
) -> Vec<Individual> {
    assign_ranks(&mut merged, epsilon);
    if merged.len() <= n {
        return merged;
    }

    let objectives: Vec<Vec<f64>> = merged
        .iter()
        .map(|i| i.objectives.clone().unwrap_or_default())
        .collect();
    let fronts = partition_fronts(&objectives, epsilon);

    let mut selected: Vec<usize> = Vec::with_capacity(n);
    for front in fronts {
        if selected.len() + front.len() <= n {
            selected.extend_from_slice(&front);
            if selected.len() == n {
                break;
            }
        } else {
            let mut by_crowding = front;
            // Stable sort keeps insertion order among equal crowding values.
            by_crowding.sort_by(|&a, &b| {
                merged[b]
                    .crowding
                    .partial_cmp(&merged[a].crowding)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            by_crowding.truncate(n - selected.len());
            selected.extend_from_slice(&by_crowding);
            break;
        }
    }

    let mut keep = vec![false; merged.len()];
    for &i in &selected {
        keep[i] = true;
    }
    merged
        .into_iter()
        .zip(keep)
        .filter_map(|(ind, k)| k.then_some(ind))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn individuals_from(objs: &[Vec<f64>]) -> Vec<Individual> {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        objs.iter()
            .map(|o| {
                let mut ind = Individual::new(vec![0.0], 0, &mut rng);
                ind.set_evaluation(o.clone(), 1.0, 0.0);
                ind
            })
            .collect()
    }

    #[test]
    fn box_floor_handles_negatives() {
        assert_eq!(epsilon_box(&[1.05, -0.05], &[0.1, 0.1]), vec![10, -1]);
    }

    #[test]
    fn box_scenario_two_objectives() {
        // A=(1.0,5.0) B=(1.05,5.0) share box (10,50); C=(2.0,1.0) box (20,10);
        // D=(2.0,6.0) box (20,60) is dominated by C alone.
        let eps = [0.1, 0.1];
        let a = [1.0, 5.0];
        let b = [1.05, 5.0];
        let c = [2.0, 1.0];
        let d = [2.0, 6.0];

        assert!(same_box(&a, &b, &eps));
        assert!(!epsilon_dominates(&a, &b, &eps));
        assert!(!epsilon_dominates(&b, &a, &eps));
        assert!(epsilon_dominates(&c, &d, &eps));
        assert!(epsilon_dominates(&a, &d, &eps));
        assert!(!epsilon_dominates(&c, &a, &eps));
        assert!(!epsilon_dominates(&a, &c, &eps));

        let objs = vec![a.to_vec(), b.to_vec(), c.to_vec(), d.to_vec()];
        let fronts = partition_fronts(&objs, &eps);
        assert_eq!(fronts[0], vec![0, 1, 2]);
        assert_eq!(fronts[1], vec![3]);
    }

    #[test]
    fn front_membership_is_permutation_invariant() {
        let base = vec![
            vec![1.0, 5.0],
            vec![1.05, 5.0],
            vec![2.0, 1.0],
            vec![2.0, 6.0],
            vec![0.5, 9.0],
            vec![3.0, 3.0],
        ];
        let eps = [0.1, 0.1];
        let fronts_a = partition_fronts(&base, &eps);

        // Reverse the input; map indices back and compare memberships.
        let reversed: Vec<Vec<f64>> = base.iter().rev().cloned().collect();
        let fronts_b = partition_fronts(&reversed, &eps);
        let n = base.len();
        let remap = |fs: &[Vec<usize>]| -> Vec<std::collections::BTreeSet<usize>> {
            fs.iter()
                .map(|f| f.iter().copied().collect())
                .collect()
        };
        let remap_rev = |fs: &[Vec<usize>]| -> Vec<std::collections::BTreeSet<usize>> {
            fs.iter()
                .map(|f| f.iter().map(|&i| n - 1 - i).collect())
                .collect()
        };
        assert_eq!(remap(&fronts_a), remap_rev(&fronts_b));
    }

    #[test]
    fn boundary_members_get_infinite_crowding() {
        let objs: Vec<Vec<f64>> = vec![
            vec![0.0, 4.0],
            vec![1.0, 3.0],
            vec![2.0, 2.0],
            vec![4.0, 0.0],
        ];
        let refs: Vec<&[f64]> = objs.iter().map(|o| o.as_slice()).collect();
        let d = crowding_distances(&refs);
        assert!(d[0].is_infinite());
        assert!(d[3].is_infinite());
        assert!(d[1].is_finite() && d[1] > 0.0);
        assert!(d[2].is_finite() && d[2] > 0.0);
    }

    #[test]
    fn selection_keeps_whole_first_front() {
        let merged = individuals_from(&[
            vec![1.0, 5.0],
            vec![2.0, 1.0],
            vec![5.0, 5.0],
            vec![6.0, 6.0],
            vec![7.0, 7.0],
        ]);
        let eps = [0.1, 0.1];
        let survivors = environmental_selection(merged, 3, &eps);
        assert_eq!(survivors.len(), 3);
        let front0: Vec<_> = survivors.iter().filter(|i| i.rank == Some(0)).collect();
        assert_eq!(front0.len(), 2);
    }

    #[test]
    fn overflow_front_truncated_by_crowding() {
        // One big mutually non-dominating front; truncation must keep the
        // spread-out boundary points.
        let merged = individuals_from(&[
            vec![0.0, 10.0],
            vec![2.0, 8.0],
            vec![2.05, 7.95], // crowded next to the previous point
            vec![5.0, 5.0],
            vec![10.0, 0.0],
        ]);
        let eps = [0.01, 0.01];
        let survivors = environmental_selection(merged, 4, &eps);
        assert_eq!(survivors.len(), 4);
        let objs: Vec<Vec<f64>> = survivors
            .iter()
            .map(|i| i.objectives.clone().unwrap())
            .collect();
        assert!(objs.contains(&vec![0.0, 10.0]));
        assert!(objs.contains(&vec![10.0, 0.0]));
    }

    #[test]
    fn selection_is_deterministic() {
        let objs: Vec<Vec<f64>> = (0..10)
            .map(|i| vec![i as f64, 10.0 - i as f64])
            .collect();
        let eps = [0.5, 0.5];
        let a = environmental_selection(individuals_from(&objs), 6, &eps);
        let b = environmental_selection(individuals_from(&objs), 6, &eps);
        let ids_a: Vec<Vec<f64>> = a.iter().map(|i| i.objectives.clone().unwrap()).collect();
        let ids_b: Vec<Vec<f64>> = b.iter().map(|i| i.objectives.clone().unwrap()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn normalized_sum_orders_same_box_pair() {
        let ranges = vec![(1.0, 2.0), (1.0, 6.0)];
        assert!(normalized_sum(&[1.0, 5.0], &ranges) < normalized_sum(&[1.05, 5.0], &ranges));
    }
}
