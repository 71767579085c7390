//! Neighborhood generation over a field layout.

use std::collections::HashSet;

use rand::Rng;
use rand::seq::index;

use crate::compute::representation::{FieldLayout, FieldSpec, Instance, Setting};

/// Largest neighborhood distance explored for a layout:
/// `ceil(ratio * log2(bits))`, at least 1 and at most the dimension count.
pub fn max_distance(layout: &FieldLayout, ratio: f64) -> usize {
    let bits = layout.information_theoretic_bits();
    let distance = if bits > 1.0 {
        (ratio * bits.log2()).ceil() as usize
    } else {
        1
    };
    distance.clamp(1, layout.len().max(1))
}

/// Every instance differing from `center` in exactly one dimension.
///
/// Discrete dimensions take each other setting; continuous dimensions move
/// up and down by each step scale.
pub fn distance_one(layout: &FieldLayout, center: &Instance) -> Vec<Instance> {
    let mut neighbors = Vec::new();
    for (i, (spec, setting)) in layout.specs().iter().zip(center.settings()).enumerate() {
        match (spec, *setting) {
            (FieldSpec::Disc(d), Setting::Disc(current)) => {
                for value in (0..d.arity).filter(|&v| v != current) {
                    let mut neighbor = center.clone();
                    neighbor.0[i] = Setting::Disc(value);
                    neighbors.push(neighbor);
                }
            }
            (FieldSpec::Contin(c), Setting::Contin(current)) => {
                for step in c.step_scales() {
                    for value in [current - step, current + step] {
                        let mut neighbor = center.clone();
                        neighbor.0[i] = Setting::Contin(value);
                        neighbors.push(neighbor);
                    }
                }
            }
            _ => {}
        }
    }
    neighbors
}

/// Move one dimension to a different random value.
fn perturb<R: Rng>(spec: &FieldSpec, setting: Setting, rng: &mut R) -> Setting {
    match (spec, setting) {
        (FieldSpec::Disc(d), Setting::Disc(current)) if d.arity >= 2 => {
            let pick = rng.gen_range(0..d.arity - 1);
            Setting::Disc(if pick >= current { pick + 1 } else { pick })
        }
        (FieldSpec::Contin(c), Setting::Contin(current)) if c.depth > 0 => {
            let scale = rng.gen_range(0..c.depth);
            let step = c.step_size * c.expansion.powi(scale as i32);
            Setting::Contin(if rng.gen_bool(0.5) {
                current + step
            } else {
                current - step
            })
        }
        _ => setting,
    }
}

/// Random instance at `distance` changed dimensions from `center`.
pub fn sample_at_distance<R: Rng>(
    layout: &FieldLayout,
    center: &Instance,
    distance: usize,
    rng: &mut R,
) -> Instance {
    let distance = distance.min(layout.len());
    let mut neighbor = center.clone();
    for i in index::sample(rng, layout.len(), distance).into_vec() {
        neighbor.0[i] = perturb(&layout.specs()[i], neighbor.0[i], rng);
    }
    neighbor
}

/// Up to `count` distinct random instances at `distance` from `center`.
pub fn sample_neighbors<R: Rng>(
    layout: &FieldLayout,
    center: &Instance,
    distance: usize,
    count: usize,
    rng: &mut R,
) -> Vec<Instance> {
    let mut seen = HashSet::new();
    let mut neighbors = Vec::with_capacity(count);
    let max_attempts = count.saturating_mul(4);
    for _ in 0..max_attempts {
        if neighbors.len() >= count {
            break;
        }
        let neighbor = sample_at_distance(layout, center, distance, rng);
        if neighbor != *center && seen.insert(neighbor.clone()) {
            neighbors.push(neighbor);
        }
    }
    neighbors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::representation::{build_knobs, to_field_layout};
    use crate::compute::scoring::IdentityReducer;
    use crate::schema::{CandidateTree, Signature};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn layout() -> FieldLayout {
        let exemplar = CandidateTree::plus(vec![CandidateTree::arg(0), CandidateTree::contin(1.0)]);
        to_field_layout(&build_knobs(&exemplar, 0, Signature::numeric(2), &IdentityReducer).unwrap())
    }

    #[test]
    fn test_distance_one() {
        let layout = layout();
        let center = layout.identity();
        let neighbors = distance_one(&layout, &center);

        // flip(+), substitute #1 -> #2, insert #2, and 2 * depth contin moves
        assert_eq!(neighbors.len(), 1 + 1 + 1 + 2 * 3);
        assert!(neighbors.iter().all(|n| n.distance(&center) == 1));
        assert!(neighbors.iter().all(|n| layout.check(n).is_ok()));
    }

    #[test]
    fn test_sampled_neighbors_are_distinct() {
        let layout = layout();
        let center = layout.identity();
        let mut rng = StdRng::seed_from_u64(3);

        let neighbors = sample_neighbors(&layout, &center, 2, 50, &mut rng);
        assert!(!neighbors.is_empty());
        let unique: HashSet<_> = neighbors.iter().collect();
        assert_eq!(unique.len(), neighbors.len());
        for n in &neighbors {
            assert_eq!(n.distance(&center), 2);
            assert!(layout.check(n).is_ok());
        }
    }

    #[test]
    fn test_max_distance() {
        let layout = layout();
        assert_eq!(max_distance(&layout, 1.0), 3);
        assert_eq!(max_distance(&layout, 0.01), 1);
        assert_eq!(max_distance(&layout, 100.0), layout.len());
    }
}
