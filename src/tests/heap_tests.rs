use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::heap::PropensityHeap;
use crate::tests::chisq::goodness_of_fit;
use crate::DEFAULT_SEED;

#[test]
fn point_operations() {
    let mut heap = PropensityHeap::from_weights(&[1., 2., 3.]);
    assert_eq!(heap.len(), 3);
    assert_eq!(heap.root(), 6.);
    heap.modify(5., 1);
    assert_eq!(heap.root(), 9.);
    assert_eq!(heap.leaf(1), 5.);
    heap.insert(1.);
    assert_eq!(heap.len(), 4);
    assert_eq!(heap.root(), 10.);
}

#[test]
fn grows_a_level_when_full() {
    let mut heap = PropensityHeap::from_weights(&[1., 2., 3., 4.]);
    let old_root = heap.root();
    heap.insert(7.);
    assert_eq!(heap.len(), 5);
    assert_eq!(heap.root(), old_root + 7.);
    for (i, w) in [1., 2., 3., 4., 7.].into_iter().enumerate() {
        assert_eq!(heap.leaf(i), w);
    }
}

#[test]
fn delete_overwrites_with_last() {
    let mut heap = PropensityHeap::from_weights(&[1., 2., 3., 4., 5.]);
    heap.delete(1);
    assert_eq!(heap.len(), 4);
    assert_eq!(heap.root(), 13.);
    assert_eq!(heap.leaf(1), 5.);
    // Deleting the last leaf needs no move.
    heap.delete(3);
    assert_eq!(heap.len(), 3);
    assert_eq!(heap.root(), 9.);
}

#[test]
fn delete_down_to_empty() {
    let mut heap = PropensityHeap::from_weights(&[2., 3.]);
    heap.delete(0);
    heap.delete(0);
    assert!(heap.is_empty());
    assert_eq!(heap.root(), 0.);
    heap.insert(4.);
    assert_eq!(heap.root(), 4.);
}

#[test]
fn draw_descends_by_weight() {
    let heap = PropensityHeap::from_weights(&[1., 0., 3.]);
    assert_eq!(heap.draw(0.5), 0);
    assert_eq!(heap.draw(1.5), 2);
    assert_eq!(heap.draw(3.999), 2);
}

#[test]
fn zero_weight_leaves_are_never_drawn() {
    let heap = PropensityHeap::from_weights(&[0., 2., 0., 1.]);
    let mut rng = StdRng::seed_from_u64(DEFAULT_SEED);
    for _ in 0..10_000 {
        let leaf = heap.draw(rng.random::<f64>() * heap.root());
        assert!(leaf == 1 || leaf == 3);
    }
}

/// Sampling fidelity: with 1,000 random positive weights, a million
/// draws match the weight distribution under a chi-square test.
#[test]
fn sampling_fidelity() {
    let mut rng = StdRng::seed_from_u64(DEFAULT_SEED);
    let weights: Vec<f64> = (0..1000).map(|_| rng.random::<f64>() + 0.5).collect();
    let heap = PropensityHeap::from_weights(&weights);

    let mut observed = vec![0u64; weights.len()];
    for _ in 0..1_000_000 {
        observed[heap.draw(rng.random::<f64>() * heap.root())] += 1;
    }

    let total: f64 = weights.iter().sum();
    let probs: Vec<f64> = weights.iter().map(|w| w / total).collect();
    assert!(goodness_of_fit(&observed, &probs));
}

/// Deletions and insertions keep the root equal to the live leaf sum.
#[test]
fn churn_keeps_sums_exact() {
    let mut rng = StdRng::seed_from_u64(DEFAULT_SEED);
    let mut weights: Vec<f64> = (0..40).map(|_| rng.random::<f64>()).collect();
    let mut heap = PropensityHeap::from_weights(&weights);
    for _ in 0..2_000 {
        match rng.random_range(0..3u8) {
            0 => {
                let w = rng.random::<f64>();
                weights.push(w);
                heap.insert(w);
            }
            1 if !weights.is_empty() => {
                let i = rng.random_range(0..weights.len());
                weights.swap_remove(i);
                heap.delete(i);
            }
            _ if !weights.is_empty() => {
                let i = rng.random_range(0..weights.len());
                let w = rng.random::<f64>();
                weights[i] = w;
                heap.modify(w, i);
            }
            _ => {}
        }
        let sum: f64 = weights.iter().sum();
        assert!((heap.root() - sum).abs() < 1e-9 * (1. + sum));
        assert_eq!(heap.len(), weights.len());
    }
}
