use crate::comm::RandomStream;
use crate::walkers::WalkerBatch;

/// Systematic resampling: `N` evenly spaced teeth with one random offset pick
/// walkers in proportion to their weight. Every survivor carries `W / N`.
pub fn comb(walkers: &mut WalkerBatch, rng: &mut RandomStream) {
    let n = walkers.nwalkers;
    let total = walkers.total_weight();
    if n == 0 || total <= 0.0 {
        return;
    }
    let spacing = total / n as f64;
    let offset = rng.uniform();

    let mut selected = Vec::with_capacity(n);
    let mut cumulative = walkers.weight[0];
    let mut iw = 0;
    for k in 0..n {
        let tooth = (k as f64 + offset) * spacing;
        while cumulative <= tooth && iw + 1 < n {
            iw += 1;
            cumulative += walkers.weight[iw];
        }
        selected.push(iw);
    }

    let source = walkers.clone();
    for (slot, &from) in selected.iter().enumerate() {
        walkers.copy_from(&source, from, slot);
        walkers.weight[slot] = spacing;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::systems::Generic;
    use crate::testing::random_multi_det;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn batch(weights: &[f64]) -> WalkerBatch {
        let mut rng = StdRng::seed_from_u64(2);
        let sys = Generic::new(1, 1);
        let trial = random_multi_det(&sys, 3, 2, &mut rng).unwrap();
        let mut walkers = WalkerBatch::new(&sys, &trial, weights.len()).unwrap();
        walkers.weight = weights.to_vec();
        for (iw, ovlp) in walkers.ovlp.iter_mut().enumerate() {
            ovlp.re = iw as f64;
        }
        walkers
    }

    #[test]
    fn test_survivors_share_the_total_weight() {
        let weights = [0.0, 3.0, 0.5, 0.5];
        let mut walkers = batch(&weights);
        let mut rng = RandomStream::new(11, 0);
        comb(&mut walkers, &mut rng);
        assert_relative_eq!(walkers.total_weight(), 4.0, epsilon = 1e-12);
        for w in walkers.weight.iter() {
            assert_relative_eq!(*w, 1.0, epsilon = 1e-12);
        }
        // a dead walker is never selected
        assert!(walkers.ovlp.iter().all(|o| o.re != 0.0));
    }

    #[test]
    fn test_expected_copies_follow_weights() {
        let weights = [0.2, 1.8, 1.0, 1.0];
        let nseeds = 4000;
        let mut copies = vec![0.0; weights.len()];
        for seed in 0..nseeds {
            let mut walkers = batch(&weights);
            let mut rng = RandomStream::new(seed, 0);
            comb(&mut walkers, &mut rng);
            for o in walkers.ovlp.iter() {
                copies[o.re as usize] += 1.0;
            }
        }
        for (c, w) in copies.iter().zip(weights.iter()) {
            assert_relative_eq!(c / nseeds as f64, *w, epsilon = 0.03);
        }
    }
}
