use crate::comm::RandomStream;
use crate::walkers::WalkerBatch;

/// Pair the lightest walker with the heaviest until both fall inside
/// `[min_weight, max_weight]`. Each pair keeps its combined weight: one walker
/// is duplicated with probability proportional to its weight and both copies
/// carry half of the sum.
pub fn pair_branch(walkers: &mut WalkerBatch, min_weight: f64, max_weight: f64, rng: &mut RandomStream) {
    let mut order: Vec<usize> = (0..walkers.nwalkers).collect();
    // stable: equal weights keep the lower index first
    order.sort_by(|&a, &b| walkers.weight[a].total_cmp(&walkers.weight[b]));

    let (mut low, mut high) = (0, order.len().saturating_sub(1));
    while low < high {
        let (il, ih) = (order[low], order[high]);
        let (wl, wh) = (walkers.weight[il], walkers.weight[ih]);
        if wl >= min_weight && wh <= max_weight {
            break;
        }
        let total = wl + wh;
        let r = rng.uniform();
        if r < wh / total {
            walkers.copy_walker(ih, il);
        } else {
            walkers.copy_walker(il, ih);
        }
        walkers.weight[il] = 0.5 * total;
        walkers.weight[ih] = 0.5 * total;
        low += 1;
        high -= 1;
    }
}
