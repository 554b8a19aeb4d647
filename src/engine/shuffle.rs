use rand::seq::SliceRandom;
use rand::thread_rng;

/// The one sanctioned source of nondeterminism in the engine. Tests swap in
/// a fixed implementation to assert exact display order.
pub trait Shuffle: Send + Sync {
    /// A permutation of `[0..n-1]`: display position -> original index.
    fn permutation(&self, n: usize) -> Vec<usize>;
}

pub struct RngShuffle;

impl Shuffle for RngShuffle {
    fn permutation(&self, n: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut thread_rng());
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permutation_is_a_bijection() {
        for n in [0, 1, 2, 3, 4, 8, 16] {
            let mut order = RngShuffle.permutation(n);
            assert_eq!(order.len(), n);
            order.sort_unstable();
            assert_eq!(order, (0..n).collect::<Vec<_>>());
        }
    }
}
