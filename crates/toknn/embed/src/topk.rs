//! Partial top-k selection over one row of similarity scores.

use std::collections::BinaryHeap;

use toknn_core::Candidate;

/// Heap entry whose `Ord` puts the worst-ranked candidate on top.
struct Ranked(Candidate);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.rank_cmp(&other.0)
    }
}

/// Select the `k` best `(index, score)` pairs, best first.
///
/// Ranking is by descending score with ascending index breaking ties, so the
/// selected set is fully determined by the scores regardless of scan order.
/// O(n log k).
pub fn select_top_k(scores: impl IntoIterator<Item = f32>, k: usize) -> Vec<Candidate> {
    if k == 0 {
        return Vec::new();
    }

    let scores = scores.into_iter();
    let (lower, upper) = scores.size_hint();
    let mut heap: BinaryHeap<Ranked> = BinaryHeap::with_capacity(k.min(upper.unwrap_or(lower)));

    for (index, score) in scores.enumerate() {
        let candidate = Candidate::new(index as u32, score);
        if heap.len() < k {
            heap.push(Ranked(candidate));
        } else if let Some(mut worst) = heap.peek_mut() {
            if candidate.rank_cmp(&worst.0).is_lt() {
                *worst = Ranked(candidate);
            }
        }
    }

    heap.into_sorted_vec().into_iter().map(|r| r.0).collect()
}
