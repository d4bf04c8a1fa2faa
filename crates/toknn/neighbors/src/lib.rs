//! Neighbor list construction from raw search candidates.
//!
//! The search engine returns `k + 1` hits per token because the token itself
//! is normally its own best match. This crate drops that self-match by id,
//! keeps exactly `k` entries and rounds scores for the published artifact.

use rayon::prelude::*;

/// Decimal digits kept in published similarity scores.
pub const SCORE_DECIMALS: i32 = 4;

/// Round a similarity to [`SCORE_DECIMALS`] decimal places.
///
/// Rounding happens in f64 so the stored f32 is the nearest float to the
/// decimal value and serializes as that short decimal.
#[must_use]
pub fn round_score(score: f32) -> f32 {
    let scale = 10_f64.powi(SCORE_DECIMALS);
    ((f64::from(score) * scale).round() / scale) as f32
}

/// Build the final neighbor list of `token_id` from its raw candidates.
///
/// 1. Sort descending by score, ascending id on ties.
/// 2. Remove the entry whose id equals `token_id`, matched by id rather than
///    rank because self-similarity after normalization is not exactly 1.0.
/// 3. Truncate to `k`, whether or not a self-match was found.
/// 4. Round scores.
///
/// The result is shorter than `k` only when fewer than `k` non-self
/// candidates were supplied.
#[must_use]
pub fn build_neighbor_list(
    token_id: u32,
    mut candidates: Vec<toknn_core::Candidate>,
    k: usize,
) -> toknn_core::NeighborList {
    candidates.sort_by(toknn_core::Candidate::rank_cmp);

    candidates
        .into_iter()
        .filter(|c| c.id != token_id)
        .take(k)
        .map(|c| toknn_core::Neighbor {
            id: c.id,
            similarity: round_score(c.score),
        })
        .collect()
}

/// Build neighbor lists for every token, in token id order.
///
/// `candidates[i]` must hold the raw hits of token `i`.
#[must_use]
pub fn build_all(
    candidates: Vec<Vec<toknn_core::Candidate>>,
    k: usize,
) -> Vec<toknn_core::NeighborList> {
    let lists: Vec<_> = candidates
        .into_par_iter()
        .enumerate()
        .map(|(token_id, hits)| build_neighbor_list(token_id as u32, hits, k))
        .collect();

    let short = lists.iter().filter(|l| l.len() < k).count();
    if short > 0 {
        tracing::warn!(short, k, "tokens with fewer than k neighbors");
    }

    lists
}
