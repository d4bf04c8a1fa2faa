//! One pipeline run per (model, embedding role).
//!
//! matrix → normalized matrix → top-(k+1) candidates → neighbor lists →
//! shards, token table, manifest. Each role starts from scratch and shares
//! no mutable state with the others.

use eyre::WrapErr as _;
use rayon::prelude::*;

/// Everything a run needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct Job {
    /// Recorded in the manifest.
    pub model_name: String,
    /// Prefix of every artifact file name.
    pub slug: String,
    pub output_dir: std::path::PathBuf,
    pub config: toknn_core::KnnConfig,
}

impl Job {
    #[must_use]
    pub fn layout(&self, role: toknn_core::EmbeddingRole) -> toknn_shard::ArtifactLayout {
        toknn_shard::ArtifactLayout::new(&self.output_dir, &self.slug, role, self.config.codec)
    }
}

/// Outcome of one successful role run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub role: toknn_core::EmbeddingRole,
    pub vocab_size: usize,
    pub dim: usize,
    pub write: toknn_shard::WriteSummary,
    pub elapsed: std::time::Duration,
}

/// Normalize, search and build the neighbor lists of every row.
///
/// Consumes `matrix`; the normalized copy reuses its buffer and is dropped
/// as soon as the search finishes.
pub fn compute_neighbor_lists(
    matrix: toknn_core::EmbeddingMatrix,
    config: &toknn_core::KnnConfig,
) -> eyre::Result<Vec<toknn_core::NeighborList>> {
    config.validate()?;

    let candidates = {
        tracing::info!("normalizing embeddings");
        let normalized = toknn_embed::normalize(matrix);
        toknn_embed::search_with_backend(
            normalized,
            config.k,
            config.batch_size,
            config.accelerator,
        )
        .wrap_err("knn search failed")?
    };

    tracing::info!("building neighbor lists");
    Ok(toknn_neighbors::build_all(candidates, config.k))
}

/// Display strings of token ids `0..vocab_size`.
pub fn decode_tokens(
    decoder: &dyn toknn_core::TokenDecoder,
    vocab_size: usize,
) -> eyre::Result<Vec<String>> {
    let vocab = u32::try_from(vocab_size)
        .wrap_err_with(|| format!("vocabulary of {vocab_size} does not fit u32 token ids"))?;

    (0..vocab)
        .into_par_iter()
        .map(|id| decoder.decode(id))
        .collect()
}

/// Run the whole pipeline for one role.
pub fn run_role(
    source: &dyn toknn_core::EmbeddingSource,
    decoder: &dyn toknn_core::TokenDecoder,
    job: &Job,
    role: toknn_core::EmbeddingRole,
) -> eyre::Result<RunSummary> {
    let started = std::time::Instant::now();
    job.config.validate()?;

    tracing::info!(%role, model = %job.model_name, "loading embedding weights");
    let matrix = source
        .load_embeddings(role)
        .wrap_err_with(|| format!("failed to load {role} embeddings"))?;
    let (vocab_size, dim) = matrix.dim();
    tracing::info!(%role, vocab_size, dim, "embedding matrix loaded");

    let lists = compute_neighbor_lists(matrix, &job.config)?;

    tracing::info!(%role, vocab_size, "decoding token strings");
    let tokens = decode_tokens(decoder, vocab_size)?;

    let write = toknn_shard::write_artifacts(
        &job.layout(role),
        &job.model_name,
        job.config.k,
        job.config.shard_size,
        &tokens,
        &lists,
    )
    .wrap_err_with(|| format!("failed to write {role} artifacts"))?;

    Ok(RunSummary {
        role,
        vocab_size,
        dim,
        write,
        elapsed: started.elapsed(),
    })
}

/// Run every role in order. A failed role does not stop the ones after it.
pub fn run(
    source: &dyn toknn_core::EmbeddingSource,
    decoder: &dyn toknn_core::TokenDecoder,
    job: &Job,
    roles: &[toknn_core::EmbeddingRole],
) -> Vec<(toknn_core::EmbeddingRole, eyre::Result<RunSummary>)> {
    roles
        .iter()
        .map(|&role| {
            let result = run_role(source, decoder, job, role);
            if let Err(e) = &result {
                tracing::error!(%role, error = ?e, "run failed");
            }
            (role, result)
        })
        .collect()
}
