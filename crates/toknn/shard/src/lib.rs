//! Sharded artifact output for token neighbor lists.
//!
//! One run for a (model, embedding role) pair produces:
//! - `{slug}-{role}-knn-{i}.json.{ext}`: neighbor lists of token ids
//!   `[i * shard_size, min((i + 1) * shard_size, vocab_size))`, in id order
//! - `{slug}-{role}-tokens.json.{ext}`: every token's display string
//! - `{slug}-{role}-manifest.json`: uncompressed layout description
//!
//! Each shard decodes on its own. The manifest is committed last, so a
//! manifest on disk always refers to a complete set of shards.

mod codec;
mod reader;

use eyre::WrapErr as _;

pub use reader::ArtifactReader;

/// Where and how one run's artifacts are stored.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    dir: std::path::PathBuf,
    slug: String,
    role: toknn_core::EmbeddingRole,
    codec: toknn_core::Codec,
}

impl ArtifactLayout {
    pub fn new(
        dir: impl Into<std::path::PathBuf>,
        slug: impl Into<String>,
        role: toknn_core::EmbeddingRole,
        codec: toknn_core::Codec,
    ) -> Self {
        Self {
            dir: dir.into(),
            slug: slug.into(),
            role,
            codec,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    #[must_use]
    pub fn codec(&self) -> toknn_core::Codec {
        self.codec
    }

    fn prefix(&self) -> String {
        format!("{}-{}", self.slug, self.role)
    }

    #[must_use]
    pub fn manifest_path(&self) -> std::path::PathBuf {
        self.dir.join(format!("{}-manifest.json", self.prefix()))
    }

    #[must_use]
    pub fn tokens_path(&self) -> std::path::PathBuf {
        self.dir
            .join(format!("{}-tokens.json.{}", self.prefix(), self.codec.extension()))
    }

    #[must_use]
    pub fn shard_path(&self, index: usize) -> std::path::PathBuf {
        self.dir.join(format!(
            "{}-knn-{index}.json.{}",
            self.prefix(),
            self.codec.extension()
        ))
    }
}

/// What a successful [`write_artifacts`] call produced.
#[derive(Debug, Clone)]
pub struct WriteSummary {
    pub manifest: toknn_core::Manifest,
    pub manifest_path: std::path::PathBuf,
    /// Compressed bytes across shards and token table.
    pub compressed_bytes: u64,
}

/// Write every shard, then the token table, then the manifest.
///
/// `tokens` and `lists` are indexed by token id and must both cover the whole
/// vocabulary. Any manifest from an earlier run is removed before the first
/// shard is written; if any artifact fails the call returns an error and no
/// manifest is left behind.
pub fn write_artifacts(
    layout: &ArtifactLayout,
    model: &str,
    k: usize,
    shard_size: usize,
    tokens: &[String],
    lists: &[toknn_core::NeighborList],
) -> eyre::Result<WriteSummary> {
    if shard_size == 0 {
        eyre::bail!("shard size must be at least 1");
    }
    if tokens.len() != lists.len() {
        eyre::bail!(
            "token table has {} entries but there are {} neighbor lists",
            tokens.len(),
            lists.len()
        );
    }

    let vocab_size = lists.len();
    let num_shards = toknn_core::num_shards(vocab_size, shard_size);

    std::fs::create_dir_all(layout.dir())
        .wrap_err_with(|| format!("failed to create directory {}", layout.dir().display()))?;

    let manifest_path = layout.manifest_path();
    match std::fs::remove_file(&manifest_path) {
        Ok(()) => tracing::debug!(path = %manifest_path.display(), "removed stale manifest"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).wrap_err_with(|| {
                format!("failed to remove stale manifest {}", manifest_path.display())
            });
        }
    }

    let mut compressed_bytes = 0_u64;

    for index in 0..num_shards {
        let range = toknn_core::shard_range(index, vocab_size, shard_size);
        let path = layout.shard_path(index);
        let bytes = codec::write_compressed(&path, layout.codec(), &lists[range.clone()])
            .wrap_err_with(|| format!("failed to write shard {index} of {num_shards}"))?;
        tracing::debug!(index, start = range.start, end = range.end, bytes, "wrote shard");
        compressed_bytes += bytes;
    }

    let tokens_path = layout.tokens_path();
    let bytes = codec::write_compressed(&tokens_path, layout.codec(), tokens)
        .wrap_err("failed to write token table")?;
    tracing::debug!(path = %tokens_path.display(), bytes, "wrote token table");
    compressed_bytes += bytes;

    let manifest = toknn_core::Manifest {
        model: model.to_string(),
        embedding: layout.role,
        k,
        metric: toknn_core::METRIC.to_string(),
        vocab_size,
        shard_size,
        num_shards,
        codec: layout.codec().as_str().to_string(),
    };

    codec::write_atomic(&manifest_path, |out| {
        serde_json::to_writer_pretty(out, &manifest).wrap_err("failed to encode manifest")
    })
    .wrap_err("failed to write manifest")?;

    tracing::info!(
        path = %manifest_path.display(),
        num_shards,
        compressed_mb = compressed_bytes as f64 / 1024.0 / 1024.0,
        "artifacts committed"
    );

    Ok(WriteSummary {
        manifest,
        manifest_path,
        compressed_bytes,
    })
}
