//! Reading back a committed artifact set.

use eyre::WrapErr as _;

/// A committed artifact set, opened through its manifest.
pub struct ArtifactReader {
    layout: crate::ArtifactLayout,
    manifest: toknn_core::Manifest,
}

impl ArtifactReader {
    /// Open the artifacts of `slug`/`role` in `dir`.
    ///
    /// Fails if no manifest exists, which also covers runs that never
    /// finished.
    pub fn open(
        dir: impl Into<std::path::PathBuf>,
        slug: &str,
        role: toknn_core::EmbeddingRole,
    ) -> eyre::Result<Self> {
        let dir = dir.into();
        // The codec is only known once the manifest is read; its path does not depend on it.
        let probe = crate::ArtifactLayout::new(&dir, slug, role, toknn_core::Codec::default());
        let manifest_path = probe.manifest_path();

        let text = std::fs::read_to_string(&manifest_path)
            .wrap_err_with(|| format!("failed to read manifest {}", manifest_path.display()))?;
        let manifest: toknn_core::Manifest = serde_json::from_str(&text)
            .wrap_err_with(|| format!("failed to parse manifest {}", manifest_path.display()))?;

        if manifest.embedding != role {
            eyre::bail!(
                "manifest {} describes {} embeddings, expected {role}",
                manifest_path.display(),
                manifest.embedding
            );
        }

        if manifest.shard_size == 0 {
            eyre::bail!("manifest {} declares shard size 0", manifest_path.display());
        }

        let codec: toknn_core::Codec = manifest.codec.parse()?;
        let layout = crate::ArtifactLayout::new(dir, slug, role, codec);

        Ok(Self { layout, manifest })
    }

    #[must_use]
    pub fn manifest(&self) -> &toknn_core::Manifest {
        &self.manifest
    }

    /// Every token's display string, indexed by token id.
    pub fn tokens(&self) -> eyre::Result<Vec<String>> {
        let tokens: Vec<String> =
            crate::codec::read_compressed(&self.layout.tokens_path(), self.layout.codec())?;
        if tokens.len() != self.manifest.vocab_size {
            eyre::bail!(
                "token table has {} entries, manifest declares {}",
                tokens.len(),
                self.manifest.vocab_size
            );
        }
        Ok(tokens)
    }

    /// Neighbor lists of shard `index`, in token id order.
    pub fn shard(&self, index: usize) -> eyre::Result<Vec<toknn_core::NeighborList>> {
        if index >= self.manifest.num_shards {
            eyre::bail!(
                "shard {index} out of range, manifest declares {}",
                self.manifest.num_shards
            );
        }

        let lists: Vec<toknn_core::NeighborList> =
            crate::codec::read_compressed(&self.layout.shard_path(index), self.layout.codec())?;

        let expected = toknn_core::shard_range(
            index,
            self.manifest.vocab_size,
            self.manifest.shard_size,
        )
        .len();
        if lists.len() != expected {
            eyre::bail!("shard {index} has {} lists, expected {expected}", lists.len());
        }

        Ok(lists)
    }

    /// Neighbor list of one token, decoding only the shard that holds it.
    pub fn neighbors_of(&self, token_id: u32) -> eyre::Result<toknn_core::NeighborList> {
        let token = token_id as usize;
        if token >= self.manifest.vocab_size {
            eyre::bail!(
                "token {token_id} out of range, vocabulary has {} tokens",
                self.manifest.vocab_size
            );
        }

        let index = token / self.manifest.shard_size;
        let offset = token % self.manifest.shard_size;
        let mut lists = self.shard(index)?;

        Ok(lists.swap_remove(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toknn_core::{Codec, EmbeddingRole, Neighbor};

    #[test]
    fn test_missing_manifest_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ArtifactReader::open(dir.path(), "m", EmbeddingRole::Input).is_err());
    }

    #[test]
    fn test_lookup_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let layout = crate::ArtifactLayout::new(dir.path(), "m", EmbeddingRole::Input, Codec::Gzip);
        let lists = vec![
            vec![Neighbor::from((1, 0.5))],
            vec![Neighbor::from((0, 0.5))],
        ];
        let tokens = vec!["a".to_string(), "b".to_string()];
        crate::write_artifacts(&layout, "M", 1, 1, &tokens, &lists).unwrap();

        let reader = ArtifactReader::open(dir.path(), "m", EmbeddingRole::Input).unwrap();
        assert_eq!(reader.neighbors_of(1).unwrap(), lists[1]);
        assert!(reader.neighbors_of(2).is_err());
        assert!(reader.shard(2).is_err());
    }

    #[test]
    fn test_role_mismatch_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let layout = crate::ArtifactLayout::new(dir.path(), "m", EmbeddingRole::Input, Codec::Gzip);
        crate::write_artifacts(&layout, "M", 1, 1, &[], &[]).unwrap();

        // Rename the input manifest to where the output manifest would live.
        let output =
            crate::ArtifactLayout::new(dir.path(), "m", EmbeddingRole::Output, Codec::Gzip);
        std::fs::rename(layout.manifest_path(), output.manifest_path()).unwrap();
        assert!(ArtifactReader::open(dir.path(), "m", EmbeddingRole::Output).is_err());
    }
}
