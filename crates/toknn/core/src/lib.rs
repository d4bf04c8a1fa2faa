//! Core types and traits for toknn.

/// Name of the similarity metric recorded in every manifest.
pub const METRIC: &str = "cosine_similarity";

/// Default number of neighbors kept per token.
pub const DEFAULT_K: usize = 10;

/// Default number of query rows per similarity batch.
pub const DEFAULT_BATCH_SIZE: usize = 8192;

/// Default number of tokens per shard artifact.
pub const DEFAULT_SHARD_SIZE: usize = 1000;

/// A dense embedding matrix. Shape: [vocab_size, dim], row index = token id.
pub type EmbeddingMatrix = ndarray::Array2<f32>;

/// Which of a model's two embedding tables to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingRole {
    /// The token embedding table (`embed_tokens`).
    Input,
    /// The unembedding / LM head.
    Output,
}

impl EmbeddingRole {
    /// Both roles, in processing order.
    pub const ALL: [Self; 2] = [Self::Input, Self::Output];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

impl std::fmt::Display for EmbeddingRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmbeddingRole {
    type Err = eyre::Report;

    fn from_str(s: &str) -> eyre::Result<Self> {
        match s {
            "input" => Ok(Self::Input),
            "output" => Ok(Self::Output),
            other => eyre::bail!("unsupported embedding role {other:?}, expected input or output"),
        }
    }
}

/// A raw search hit: a corpus row and its inner product with the query row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub id: u32,
    pub score: f32,
}

impl Candidate {
    #[must_use]
    pub fn new(id: u32, score: f32) -> Self {
        Self { id, score }
    }

    /// Ranking order: higher score first, then lower id.
    ///
    /// NaN scores rank below every finite score so they never displace a real
    /// candidate. Signed zeros compare equal.
    #[must_use]
    pub fn rank_cmp(&self, other: &Self) -> std::cmp::Ordering {
        rank_key(other.score)
            .total_cmp(&rank_key(self.score))
            .then_with(|| self.id.cmp(&other.id))
    }
}

fn rank_key(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else if score == 0.0 {
        0.0
    } else {
        score
    }
}

/// One entry of a token's final neighbor list.
///
/// Serialized as a two-element array `[neighbor_token_id, similarity]`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(from = "(u32, f32)", into = "(u32, f32)")]
pub struct Neighbor {
    pub id: u32,
    pub similarity: f32,
}

impl From<(u32, f32)> for Neighbor {
    fn from((id, similarity): (u32, f32)) -> Self {
        Self { id, similarity }
    }
}

impl From<Neighbor> for (u32, f32) {
    fn from(n: Neighbor) -> Self {
        (n.id, n.similarity)
    }
}

/// Up to k neighbors of one token, descending by similarity.
pub type NeighborList = Vec<Neighbor>;

/// Description of one run's artifact set.
///
/// Written last, so its presence means every shard it declares exists.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub model: String,
    pub embedding: EmbeddingRole,
    pub k: usize,
    pub metric: String,
    pub vocab_size: usize,
    pub shard_size: usize,
    pub num_shards: usize,
    /// Compression of the tokens and shard artifacts (`gzip` or `zstd`).
    pub codec: String,
}

/// Number of shards needed to cover `vocab_size` tokens.
#[must_use]
pub fn num_shards(vocab_size: usize, shard_size: usize) -> usize {
    if shard_size == 0 {
        return 0;
    }
    vocab_size.div_ceil(shard_size)
}

/// Half-open token id range covered by shard `index`.
#[must_use]
pub fn shard_range(index: usize, vocab_size: usize, shard_size: usize) -> std::ops::Range<usize> {
    let start = (index * shard_size).min(vocab_size);
    let end = ((index + 1) * shard_size).min(vocab_size);
    start..end
}

/// Compression applied to the token table and shard artifacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Codec {
    /// Gzip at maximum compression. Browsers decode it natively.
    #[default]
    Gzip,
    Zstd,
}

impl Codec {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
        }
    }

    /// File extension appended after `.json`.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Gzip => "gz",
            Self::Zstd => "zst",
        }
    }
}

impl std::str::FromStr for Codec {
    type Err = eyre::Report;

    fn from_str(s: &str) -> eyre::Result<Self> {
        match s {
            "gzip" | "gz" => Ok(Self::Gzip),
            "zstd" | "zst" => Ok(Self::Zstd),
            other => eyre::bail!("unknown codec {other:?}, expected gzip or zstd"),
        }
    }
}

/// Knobs for one neighbor computation.
#[derive(Debug, Clone, Copy)]
pub struct KnnConfig {
    /// Neighbors kept per token, excluding the token itself.
    pub k: usize,
    /// Query rows per similarity batch. Peak scratch memory is `batch_size * vocab_size` floats.
    pub batch_size: usize,
    /// Tokens per shard artifact.
    pub shard_size: usize,
    /// Run the similarity matmul through candle instead of the ndarray CPU path.
    pub accelerator: bool,
    pub codec: Codec,
}

impl Default for KnnConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            batch_size: DEFAULT_BATCH_SIZE,
            shard_size: DEFAULT_SHARD_SIZE,
            accelerator: true,
            codec: Codec::default(),
        }
    }
}

impl KnnConfig {
    /// Reject parameters no run can use.
    pub fn validate(&self) -> eyre::Result<()> {
        if self.k == 0 {
            eyre::bail!("k must be at least 1");
        }
        if self.batch_size == 0 {
            eyre::bail!("batch size must be at least 1");
        }
        if self.shard_size == 0 {
            eyre::bail!("shard size must be at least 1");
        }
        Ok(())
    }
}

/// Supplies the embedding matrix for a model role.
///
/// Failing to find the tensor is a precondition error and aborts that role.
pub trait EmbeddingSource {
    fn load_embeddings(&self, role: EmbeddingRole) -> eyre::Result<EmbeddingMatrix>;
}

/// Maps a token id to its display string.
pub trait TokenDecoder: Sync {
    fn decode(&self, token_id: u32) -> eyre::Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_shards_rounds_up() {
        assert_eq!(num_shards(7, 3), 3);
        assert_eq!(num_shards(6, 3), 2);
        assert_eq!(num_shards(0, 3), 0);
        assert_eq!(num_shards(1, 1000), 1);
    }

    #[test]
    fn test_shard_ranges_partition_vocab() {
        let ranges: Vec<_> = (0..num_shards(7, 3)).map(|s| shard_range(s, 7, 3)).collect();
        assert_eq!(ranges, vec![0..3, 3..6, 6..7]);
    }

    #[test]
    fn test_rank_cmp_orders_by_score_then_id() {
        let mut c = vec![
            Candidate::new(4, 0.5),
            Candidate::new(2, 0.9),
            Candidate::new(1, 0.5),
            Candidate::new(3, f32::NAN),
        ];
        c.sort_by(Candidate::rank_cmp);
        let ids: Vec<_> = c.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 1, 4, 3]);

        let neg_zero = Candidate::new(1, -0.0);
        let pos_zero = Candidate::new(5, 0.0);
        assert!(neg_zero.rank_cmp(&pos_zero).is_lt());
    }

    #[test]
    fn test_neighbor_serializes_as_pair() {
        let json = serde_json::to_string(&vec![Neighbor::from((7, 0.25))]).unwrap();
        assert_eq!(json, "[[7,0.25]]");
        let back: NeighborList = serde_json::from_str(&json).unwrap();
        assert_eq!(back[0].id, 7);
    }

    #[test]
    fn test_manifest_field_names() {
        let manifest = Manifest {
            model: "Qwen3-0.6B".to_string(),
            embedding: EmbeddingRole::Input,
            k: 10,
            metric: METRIC.to_string(),
            vocab_size: 7,
            shard_size: 3,
            num_shards: 3,
            codec: Codec::Gzip.as_str().to_string(),
        };
        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["vocabSize"], 7);
        assert_eq!(value["shardSize"], 3);
        assert_eq!(value["numShards"], 3);
        assert_eq!(value["metric"], "cosine_similarity");
        assert_eq!(value["embedding"], "input");
    }

    #[test]
    fn test_config_validation() {
        assert!(KnnConfig::default().validate().is_ok());
        let bad = KnnConfig {
            shard_size: 0,
            ..KnnConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("output".parse::<EmbeddingRole>().unwrap(), EmbeddingRole::Output);
        assert!("both".parse::<EmbeddingRole>().is_err());
    }
}
