//! Embedding tensors and token strings from HuggingFace models.
//!
//! A model is either a hub repo id (files fetched and cached by `hf-hub`) or a
//! local directory with the same file layout. Only the single embedding
//! tensor that is needed gets materialized, converted to f32.

pub mod tensors;

use eyre::WrapErr as _;

const WEIGHT_INDEX_FILE: &str = "model.safetensors.index.json";
const SINGLE_WEIGHTS_FILE: &str = "model.safetensors";
const TOKENIZER_FILE: &str = "tokenizer.json";

/// Model name used in manifests: the last `/` segment of the model id.
#[must_use]
pub fn model_name(model_id: &str) -> &str {
    model_id
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(model_id)
}

/// Default artifact slug: the lowercased model name.
#[must_use]
pub fn default_slug(model_id: &str) -> String {
    model_name(model_id).to_lowercase()
}

/// Access to a model's files, remote or local.
pub enum ModelFiles {
    Hub(hf_hub::api::sync::ApiRepo),
    Local(std::path::PathBuf),
}

impl ModelFiles {
    /// Local directory if `model` names one, hub repo otherwise.
    pub fn open(model: &str) -> eyre::Result<Self> {
        let path = std::path::Path::new(model);
        if path.is_dir() {
            tracing::info!(path = %path.display(), "using local model directory");
            return Ok(Self::Local(path.to_path_buf()));
        }

        let api = hf_hub::api::sync::Api::new()
            .wrap_err("failed to create HuggingFace API client")?;
        Ok(Self::Hub(api.model(model.to_string())))
    }

    /// Local path of `name`, downloading it first if needed.
    pub fn get(&self, name: &str) -> eyre::Result<std::path::PathBuf> {
        match self {
            Self::Hub(repo) => repo
                .get(name)
                .wrap_err_with(|| format!("failed to download {name}")),
            Self::Local(dir) => {
                let path = dir.join(name);
                if !path.is_file() {
                    eyre::bail!("{} not found", path.display());
                }
                Ok(path)
            }
        }
    }

    /// Like [`ModelFiles::get`], but `None` when the model has no such file.
    ///
    /// Only absence maps to `None`; listing or download failures are errors.
    pub fn find(&self, name: &str) -> eyre::Result<Option<std::path::PathBuf>> {
        match self {
            Self::Hub(repo) => {
                let info = repo.info().wrap_err("failed to list model repository files")?;
                if info.siblings.iter().any(|file| file.rfilename == name) {
                    self.get(name).map(Some)
                } else {
                    Ok(None)
                }
            }
            Self::Local(dir) => {
                let path = dir.join(name);
                Ok(path.is_file().then_some(path))
            }
        }
    }
}

/// `model.safetensors.index.json`.
#[derive(Debug, serde::Deserialize)]
struct WeightIndex {
    weight_map: std::collections::HashMap<String, String>,
}

/// Embedding source reading safetensors weights.
pub struct SafetensorsSource {
    files: ModelFiles,
    overrides: std::collections::HashMap<toknn_core::EmbeddingRole, String>,
}

impl SafetensorsSource {
    #[must_use]
    pub fn new(files: ModelFiles) -> Self {
        Self {
            files,
            overrides: std::collections::HashMap::new(),
        }
    }

    /// Use exactly `tensor_name` for `role` instead of the default candidates.
    #[must_use]
    pub fn with_tensor_override(
        mut self,
        role: toknn_core::EmbeddingRole,
        tensor_name: impl Into<String>,
    ) -> Self {
        self.overrides.insert(role, tensor_name.into());
        self
    }

    fn candidates(&self, role: toknn_core::EmbeddingRole) -> Vec<String> {
        match self.overrides.get(&role) {
            Some(name) => vec![name.clone()],
            None => tensors::default_candidates(role),
        }
    }

    /// Resolve the weights file and tensor name for `role`.
    ///
    /// Sharded checkpoints are looked up through their weight index; without
    /// one the single-file layout is assumed.
    fn locate(
        &self,
        role: toknn_core::EmbeddingRole,
    ) -> eyre::Result<(std::path::PathBuf, String)> {
        let candidates = self.candidates(role);

        match self.files.find(WEIGHT_INDEX_FILE)? {
            Some(index_path) => {
                let text = std::fs::read_to_string(&index_path)
                    .wrap_err_with(|| format!("failed to read {}", index_path.display()))?;
                let index: WeightIndex = serde_json::from_str(&text)
                    .wrap_err_with(|| format!("failed to parse {}", index_path.display()))?;

                let mut available: Vec<&String> = index.weight_map.keys().collect();
                available.sort_unstable();
                let name = tensors::resolve_tensor_name(available.as_slice(), &candidates, role)?;
                let shard_file = &index.weight_map[&name];

                tracing::info!(
                    tensor = %name,
                    shard = %shard_file,
                    "tensor located in weight shard"
                );
                Ok((self.files.get(shard_file)?, name))
            }
            None => {
                tracing::debug!("no weight index, trying single-file weights");
                let path = self.files.get(SINGLE_WEIGHTS_FILE)?;
                let weights = mmap_safetensors(&path)?;
                let available: Vec<String> =
                    weights.tensors().into_iter().map(|(name, _)| name).collect();
                let name = tensors::resolve_tensor_name(available.as_slice(), &candidates, role)?;
                Ok((path, name))
            }
        }
    }
}

impl toknn_core::EmbeddingSource for SafetensorsSource {
    fn load_embeddings(
        &self,
        role: toknn_core::EmbeddingRole,
    ) -> eyre::Result<toknn_core::EmbeddingMatrix> {
        let (path, name) = self.locate(role)?;

        tracing::info!(tensor = %name, path = %path.display(), "loading tensor");
        let weights = mmap_safetensors(&path)?;
        let tensor = weights
            .load(&name, &candle_core::Device::Cpu)
            .wrap_err_with(|| format!("failed to load tensor {name}"))?;

        // Checkpoints are commonly bf16.
        let tensor = tensor
            .to_dtype(candle_core::DType::F32)
            .wrap_err("failed to convert tensor to f32")?;
        let (rows, dim) = tensor
            .dims2()
            .wrap_err_with(|| format!("tensor {name} is not a 2-D matrix"))?;
        let data = tensor
            .flatten_all()
            .wrap_err("failed to flatten tensor")?
            .to_vec1::<f32>()
            .wrap_err("failed to extract tensor data")?;

        ndarray::Array2::from_shape_vec((rows, dim), data)
            .wrap_err("failed to build embedding matrix")
    }
}

fn mmap_safetensors(
    path: &std::path::Path,
) -> eyre::Result<candle_core::safetensors::MmapedSafetensors> {
    // SAFETY: the weights file is not modified while mapped.
    unsafe {
        candle_core::safetensors::MmapedSafetensors::new(path)
            .wrap_err_with(|| format!("failed to mmap {}", path.display()))
    }
}

/// Token decoder backed by a HuggingFace `tokenizer.json`.
pub struct HubTokenizer {
    tokenizer: tokenizers::Tokenizer,
}

impl HubTokenizer {
    /// Load the tokenizer of the model behind `files`.
    pub fn load(files: &ModelFiles) -> eyre::Result<Self> {
        Self::from_file(files.get(TOKENIZER_FILE)?)
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        tracing::info!(tokenizer_path = %path.display(), "loading tokenizer");
        let tokenizer = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| eyre::eyre!("failed to load tokenizer from {}: {e}", path.display()))?;
        Ok(Self { tokenizer })
    }
}

impl toknn_core::TokenDecoder for HubTokenizer {
    fn decode(&self, token_id: u32) -> eyre::Result<String> {
        self.tokenizer
            .decode(&[token_id], false)
            .map_err(|e| eyre::eyre!("failed to decode token {token_id}: {e}"))
    }
}
