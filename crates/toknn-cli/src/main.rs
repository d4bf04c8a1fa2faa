//! CLI for token embedding nearest neighbors.

// CLI binaries need to print user-facing output
#![allow(
    clippy::print_stdout,
    reason = "CLI binary needs stdout for user output"
)]

use eyre::WrapErr as _;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .init();

    let args = Args::parse();

    match args.command {
        Command::Compute(compute_args) => compute(&compute_args),
        Command::Lookup {
            dir,
            slug,
            embedding,
            token,
            json,
        } => lookup(&dir, &slug, embedding.into(), token, json),
    }
}

use clap::Parser as _;

/// `RUST_LOG` directives with search progress (`info`) always enabled.
fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
}

#[derive(clap::Parser)]
#[command(name = "toknn")]
#[command(about = "Exact k-nearest neighbors for every token in an LLM's embedding space")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Compute neighbor tables and write sharded artifacts
    Compute(ComputeArgs),

    /// Print one token's neighbors from previously written artifacts
    Lookup {
        /// Directory holding the artifacts
        #[arg(short, long)]
        dir: std::path::PathBuf,

        /// Artifact slug (lowercased model name by default at compute time)
        #[arg(short, long)]
        slug: String,

        /// Which embedding table to read
        #[arg(short, long, value_enum, default_value = "input")]
        embedding: RoleArg,

        /// Token id to look up
        token: u32,

        /// Output JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args)]
struct ComputeArgs {
    /// HuggingFace model id (e.g. Qwen/Qwen3-30B-A3B) or local model directory
    #[arg(short, long)]
    model: String,

    /// Output directory for manifests, token tables and shards
    #[arg(short, long)]
    output_dir: std::path::PathBuf,

    /// Which embeddings to compute
    #[arg(short, long, value_enum, default_value = "both")]
    embedding: EmbeddingChoice,

    /// Number of nearest neighbors per token
    #[arg(short, long, default_value_t = toknn_core::DEFAULT_K)]
    k: usize,

    /// Tokens per shard
    #[arg(long, default_value_t = toknn_core::DEFAULT_SHARD_SIZE)]
    shard_size: usize,

    /// Query rows per similarity batch (lower it if the batch does not fit in memory)
    #[arg(long, default_value_t = toknn_core::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Override tensor name for input embeddings (default: model.embed_tokens.weight)
    #[arg(long)]
    input_tensor: Option<String>,

    /// Override tensor name for output embeddings (default: lm_head.weight)
    #[arg(long)]
    output_tensor: Option<String>,

    /// Override output filename slug (default: lowercased model name)
    #[arg(long)]
    slug: Option<String>,

    /// Skip the accelerator and use the ndarray CPU backend
    #[arg(long)]
    cpu: bool,

    /// Compression for token tables and shards
    #[arg(long, value_enum, default_value = "gzip")]
    codec: CodecArg,

    /// Worker threads for top-k selection (default: all cores)
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum EmbeddingChoice {
    Input,
    Output,
    Both,
}

impl EmbeddingChoice {
    fn roles(self) -> Vec<toknn_core::EmbeddingRole> {
        match self {
            Self::Input => vec![toknn_core::EmbeddingRole::Input],
            Self::Output => vec![toknn_core::EmbeddingRole::Output],
            Self::Both => toknn_core::EmbeddingRole::ALL.to_vec(),
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum RoleArg {
    Input,
    Output,
}

impl From<RoleArg> for toknn_core::EmbeddingRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Input => Self::Input,
            RoleArg::Output => Self::Output,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CodecArg {
    Gzip,
    Zstd,
}

impl From<CodecArg> for toknn_core::Codec {
    fn from(codec: CodecArg) -> Self {
        match codec {
            CodecArg::Gzip => Self::Gzip,
            CodecArg::Zstd => Self::Zstd,
        }
    }
}

fn compute(args: &ComputeArgs) -> eyre::Result<()> {
    let config = toknn_core::KnnConfig {
        k: args.k,
        batch_size: args.batch_size,
        shard_size: args.shard_size,
        accelerator: !args.cpu,
        codec: args.codec.into(),
    };
    config.validate()?;

    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .wrap_err("failed to configure worker threads")?;
    }

    let model_name = toknn_hub::model_name(&args.model).to_string();
    let slug = args
        .slug
        .clone()
        .unwrap_or_else(|| toknn_hub::default_slug(&args.model));

    std::fs::create_dir_all(&args.output_dir).wrap_err_with(|| {
        format!("failed to create output directory {}", args.output_dir.display())
    })?;

    eprintln!("Loading tokenizer for {}...", args.model);
    let files = toknn_hub::ModelFiles::open(&args.model)?;
    let tokenizer = toknn_hub::HubTokenizer::load(&files).wrap_err("failed to load tokenizer")?;

    let mut source = toknn_hub::SafetensorsSource::new(files);
    if let Some(name) = &args.input_tensor {
        source = source.with_tensor_override(toknn_core::EmbeddingRole::Input, name);
    }
    if let Some(name) = &args.output_tensor {
        source = source.with_tensor_override(toknn_core::EmbeddingRole::Output, name);
    }

    let job = toknn_pipeline::Job {
        model_name,
        slug,
        output_dir: args.output_dir.clone(),
        config,
    };

    let roles = args.embedding.roles();
    eprintln!("Processing {} embedding role(s) of {}...", roles.len(), job.model_name);

    let mut failed = Vec::new();
    for (role, result) in toknn_pipeline::run(&source, &tokenizer, &job, &roles) {
        match result {
            Ok(summary) => {
                println!(
                    "{role}: {} tokens x {} dims, {} shards, {:.1} MB compressed, {:.1}s -> {}",
                    summary.vocab_size,
                    summary.dim,
                    summary.write.manifest.num_shards,
                    summary.write.compressed_bytes as f64 / 1024.0 / 1024.0,
                    summary.elapsed.as_secs_f64(),
                    summary.write.manifest_path.display()
                );
            }
            Err(e) => {
                eprintln!("Error: {role} embeddings failed: {e:?}");
                failed.push(role);
            }
        }
    }

    if !failed.is_empty() {
        let names: Vec<_> = failed.iter().map(ToString::to_string).collect();
        eyre::bail!("failed embedding roles: {}", names.join(", "));
    }

    Ok(())
}

/// JSON output for one neighbor.
#[derive(serde::Serialize)]
struct JsonNeighbor<'a> {
    id: u32,
    token: &'a str,
    similarity: f32,
}

fn lookup(
    dir: &std::path::Path,
    slug: &str,
    role: toknn_core::EmbeddingRole,
    token: u32,
    json: bool,
) -> eyre::Result<()> {
    let reader = toknn_shard::ArtifactReader::open(dir, slug, role)?;
    let neighbors = reader.neighbors_of(token)?;
    let tokens = reader.tokens()?;

    let display = |id: u32| tokens.get(id as usize).map_or("", String::as_str);

    if json {
        let results: Vec<JsonNeighbor<'_>> = neighbors
            .iter()
            .map(|n| JsonNeighbor {
                id: n.id,
                token: display(n.id),
                similarity: n.similarity,
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&results).wrap_err("failed to serialize JSON")?
        );
    } else {
        println!("{token} {:?} ({role}, {})", display(token), reader.manifest().model);
        for n in &neighbors {
            println!("  {:>8} {:.4} {:?}", n.id, n.similarity, display(n.id));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser as _;

    #[test]
    fn test_progress_logged_by_default() {
        let directives = env_filter().to_string();
        assert!(directives.contains("info"), "filter: {directives}");
    }

    #[test]
    fn test_compute_args_defaults() {
        let args = Args::try_parse_from(["toknn", "compute", "-m", "gpt2", "-o", "out"]).unwrap();
        let Command::Compute(compute) = args.command else {
            panic!("expected compute subcommand");
        };
        assert_eq!(compute.k, toknn_core::DEFAULT_K);
        assert_eq!(compute.shard_size, toknn_core::DEFAULT_SHARD_SIZE);
        assert!(!compute.cpu);
    }
}
