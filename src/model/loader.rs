use std::path::{Path, PathBuf};

use candle_core::{quantized::gguf_file, Device};
use candle_nn::VarBuilder;
use candle_transformers::models::llama::{Llama, LlamaConfig, LlamaEosToks};
use candle_transformers::models::quantized_llama::ModelWeights;
use hf_hub::{
    api::tokio::{Api, ApiBuilder, ApiError, ApiRepo},
    Repo, RepoType,
};
use tracing::{debug, info, warn};

use super::{
    runtime::{CandleGenerator, LlamaWeights},
    tokenizer::BrelloTokenizer,
    LoadRequest, ModelHandles, ModelResolver, TextCodec,
};
use crate::{
    config::{ModelOptions, QuantizationMode},
    error::{BrelloError, Result},
};

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const SAFETENSORS_INDEX: &str = "model.safetensors.index.json";
const SAFETENSORS_SINGLE: &str = "model.safetensors";

/// Context length assumed when a GGUF file does not record one.
const FALLBACK_CONTEXT_LENGTH: usize = 4096;

/// Local paths of everything needed to build a model.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub tokenizer: PathBuf,
    pub weights: Weights,
}

#[derive(Debug, Clone)]
pub enum Weights {
    Safetensors { config: PathBuf, shards: Vec<PathBuf> },
    Gguf(PathBuf),
}

/// Resolves identifiers against the Hugging Face hub, or against a local
/// directory when the identifier names one.
#[derive(Debug, Clone, Default)]
pub struct HubResolver {
    token: Option<String>,
    cache_dir: Option<PathBuf>,
}

impl HubResolver {
    /// Reads `HF_TOKEN` (or `HUGGING_FACE_HUB_TOKEN`) for gated repositories.
    pub fn new() -> Self {
        let token = std::env::var("HF_TOKEN")
            .or_else(|_| std::env::var("HUGGING_FACE_HUB_TOKEN"))
            .ok()
            .filter(|t| !t.is_empty());
        Self { token, cache_dir: None }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    fn api(&self, model_id: &str) -> Result<Api> {
        let mut builder = ApiBuilder::new().with_token(self.token.clone());
        if let Some(dir) = &self.cache_dir {
            builder = builder.with_cache_dir(dir.clone());
        }
        builder
            .build()
            .map_err(|e| BrelloError::load_with_source(model_id, "Failed to initialise hub client", e))
    }

    /// Confirms the repository is reachable with the current credentials and
    /// returns how many files it lists.
    pub async fn check_access(&self, model_id: &str) -> Result<usize> {
        let repo = self.api(model_id)?.model(model_id.to_string());
        let info = repo.info().await.map_err(|e| hub_error(model_id, "<repo info>", e))?;
        Ok(info.siblings.len())
    }

    /// Locates or downloads the files for `options`.
    pub async fn fetch_files(&self, options: &ModelOptions) -> Result<ModelFiles> {
        let local = Path::new(&options.model_id);
        if local.is_dir() {
            debug!(path = %local.display(), "Using local model directory");
            return local_files(local, options.quantization);
        }

        let api = self.api(&options.model_id)?;
        let repo = api.repo(Repo::with_revision(
            options.model_id.clone(),
            RepoType::Model,
            options.revision.clone(),
        ));

        if options.quantization.is_quantized() {
            let gguf_id = options.quantized_repo.clone().unwrap_or_else(|| options.model_id.clone());
            let gguf_repo = api.repo(Repo::with_revision(gguf_id.clone(), RepoType::Model, options.revision.clone()));
            let filename = pick_gguf_file(&gguf_repo, &gguf_id, options.quantization).await?;
            info!(repo = %gguf_id, file = %filename, "Fetching quantized weights");
            let gguf = fetch(&gguf_repo, &gguf_id, &filename).await?;

            let tokenizer = match gguf_repo.get(TOKENIZER_FILE).await {
                Ok(path) => path,
                Err(_) => fetch(&repo, &options.model_id, TOKENIZER_FILE).await?,
            };
            return Ok(ModelFiles {
                tokenizer,
                weights: Weights::Gguf(gguf),
            });
        }

        let config = fetch(&repo, &options.model_id, CONFIG_FILE).await?;
        let tokenizer = fetch(&repo, &options.model_id, TOKENIZER_FILE).await?;

        let shards = match repo.get(SAFETENSORS_INDEX).await {
            Ok(index_path) => {
                let mut paths = Vec::new();
                for shard in shard_names(&index_path)? {
                    paths.push(fetch(&repo, &options.model_id, &shard).await?);
                }
                paths
            }
            Err(_) => vec![fetch(&repo, &options.model_id, SAFETENSORS_SINGLE).await?],
        };

        Ok(ModelFiles {
            tokenizer,
            weights: Weights::Safetensors { config, shards },
        })
    }
}

#[async_trait::async_trait]
impl ModelResolver for HubResolver {
    async fn resolve(&self, request: LoadRequest) -> Result<ModelHandles> {
        let model_id = request.options.model_id.clone();
        info!(
            model_id = %model_id,
            quantization = ?request.options.quantization,
            dtype = ?request.dtype,
            "Resolving model"
        );

        let files = self
            .fetch_files(&request.options)
            .await
            .map_err(|e| into_load_error(&model_id, e))?;

        // Building the weights is blocking work.
        tokio::task::spawn_blocking(move || build_handles(files, request))
            .await
            .map_err(|e| BrelloError::load(model_id.clone(), format!("Loader task failed: {}", e)))?
            .map_err(|e| into_load_error(&model_id, e))
    }
}

/// Every failure while acquiring handles surfaces as a load error.
fn into_load_error(model_id: &str, error: BrelloError) -> BrelloError {
    match error {
        BrelloError::Load { .. } => error,
        other => BrelloError::load_with_source(model_id, other.to_string(), other),
    }
}

fn build_handles(files: ModelFiles, request: LoadRequest) -> Result<ModelHandles> {
    let model_id = request.options.model_id.as_str();
    let tokenizer = BrelloTokenizer::from_file(&files.tokenizer)?;
    let mut eos_token_ids = tokenizer.eos_token_ids();

    let (weights, max_positions) = match &files.weights {
        Weights::Safetensors { config, shards } => {
            let config = read_llama_config(model_id, config)?.into_config(request.options.use_flash_attn);
            match &config.eos_token_id {
                Some(LlamaEosToks::Single(id)) => eos_token_ids.push(*id),
                Some(LlamaEosToks::Multiple(ids)) => eos_token_ids.extend(ids.iter().copied()),
                None => {}
            }
            let max_positions = config.max_position_embeddings;

            // SAFETY: the shards are not modified while mapped.
            let vb = unsafe { VarBuilder::from_mmaped_safetensors(shards, request.dtype, &request.device) }
                .map_err(|e| BrelloError::load_with_source(model_id, "Failed to map weights", e))?;
            let model = Llama::load(vb, &config)
                .map_err(|e| BrelloError::load_with_source(model_id, "Failed to build Llama model", e))?;
            (LlamaWeights::full(model, config, request.dtype, &request.device)?, max_positions)
        }
        Weights::Gguf(path) => {
            let (model, context_length, eos) = read_gguf(model_id, path, &request.device)?;
            eos_token_ids.extend(eos);
            (LlamaWeights::Quantized(model), context_length)
        }
    };

    eos_token_ids.sort_unstable();
    eos_token_ids.dedup();
    if eos_token_ids.is_empty() {
        warn!(model_id, "No end-of-sequence token found; generation will run to the token budget");
    }

    info!(model_id, max_positions, "Model loaded");
    Ok(ModelHandles {
        model: Box::new(CandleGenerator::new(weights, request.device.clone(), eos_token_ids, max_positions)),
        tokenizer: Box::new(tokenizer),
    })
}

pub(crate) fn read_llama_config(model_id: &str, path: &Path) -> Result<LlamaConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| BrelloError::load_with_source(model_id, format!("Cannot read {}", path.display()), e))?;
    serde_json::from_str(&raw)
        .map_err(|e| BrelloError::load_with_source(model_id, format!("Cannot parse {}", path.display()), e))
}

fn read_gguf(model_id: &str, path: &Path, device: &Device) -> Result<(ModelWeights, usize, Option<u32>)> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| BrelloError::load_with_source(model_id, format!("Cannot open {}", path.display()), e))?;
    let content = gguf_file::Content::read(&mut file)
        .map_err(|e| BrelloError::load_with_source(model_id, "Malformed GGUF file", e))?;

    let context_length = content
        .metadata
        .get("llama.context_length")
        .and_then(|v| v.to_u32().ok())
        .map(|v| v as usize)
        .unwrap_or(FALLBACK_CONTEXT_LENGTH);
    let eos = content
        .metadata
        .get("tokenizer.ggml.eos_token_id")
        .and_then(|v| v.to_u32().ok());

    let model = ModelWeights::from_gguf(content, &mut file, device)
        .map_err(|e| BrelloError::load_with_source(model_id, "Failed to build quantized model", e))?;
    Ok((model, context_length, eos))
}

async fn fetch(repo: &ApiRepo, model_id: &str, filename: &str) -> Result<PathBuf> {
    repo.get(filename).await.map_err(|e| hub_error(model_id, filename, e))
}

fn hub_error(model_id: &str, filename: &str, error: ApiError) -> BrelloError {
    BrelloError::load_with_source(
        model_id,
        format!(
            "could not fetch '{}' (check the identifier and network access, and accept the model license on the hub for gated repositories)",
            filename
        ),
        error,
    )
}

async fn pick_gguf_file(repo: &ApiRepo, model_id: &str, mode: QuantizationMode) -> Result<String> {
    let info = repo.info().await.map_err(|e| hub_error(model_id, "<repo info>", e))?;
    let files: Vec<String> = info.siblings.into_iter().map(|s| s.rfilename).collect();
    select_gguf(&files, mode).ok_or_else(|| {
        BrelloError::load(
            model_id,
            format!("no GGUF file matching {:?} quantization in repository", mode),
        )
    })
}

/// First GGUF file matching the mode's markers, in marker preference order.
fn select_gguf(files: &[String], mode: QuantizationMode) -> Option<String> {
    mode.gguf_markers().iter().find_map(|marker| {
        files
            .iter()
            .find(|name| {
                let lower = name.to_ascii_lowercase();
                lower.ends_with(".gguf") && lower.contains(marker)
            })
            .cloned()
    })
}

fn shard_names(index_path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(index_path)?;
    let index: serde_json::Value = serde_json::from_str(&raw)?;
    let mut shards: Vec<String> = index["weight_map"]
        .as_object()
        .map(|map| map.values().filter_map(|v| v.as_str()).map(String::from).collect())
        .unwrap_or_default();
    shards.sort();
    shards.dedup();
    Ok(shards)
}

fn local_files(dir: &Path, mode: QuantizationMode) -> Result<ModelFiles> {
    let model_id = dir.display().to_string();
    let tokenizer = dir.join(TOKENIZER_FILE);
    if !tokenizer.exists() {
        return Err(BrelloError::load(model_id, format!("{} not found", TOKENIZER_FILE)));
    }

    if mode.is_quantized() {
        let names: Vec<String> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        let file = select_gguf(&names, mode).ok_or_else(|| {
            BrelloError::load(model_id.clone(), format!("no GGUF file matching {:?} quantization", mode))
        })?;
        return Ok(ModelFiles {
            tokenizer,
            weights: Weights::Gguf(dir.join(file)),
        });
    }

    let config = dir.join(CONFIG_FILE);
    if !config.exists() {
        return Err(BrelloError::load(model_id, format!("{} not found", CONFIG_FILE)));
    }

    let index = dir.join(SAFETENSORS_INDEX);
    let shards = if index.exists() {
        shard_names(&index)?.into_iter().map(|s| dir.join(s)).collect()
    } else if dir.join(SAFETENSORS_SINGLE).exists() {
        vec![dir.join(SAFETENSORS_SINGLE)]
    } else {
        return Err(BrelloError::load(model_id, "no safetensors weights found"));
    };

    Ok(ModelFiles {
        tokenizer,
        weights: Weights::Safetensors { config, shards },
    })
}
