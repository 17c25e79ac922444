use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::{
    loss,
    optim::{AdamW, Optimizer, ParamsAdamW},
    VarBuilder, VarMap,
};
use candle_transformers::models::llama::{Cache, Config, Llama};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::dataset::{build_dataset, TrainingExample};
use crate::{
    config::{ModelOptions, DEFAULT_MODEL_ID},
    error::{BrelloError, Result},
    gpu::{device_name, resolve_device},
    model::{read_llama_config, BrelloTokenizer, HubResolver, ModelFiles, Weights},
};

const CHECKPOINT_PREFIX: &str = "checkpoint-";

/// Fine-tuning hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub base_model: String,
    pub output_dir: PathBuf,
    pub epochs: usize,
    pub batch_size: usize,
    pub gradient_accumulation_steps: usize,
    pub learning_rate: f64,
    /// Optimizer steps of linear warmup
    pub warmup_steps: usize,
    pub weight_decay: f64,
    pub logging_steps: usize,
    pub save_steps: usize,
    /// Oldest checkpoints beyond this many are deleted
    pub save_total_limit: usize,
    pub max_length: usize,
    /// Reply positions scored per example
    pub positions_per_example: usize,
    pub device: Option<String>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            base_model: DEFAULT_MODEL_ID.to_string(),
            output_dir: PathBuf::from("./brello_ei_0_trained"),
            epochs: 2,
            batch_size: 1,
            gradient_accumulation_steps: 4,
            learning_rate: 2e-4,
            warmup_steps: 50,
            weight_decay: 0.01,
            logging_steps: 10,
            save_steps: 50,
            save_total_limit: 2,
            max_length: 1024,
            positions_per_example: 4,
            device: None,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("epochs", self.epochs),
            ("batch_size", self.batch_size),
            ("gradient_accumulation_steps", self.gradient_accumulation_steps),
            ("max_length", self.max_length),
            ("positions_per_example", self.positions_per_example),
        ];
        for (parameter, value) in positive {
            if value == 0 {
                return Err(BrelloError::configuration(parameter, "must be greater than zero"));
            }
        }
        if self.learning_rate <= 0.0 {
            return Err(BrelloError::configuration("learning_rate", "must be positive"));
        }
        Ok(())
    }

    /// Examples consumed per optimizer step.
    pub fn examples_per_step(&self) -> usize {
        self.batch_size * self.gradient_accumulation_steps
    }

    /// Optimizer steps for a dataset of `examples` items.
    pub fn total_steps(&self, examples: usize) -> usize {
        examples.div_ceil(self.examples_per_step()) * self.epochs
    }

    /// Learning rate at optimizer step `step` (0-based): linear warmup, then
    /// linear decay to zero at `total_steps`.
    pub fn learning_rate_at(&self, step: usize, total_steps: usize) -> f64 {
        if step < self.warmup_steps {
            return self.learning_rate * (step + 1) as f64 / self.warmup_steps as f64;
        }
        let decay_span = total_steps.saturating_sub(self.warmup_steps).max(1);
        let remaining = total_steps.saturating_sub(step) as f64 / decay_span as f64;
        self.learning_rate * remaining.clamp(0.0, 1.0)
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub optimizer_steps: usize,
    pub final_loss: f32,
    pub elapsed_secs: f64,
    pub checkpoints: Vec<PathBuf>,
    pub output_dir: PathBuf,
}

/// A Llama model held in a [`VarMap`] so it can be fine-tuned.
pub struct Trainer {
    model: Llama,
    varmap: VarMap,
    cache: Cache,
    config_path: PathBuf,
    tokenizer: BrelloTokenizer,
    device: Device,
    settings: TrainingConfig,
}

impl Trainer {
    /// Fetches the base model and loads its weights into trainable variables.
    pub async fn prepare(settings: TrainingConfig) -> Result<Self> {
        settings.validate()?;
        let files = HubResolver::new()
            .fetch_files(&ModelOptions::new(settings.base_model.clone()))
            .await?;
        tokio::task::spawn_blocking(move || Self::from_files(files, settings))
            .await
            .map_err(|e| BrelloError::Training(format!("Loader task failed: {}", e)))?
    }

    fn from_files(files: ModelFiles, settings: TrainingConfig) -> Result<Self> {
        let (config_path, shards) = match files.weights {
            Weights::Safetensors { config, shards } => (config, shards),
            Weights::Gguf(_) => {
                return Err(BrelloError::Training("quantized weights cannot be fine-tuned".to_string()))
            }
        };

        let device = resolve_device(settings.device.as_deref())?;
        // candle has no bf16 kernels on CPU; train in f32 there.
        let dtype = if device.is_cpu() { DType::F32 } else { DType::BF16 };
        let config: Config = read_llama_config(&settings.base_model, &config_path)?.into_config(false);

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, dtype, &device);
        let model = Llama::load(vb, &config)
            .map_err(|e| BrelloError::Training(format!("Failed to build trainable model: {}", e)))?;
        load_pretrained(&varmap, &shards, dtype, &device)?;

        let cache = Cache::new(false, dtype, &config, &device)?;
        let tokenizer = BrelloTokenizer::from_file(&files.tokenizer)?;

        info!(
            base_model = %settings.base_model,
            device = device_name(&device),
            ?dtype,
            layers = config.num_hidden_layers,
            "Trainable model ready"
        );

        Ok(Self {
            model,
            varmap,
            cache,
            config_path,
            tokenizer,
            device,
            settings,
        })
    }

    /// Runs the fine-tuning loop and writes the trained model to the output
    /// directory.
    pub fn train(&mut self) -> Result<TrainingReport> {
        self.run().map_err(|e| match e {
            BrelloError::Generation(message) => BrelloError::Training(message),
            other => other,
        })
    }

    fn run(&mut self) -> Result<TrainingReport> {
        let settings = self.settings.clone();
        let pad_id = self.tokenizer.pad_token_id().unwrap_or(0);
        let dataset = build_dataset(&self.tokenizer, settings.max_length, pad_id)?;
        let total_steps = settings.total_steps(dataset.len());

        std::fs::create_dir_all(&settings.output_dir)?;

        let params = ParamsAdamW {
            lr: settings.learning_rate_at(0, total_steps),
            weight_decay: settings.weight_decay,
            ..Default::default()
        };
        let mut optimizer = AdamW::new(self.varmap.all_vars(), params)?;

        info!(
            examples = dataset.len(),
            epochs = settings.epochs,
            total_steps,
            lr = settings.learning_rate,
            "Starting fine-tuning"
        );

        let start = Instant::now();
        let mut step = 0usize;
        let mut last_loss = f32::NAN;
        let mut checkpoints = Vec::new();

        for epoch in 0..settings.epochs {
            for group in dataset.chunks(settings.examples_per_step()) {
                let mut losses = Vec::with_capacity(group.len());
                for example in group {
                    if let Some(loss) = self.example_loss(example)? {
                        losses.push(loss);
                    }
                }
                if losses.is_empty() {
                    warn!(step, "No reply tokens in accumulation group, skipping");
                    continue;
                }

                let count = losses.len() as f64;
                let loss = (Tensor::stack(&losses, 0)?.sum_all()? / count)?;
                last_loss = loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;

                optimizer.set_learning_rate(settings.learning_rate_at(step, total_steps));
                optimizer.backward_step(&loss)?;
                step += 1;

                if settings.logging_steps > 0 && step % settings.logging_steps == 0 {
                    info!(step, epoch = epoch + 1, loss = last_loss, lr = optimizer.learning_rate(), "Training progress");
                }
                if settings.save_steps > 0 && step % settings.save_steps == 0 {
                    checkpoints = self.save_checkpoint(step)?;
                }
            }
            info!(epoch = epoch + 1, loss = last_loss, "Epoch complete");
        }

        self.save_model(&settings.output_dir)?;
        let elapsed_secs = start.elapsed().as_secs_f64();
        info!(steps = step, loss = last_loss, elapsed_secs, output = %settings.output_dir.display(), "Training completed");

        Ok(TrainingReport {
            optimizer_steps: step,
            final_loss: last_loss,
            elapsed_secs,
            checkpoints,
            output_dir: settings.output_dir,
        })
    }

    /// Mean next-token loss over a few reply positions.
    ///
    /// The candle Llama forward pass returns last-position logits only, so
    /// each position is scored with its own prefix.
    fn example_loss(&mut self, example: &TrainingExample) -> Result<Option<Tensor>> {
        let positions = example.target_positions(self.settings.positions_per_example);
        if positions.is_empty() {
            return Ok(None);
        }

        let mut losses = Vec::with_capacity(positions.len());
        for &position in &positions {
            let input = Tensor::new(&example.input_ids[..position], &self.device)?.unsqueeze(0)?;
            let logits = self.model.forward(&input, 0, &mut self.cache)?.to_dtype(DType::F32)?;
            let target = Tensor::new(&[example.input_ids[position]], &self.device)?;
            losses.push(loss::cross_entropy(&logits, &target)?);
        }
        debug!(positions = positions.len(), "Scored example");

        let count = losses.len() as f64;
        Ok(Some((Tensor::stack(&losses, 0)?.sum_all()? / count)?))
    }

    fn save_checkpoint(&self, step: usize) -> Result<Vec<PathBuf>> {
        let dir = self.settings.output_dir.join(format!("{}{}", CHECKPOINT_PREFIX, step));
        self.save_model(&dir)?;
        info!(step, path = %dir.display(), "Checkpoint saved");
        rotate_checkpoints(&self.settings.output_dir, self.settings.save_total_limit)
    }

    /// Writes weights, config and tokenizer in the layout the loader reads.
    fn save_model(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        self.varmap
            .save(dir.join("model.safetensors"))
            .map_err(|e| BrelloError::Training(format!("Failed to save weights: {}", e)))?;
        std::fs::copy(&self.config_path, dir.join("config.json"))?;
        self.tokenizer.save(dir.join("tokenizer.json"))
    }
}

/// Copies pretrained tensors into the matching variables, shard by shard.
fn load_pretrained(varmap: &VarMap, shards: &[PathBuf], dtype: DType, device: &Device) -> Result<()> {
    let vars = varmap
        .data()
        .lock()
        .map_err(|_| BrelloError::Training("variable map lock poisoned".to_string()))?;

    let mut assigned = 0usize;
    for shard in shards {
        let tensors = candle_core::safetensors::load(shard, device)?;
        for (name, tensor) in tensors {
            if let Some(var) = vars.get(&name) {
                var.set(&tensor.to_dtype(dtype)?)?;
                assigned += 1;
            }
        }
    }

    if assigned < vars.len() {
        warn!(assigned, expected = vars.len(), "Some parameters kept their random initialisation");
    }
    info!(assigned, shards = shards.len(), "Pretrained weights loaded");
    Ok(())
}

/// Deletes the oldest `checkpoint-N` directories beyond `limit` and returns
/// the survivors, oldest first.
pub fn rotate_checkpoints(output_dir: &Path, limit: usize) -> Result<Vec<PathBuf>> {
    let mut checkpoints: Vec<(usize, PathBuf)> = std::fs::read_dir(output_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let step = name.strip_prefix(CHECKPOINT_PREFIX)?.parse::<usize>().ok()?;
            Some((step, entry.path()))
        })
        .collect();
    checkpoints.sort_by_key(|(step, _)| *step);

    if limit > 0 && checkpoints.len() > limit {
        let excess = checkpoints.len() - limit;
        for (step, path) in checkpoints.drain(..excess) {
            debug!(step, "Removing old checkpoint");
            std::fs::remove_dir_all(path)?;
        }
    }

    Ok(checkpoints.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = TrainingConfig::default();
        assert_eq!(config.epochs, 2);
        assert_eq!(config.examples_per_step(), 4);
        assert_eq!(config.max_length, 1024);
        assert_eq!(config.output_dir, PathBuf::from("./brello_ei_0_trained"));
        assert!(config.validate().is_ok());
        // ten dialogues, four per step, two epochs
        assert_eq!(config.total_steps(10), 6);
    }

    #[test]
    fn test_learning_rate_schedule() {
        let config = TrainingConfig {
            learning_rate: 1.0,
            warmup_steps: 4,
            ..Default::default()
        };
        assert!((config.learning_rate_at(0, 12) - 0.25).abs() < 1e-9);
        assert!((config.learning_rate_at(3, 12) - 1.0).abs() < 1e-9);
        assert!((config.learning_rate_at(4, 12) - 1.0).abs() < 1e-9);
        assert!((config.learning_rate_at(8, 12) - 0.5).abs() < 1e-9);
        assert_eq!(config.learning_rate_at(12, 12), 0.0);
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = TrainingConfig {
            gradient_accumulation_steps: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_checkpoint_rotation() {
        let dir = tempfile::tempdir().unwrap();
        for step in [50, 100, 150] {
            std::fs::create_dir(dir.path().join(format!("checkpoint-{}", step))).unwrap();
        }
        std::fs::create_dir(dir.path().join("logs")).unwrap();

        let kept = rotate_checkpoints(dir.path(), 2).unwrap();
        assert_eq!(
            kept,
            vec![dir.path().join("checkpoint-100"), dir.path().join("checkpoint-150")]
        );
        assert!(!dir.path().join("checkpoint-50").exists());
        assert!(dir.path().join("logs").exists());
    }
}
