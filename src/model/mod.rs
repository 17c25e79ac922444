//! Model and tokenizer handles, and the capability that produces them
//!
//! The generator never touches weights directly. It asks a [`ModelResolver`]
//! for a pair of handles and drives them through [`TextGenerator`] and
//! [`TextCodec`], so tests can swap in deterministic stubs.

mod loader;
mod runtime;
mod tokenizer;

pub use loader::{HubResolver, ModelFiles, Weights};
pub(crate) use loader::read_llama_config;
pub use runtime::{CandleGenerator, LlamaWeights};
pub use tokenizer::BrelloTokenizer;

use candle_core::{DType, Device};

use crate::{
    config::{GenerationConfig, ModelOptions},
    error::Result,
};

/// Produces token ids from a prompt.
pub trait TextGenerator: Send {
    /// Runs generation and returns the prompt ids followed by the generated
    /// ids.
    fn generate(&mut self, prompt_ids: &[u32], config: &GenerationConfig) -> Result<Vec<u32>>;
}

/// Converts between text and token ids.
pub trait TextCodec: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String>;

    /// Ids that end generation.
    fn eos_token_ids(&self) -> Vec<u32>;
}

/// The model/tokenizer pair owned by a loaded generator.
pub struct ModelHandles {
    pub model: Box<dyn TextGenerator>,
    pub tokenizer: Box<dyn TextCodec>,
}

impl std::fmt::Debug for ModelHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandles").finish_non_exhaustive()
    }
}

/// Everything a resolver needs once device and dtype are settled.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub options: ModelOptions,
    pub device: Device,
    pub dtype: DType,
}

/// Acquires model and tokenizer handles for an identifier.
#[async_trait::async_trait]
pub trait ModelResolver: Send + Sync {
    async fn resolve(&self, request: LoadRequest) -> Result<ModelHandles>;
}
