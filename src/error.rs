use std::error::Error as StdError;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrelloError>;

#[derive(Debug, Error)]
pub enum BrelloError {
    /// The model or tokenizer could not be acquired.
    #[error("Failed to load model '{model_id}': {message}")]
    Load {
        model_id: String,
        message: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// An operation that needs loaded handles ran before `load()` succeeded.
    #[error("Model not loaded: {0}")]
    State(String),

    #[error("Configuration error for {parameter}: {message}")]
    Configuration { parameter: String, message: String },

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BrelloError {
    pub(crate) fn load(model_id: impl Into<String>, message: impl Into<String>) -> Self {
        BrelloError::Load {
            model_id: model_id.into(),
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn load_with_source<E>(model_id: impl Into<String>, message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        BrelloError::Load {
            model_id: model_id.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn configuration(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        BrelloError::Configuration {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// True for failures raised while acquiring the model or tokenizer.
    pub fn is_load_error(&self) -> bool {
        matches!(self, BrelloError::Load { .. })
    }

    /// True when the generator was used before a successful load.
    pub fn is_state_error(&self) -> bool {
        matches!(self, BrelloError::State(_))
    }
}

impl From<candle_core::Error> for BrelloError {
    fn from(e: candle_core::Error) -> Self {
        BrelloError::Generation(e.to_string())
    }
}
