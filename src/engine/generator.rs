use std::sync::Arc;

use tracing::{debug, error, info};

use crate::{
    config::{BrelloConfig, GenerationConfig, GenerationOverrides, ModelOptions, QuantizationMode, ResponsePolicy},
    error::{BrelloError, Result},
    gpu::{device_name, resolve_device, resolve_dtype},
    model::{LoadRequest, ModelHandles, ModelResolver},
    prompt::{extract_reply, pad_short_reply, Exchange, PromptTemplate},
};

use super::builder::GeneratorBuilder;

/// Emotionally-aware response generator around a pretrained causal LM.
///
/// Generation takes `&mut self`: one instance serves one caller at a time.
pub struct ResponseGenerator {
    pub(super) options: ModelOptions,
    pub(super) defaults: GenerationConfig,
    pub(super) policy: ResponsePolicy,
    pub(super) template: PromptTemplate,
    pub(super) resolver: Arc<dyn ModelResolver>,
    pub(super) handles: Option<ModelHandles>,
    pub(super) device: Option<&'static str>,
    pub(super) history: Vec<Exchange>,
}

/// Snapshot of what a generator is configured with and whether it is ready.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorInfo {
    pub model_id: String,
    pub quantization: QuantizationMode,
    pub device: Option<&'static str>,
    pub loaded: bool,
    pub history_len: usize,
}

impl ResponseGenerator {
    pub fn builder() -> GeneratorBuilder {
        GeneratorBuilder::new()
    }

    /// Resolves device, dtype and handles.
    ///
    /// On failure the error is logged and returned, and the generator stays
    /// unloaded. A later call may try again.
    pub async fn load(&mut self) -> Result<()> {
        let model_id = self.options.model_id.clone();
        info!(model_id = %model_id, "Loading model");

        match acquire(self.resolver.clone(), self.options.clone()).await {
            Ok((handles, device)) => {
                self.handles = Some(handles);
                self.device = Some(device);
                info!(model_id = %model_id, device, "Model loaded successfully");
                Ok(())
            }
            Err(e) => {
                error!(model_id = %model_id, error = %e, "Error loading model");
                Err(e)
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.handles.is_some()
    }

    /// Wraps `user_text` in the persona/user/assistant template.
    pub fn format_prompt(&self, user_text: &str) -> String {
        self.template.format_prompt(user_text)
    }

    /// Generates a reply to a single user message.
    ///
    /// `overrides` replace the matching defaults for this call only.
    pub fn generate_response(&mut self, user_text: &str, overrides: &GenerationOverrides) -> Result<String> {
        self.complete_turn(user_text, overrides, false)
    }

    /// Chat entry point.
    ///
    /// With `maintain_history` the prior exchanges are rendered before the
    /// message and the new exchange is recorded afterwards.
    pub fn chat(&mut self, message: &str, maintain_history: bool) -> Result<String> {
        let overrides = GenerationOverrides::default();
        if !maintain_history {
            return self.generate_response(message, &overrides);
        }

        let reply = self.complete_turn(message, &overrides, true)?;
        self.history.push(Exchange::new(message, reply.clone()));
        Ok(reply)
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn history(&self) -> &[Exchange] {
        &self.history
    }

    pub fn defaults(&self) -> &GenerationConfig {
        &self.defaults
    }

    pub fn info(&self) -> GeneratorInfo {
        GeneratorInfo {
            model_id: self.options.model_id.clone(),
            quantization: self.options.quantization,
            device: self.device,
            loaded: self.is_loaded(),
            history_len: self.history.len(),
        }
    }

    /// Renders the prompt for `message`, generates and post-processes the
    /// reply.
    ///
    /// With `with_history` the oldest exchanges are dropped until the prompt
    /// plus `max_new_tokens` fits in `max_length`.
    fn complete_turn(&mut self, message: &str, overrides: &GenerationOverrides, with_history: bool) -> Result<String> {
        let handles = self
            .handles
            .as_mut()
            .ok_or_else(|| BrelloError::State("call load() before generating".to_string()))?;

        let config = self.defaults.merge(overrides)?;
        config.validate()?;
        debug!(?config, "Generating response");

        let prompt_ids = if with_history {
            let mut dropped = 0;
            let ids = loop {
                let prompt = self.template.format_conversation(&self.history[dropped..], message);
                let ids = handles.tokenizer.encode(&prompt)?;
                let fits = ids.len() + config.max_new_tokens <= config.max_length;
                if fits || dropped == self.history.len() {
                    break ids;
                }
                dropped += 1;
            };
            if dropped > 0 {
                debug!(dropped, kept = self.history.len() - dropped, "Dropping oldest exchanges to fit max_length");
                self.history.drain(..dropped);
            }
            ids
        } else {
            handles.tokenizer.encode(&self.template.format_prompt(message))?
        };

        let output_ids = handles.model.generate(&prompt_ids, &config)?;
        let decoded = handles.tokenizer.decode(&output_ids, true)?;

        Ok(pad_short_reply(extract_reply(&decoded), &self.policy))
    }
}

async fn acquire(resolver: Arc<dyn ModelResolver>, options: ModelOptions) -> Result<(ModelHandles, &'static str)> {
    let device = resolve_device(options.device.as_deref())?;
    let dtype = resolve_dtype(&device, options.dtype);
    let name = device_name(&device);
    debug!(device = name, ?dtype, quantization = ?options.quantization, "Resolved load target");

    let handles = resolver.resolve(LoadRequest { options, device, dtype }).await?;
    Ok((handles, name))
}

/// Builds and loads a generator for `model_id` with every other setting at
/// its default.
pub async fn load_generator(model_id: impl Into<String>) -> Result<ResponseGenerator> {
    let config = BrelloConfig {
        model: ModelOptions::new(model_id),
        ..Default::default()
    };
    GeneratorBuilder::new().with_config(config).load().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TextCodec, TextGenerator};
    use pretty_assertions::assert_eq;

    /// Characters as tokens; the model appends a fixed reply.
    struct CharCodec;

    impl TextCodec for CharCodec {
        fn encode(&self, text: &str) -> Result<Vec<u32>> {
            Ok(text.chars().map(|c| c as u32).collect())
        }

        fn decode(&self, ids: &[u32], _skip_special_tokens: bool) -> Result<String> {
            Ok(ids.iter().filter_map(|&id| char::from_u32(id)).collect())
        }

        fn eos_token_ids(&self) -> Vec<u32> {
            Vec::new()
        }
    }

    struct FixedReply(&'static str);

    impl TextGenerator for FixedReply {
        fn generate(&mut self, prompt_ids: &[u32], _config: &GenerationConfig) -> Result<Vec<u32>> {
            let mut ids = prompt_ids.to_vec();
            ids.extend(self.0.chars().map(|c| c as u32));
            Ok(ids)
        }
    }

    struct FixedResolver(&'static str);

    #[async_trait::async_trait]
    impl ModelResolver for FixedResolver {
        async fn resolve(&self, _request: LoadRequest) -> Result<ModelHandles> {
            Ok(ModelHandles {
                model: Box::new(FixedReply(self.0)),
                tokenizer: Box::new(CharCodec),
            })
        }
    }

    fn generator(reply: &'static str) -> ResponseGenerator {
        ResponseGenerator::builder()
            .with_device("cpu")
            .with_resolver(FixedResolver(reply))
            .build()
            .unwrap()
    }

    #[test]
    fn test_generate_before_load_is_state_error() {
        let mut generator = generator("irrelevant");
        let err = generator
            .generate_response("Hello", &GenerationOverrides::default())
            .unwrap_err();
        assert!(err.is_state_error());
        assert!(generator.chat("Hello", true).unwrap_err().is_state_error());
        assert!(generator.history().is_empty());
    }

    #[tokio::test]
    async fn test_reply_is_extracted_after_assistant_marker() {
        let mut generator = generator("  That sounds like a genuinely hard week for you.  ");
        generator.load().await.unwrap();

        let info = generator.info();
        assert!(info.loaded);
        assert_eq!(info.device, Some("cpu"));

        let reply = generator.chat("I had a rough week.", false).unwrap();
        assert_eq!(reply, "That sounds like a genuinely hard week for you.");
    }

    #[tokio::test]
    async fn test_history_grows_only_when_requested() {
        let mut generator = generator("I'm here with you, and that matters.");
        generator.load().await.unwrap();

        generator.chat("first", false).unwrap();
        assert!(generator.history().is_empty());

        generator.chat("second", true).unwrap();
        assert_eq!(generator.history().len(), 1);
        assert_eq!(generator.history()[0].user, "second");

        generator.clear_history();
        assert_eq!(generator.info().history_len, 0);
    }
}
