use std::sync::Arc;

use crate::{
    config::{BrelloConfig, GenerationConfig, QuantizationMode, WeightDType},
    error::Result,
    model::{HubResolver, ModelResolver},
    prompt::PromptTemplate,
};

use super::generator::ResponseGenerator;

/// Builder for constructing a [`ResponseGenerator`]
pub struct GeneratorBuilder {
    config: BrelloConfig,
    resolver: Option<Arc<dyn ModelResolver>>,
}

impl GeneratorBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: BrelloConfig::default(),
            resolver: None,
        }
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: BrelloConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.config.model.model_id = model_id.into();
        self
    }

    /// Device name such as `cpu`, `cuda:0` or `metal`
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.config.model.device = Some(device.into());
        self
    }

    pub fn with_quantization(mut self, quantization: QuantizationMode) -> Self {
        self.config.model.quantization = quantization;
        self
    }

    pub fn with_dtype(mut self, dtype: WeightDType) -> Self {
        self.config.model.dtype = Some(dtype);
        self
    }

    pub fn with_generation_config(mut self, generation: GenerationConfig) -> Self {
        self.config.generation = generation;
        self
    }

    /// Replace the system persona rendered at the top of every prompt
    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.config.persona = Some(persona.into());
        self
    }

    /// Use a custom source of model handles instead of the hub
    pub fn with_resolver(mut self, resolver: impl ModelResolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Build an unloaded generator
    pub fn build(self) -> Result<ResponseGenerator> {
        self.config.validate()?;

        let BrelloConfig {
            model,
            generation,
            response,
            persona,
        } = self.config;

        let template = match persona {
            Some(persona) => PromptTemplate::with_system(persona),
            None => PromptTemplate::default(),
        };
        let resolver = self.resolver.unwrap_or_else(|| Arc::new(HubResolver::new()));

        Ok(ResponseGenerator {
            options: model,
            defaults: generation,
            policy: response,
            template,
            resolver,
            handles: None,
            device: None,
            history: Vec::new(),
        })
    }

    /// Build the generator and load its model
    pub async fn load(self) -> Result<ResponseGenerator> {
        let mut generator = self.build()?;
        generator.load().await?;
        Ok(generator)
    }
}

impl Default for GeneratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::DEFAULT_PERSONA;

    #[test]
    fn test_builder_default() {
        let generator = GeneratorBuilder::default().build().unwrap();
        assert!(!generator.is_loaded());
        assert!(generator.format_prompt("hi").contains(DEFAULT_PERSONA));
        assert_eq!(generator.defaults(), &GenerationConfig::default());
    }

    #[test]
    fn test_builder_validation() {
        let result = GeneratorBuilder::new().with_model_id("  ").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_persona_override() {
        let generator = GeneratorBuilder::new()
            .with_persona("You are a calm listener.")
            .build()
            .unwrap();
        let prompt = generator.format_prompt("hi");
        assert!(prompt.starts_with("<|system|>\nYou are a calm listener.\n</s>"));
    }
}
