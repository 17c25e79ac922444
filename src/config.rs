// Location: src/config.rs

use std::collections::BTreeMap;
use std::path::Path;

use candle_core::DType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BrelloError, Result};

/// Model used when none is given.
pub const DEFAULT_MODEL_ID: &str = "meta-llama/Llama-3.2-3B-Instruct";

/// Seed for the sampler when the caller does not pick one.
pub const DEFAULT_SEED: u64 = 299792458;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrelloConfig {
    pub model: ModelOptions,
    pub generation: GenerationConfig,
    pub response: ResponsePolicy,
    /// Replaces the built-in system persona when set.
    pub persona: Option<String>,
}

/// Reduced-precision loading modes. Only one can be active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantizationMode {
    #[default]
    None,
    Int8,
    Int4,
}

impl QuantizationMode {
    /// Builds the mode from the two legacy loading flags.
    pub fn from_flags(load_in_4bit: bool, load_in_8bit: bool) -> Result<Self> {
        match (load_in_4bit, load_in_8bit) {
            (true, true) => Err(BrelloError::configuration(
                "quantization",
                "4-bit and 8-bit loading are mutually exclusive",
            )),
            (true, false) => Ok(QuantizationMode::Int4),
            (false, true) => Ok(QuantizationMode::Int8),
            (false, false) => Ok(QuantizationMode::None),
        }
    }

    pub fn is_quantized(&self) -> bool {
        !matches!(self, QuantizationMode::None)
    }

    /// GGUF file-name markers accepted for this mode, in order of preference.
    pub(crate) fn gguf_markers(&self) -> &'static [&'static str] {
        match self {
            QuantizationMode::None => &[],
            QuantizationMode::Int8 => &["q8_0"],
            QuantizationMode::Int4 => &["q4_k_m", "q4_k_s", "q4_0"],
        }
    }
}

/// Explicit weight data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightDType {
    F32,
    F16,
    Bf16,
}

impl WeightDType {
    pub fn to_dtype(self) -> DType {
        match self {
            WeightDType::F32 => DType::F32,
            WeightDType::F16 => DType::F16,
            WeightDType::Bf16 => DType::BF16,
        }
    }
}

impl std::str::FromStr for WeightDType {
    type Err = BrelloError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "f32" | "float32" => Ok(WeightDType::F32),
            "f16" | "float16" | "half" => Ok(WeightDType::F16),
            "bf16" | "bfloat16" => Ok(WeightDType::Bf16),
            other => Err(BrelloError::configuration("dtype", format!("unknown dtype '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    /// Hub repo id or path to a local model directory
    pub model_id: String,

    /// Hub revision
    pub revision: String,

    /// Device name ("cpu", "cuda", "cuda:1", "metal"); auto-detected when unset
    pub device: Option<String>,

    pub quantization: QuantizationMode,

    /// Overrides the device-based dtype choice
    pub dtype: Option<WeightDType>,

    /// Repo holding GGUF weights for quantized loading; defaults to `model_id`
    pub quantized_repo: Option<String>,

    pub use_flash_attn: bool,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            revision: "main".to_string(),
            device: None,
            quantization: QuantizationMode::None,
            dtype: None,
            quantized_repo: None,
            use_flash_attn: false,
        }
    }
}

impl ModelOptions {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            ..Default::default()
        }
    }
}

/// Default generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Ceiling on prompt plus `max_new_tokens` when chat history is threaded;
    /// older exchanges are dropped to stay under it
    pub max_length: usize,

    pub temperature: f64,

    /// Nucleus sampling threshold
    pub top_p: f64,

    pub top_k: Option<usize>,

    pub repetition_penalty: f32,

    /// Greedy decoding when false
    pub do_sample: bool,

    /// Minimum total sequence length before EOS is allowed
    pub min_length: usize,

    pub max_new_tokens: usize,

    /// 0 disables the n-gram ban
    pub no_repeat_ngram_size: usize,

    pub seed: Option<u64>,

    /// Parameters forwarded verbatim to the model handle
    pub extra: BTreeMap<String, Value>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_length: 4096,
            temperature: 0.7,
            top_p: 0.9,
            top_k: None,
            repetition_penalty: 1.1,
            do_sample: true,
            min_length: 30,
            max_new_tokens: 256,
            no_repeat_ngram_size: 3,
            seed: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Per-call parameter overrides.
///
/// Typed fields are applied first, then every `params` entry; an entry for a
/// known parameter replaces the typed field of the same name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOverrides {
    pub max_length: Option<usize>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub params: BTreeMap<String, Value>,
}

impl GenerationOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Adds an arbitrary generation parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.max_length.is_none()
            && self.temperature.is_none()
            && self.top_p.is_none()
            && self.params.is_empty()
    }
}

impl GenerationConfig {
    /// Returns a copy of `self` with `overrides` applied key by key.
    pub fn merge(&self, overrides: &GenerationOverrides) -> Result<GenerationConfig> {
        let mut merged = self.clone();

        if let Some(max_length) = overrides.max_length {
            merged.max_length = max_length;
        }
        if let Some(temperature) = overrides.temperature {
            merged.temperature = temperature;
        }
        if let Some(top_p) = overrides.top_p {
            merged.top_p = top_p;
        }

        for (key, value) in &overrides.params {
            match key.as_str() {
                "max_length" => merged.max_length = as_usize(key, value)?,
                "temperature" => merged.temperature = as_f64(key, value)?,
                "top_p" => merged.top_p = as_f64(key, value)?,
                "top_k" => merged.top_k = as_optional_usize(key, value)?,
                "repetition_penalty" => merged.repetition_penalty = as_f64(key, value)? as f32,
                "do_sample" => {
                    merged.do_sample = value
                        .as_bool()
                        .ok_or_else(|| type_mismatch(key, "a boolean", value))?
                }
                "min_length" => merged.min_length = as_usize(key, value)?,
                "max_new_tokens" => merged.max_new_tokens = as_usize(key, value)?,
                "no_repeat_ngram_size" => merged.no_repeat_ngram_size = as_usize(key, value)?,
                "seed" => {
                    merged.seed = match value {
                        Value::Null => None,
                        v => Some(v.as_u64().ok_or_else(|| type_mismatch(key, "an unsigned integer", v))?),
                    }
                }
                _ => {
                    merged.extra.insert(key.clone(), value.clone());
                }
            }
        }

        Ok(merged)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_new_tokens == 0 {
            return Err(BrelloError::configuration("max_new_tokens", "must be greater than zero"));
        }
        if self.max_length == 0 {
            return Err(BrelloError::configuration("max_length", "must be greater than zero"));
        }
        if self.do_sample && !(self.temperature > 0.0) {
            return Err(BrelloError::configuration(
                "temperature",
                "must be strictly positive when sampling is enabled",
            ));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(BrelloError::configuration("top_p", "must be in (0, 1]"));
        }
        if !(self.repetition_penalty > 0.0) {
            return Err(BrelloError::configuration("repetition_penalty", "must be strictly positive"));
        }
        if self.top_k == Some(0) {
            return Err(BrelloError::configuration("top_k", "must be greater than zero when set"));
        }
        Ok(())
    }

    pub fn seed_or_default(&self) -> u64 {
        self.seed.unwrap_or(DEFAULT_SEED)
    }
}

fn type_mismatch(key: &str, expected: &str, value: &Value) -> BrelloError {
    BrelloError::configuration(key, format!("expected {}, got {}", expected, value))
}

fn as_usize(key: &str, value: &Value) -> Result<usize> {
    value
        .as_u64()
        .map(|v| v as usize)
        .ok_or_else(|| type_mismatch(key, "an unsigned integer", value))
}

fn as_optional_usize(key: &str, value: &Value) -> Result<Option<usize>> {
    match value {
        Value::Null => Ok(None),
        v => as_usize(key, v).map(Some),
    }
}

fn as_f64(key: &str, value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| type_mismatch(key, "a number", value))
}

/// Padding applied to replies too short to stand on their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponsePolicy {
    /// Replies with fewer characters than this get wrapped
    pub min_chars: usize,
    pub filler_prefix: String,
    pub filler_suffix: String,
}

impl Default for ResponsePolicy {
    fn default() -> Self {
        Self {
            min_chars: 20,
            filler_prefix: "I understand how you might be feeling.".to_string(),
            filler_suffix: "It's important to acknowledge our emotions and experiences.".to_string(),
        }
    }
}

impl BrelloConfig {
    /// Reads a JSON config file; missing sections keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: BrelloConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.model_id.trim().is_empty() {
            return Err(BrelloError::configuration("model_id", "Model identifier cannot be empty"));
        }
        if let Some(device) = &self.model.device {
            if device.trim().is_empty() {
                return Err(BrelloError::configuration("device", "Device cannot be empty when specified"));
            }
        }
        if self.response.min_chars > 0 && self.response.filler_prefix.is_empty() {
            return Err(BrelloError::configuration(
                "filler_prefix",
                "Filler prefix cannot be empty while padding is enabled",
            ));
        }
        self.generation.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = GenerationConfig::default();
        assert_eq!(config.max_length, 4096);
        assert_eq!(config.max_new_tokens, 256);
        assert_eq!(config.min_length, 30);
        assert_eq!(config.no_repeat_ngram_size, 3);
        assert!(config.do_sample);
        assert!((config.temperature - 0.7).abs() < f64::EPSILON);
        assert!((config.top_p - 0.9).abs() < f64::EPSILON);
        assert!((config.repetition_penalty - 1.1).abs() < f32::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merge_without_overrides_is_identity() {
        let defaults = GenerationConfig::default();
        let merged = defaults.merge(&GenerationOverrides::new()).unwrap();
        assert_eq!(merged, defaults);
    }

    #[test]
    fn test_override_wins_key_by_key() {
        let defaults = GenerationConfig::default();
        let overrides = GenerationOverrides::new()
            .temperature(0.5)
            .param("max_new_tokens", 100);

        let merged = defaults.merge(&overrides).unwrap();
        assert!((merged.temperature - 0.5).abs() < f64::EPSILON);
        assert_eq!(merged.max_new_tokens, 100);
        // untouched keys keep their defaults
        assert_eq!(merged.max_length, defaults.max_length);
        assert!((merged.top_p - defaults.top_p).abs() < f64::EPSILON);
        // the defaults themselves never change
        assert!((defaults.temperature - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_valued_override_applies() {
        let merged = GenerationConfig::default()
            .merge(&GenerationOverrides::new().param("no_repeat_ngram_size", 0).param("do_sample", false))
            .unwrap();
        assert_eq!(merged.no_repeat_ngram_size, 0);
        assert!(!merged.do_sample);
    }

    #[test]
    fn test_unknown_params_pass_through() {
        let merged = GenerationConfig::default()
            .merge(&GenerationOverrides::new().param("length_penalty", 1.0))
            .unwrap();
        assert_eq!(merged.extra.get("length_penalty"), Some(&json!(1.0)));
    }

    #[test]
    fn test_param_entry_replaces_typed_override() {
        let merged = GenerationConfig::default()
            .merge(&GenerationOverrides::new().top_p(0.5).param("top_p", 0.8))
            .unwrap();
        assert!((merged.top_p - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_wrongly_typed_param_is_rejected() {
        let result = GenerationConfig::default()
            .merge(&GenerationOverrides::new().param("max_new_tokens", "lots"));
        assert!(matches!(result, Err(BrelloError::Configuration { .. })));
    }

    #[test]
    fn test_quantization_flags() {
        assert_eq!(QuantizationMode::from_flags(false, false).unwrap(), QuantizationMode::None);
        assert_eq!(QuantizationMode::from_flags(true, false).unwrap(), QuantizationMode::Int4);
        assert_eq!(QuantizationMode::from_flags(false, true).unwrap(), QuantizationMode::Int8);
        assert!(QuantizationMode::from_flags(true, true).is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = BrelloConfig::default();
        assert!(config.validate().is_ok());

        config.generation.top_p = 1.5;
        assert!(config.validate().is_err());

        let mut config = BrelloConfig::default();
        config.model.model_id = String::new();
        assert!(config.validate().is_err());

        let mut config = BrelloConfig::default();
        config.generation.temperature = 0.0;
        assert!(config.validate().is_err());
        config.generation.do_sample = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brello.json");
        std::fs::write(
            &path,
            r#"{ "model": { "model_id": "./brello_ei_0_trained", "quantization": "int4" },
                 "generation": { "temperature": 0.4 } }"#,
        )
        .unwrap();

        let config = BrelloConfig::from_file(&path).unwrap();
        assert_eq!(config.model.model_id, "./brello_ei_0_trained");
        assert_eq!(config.model.quantization, QuantizationMode::Int4);
        assert_eq!(config.model.revision, "main");
        assert!((config.generation.temperature - 0.4).abs() < f64::EPSILON);
        assert_eq!(config.generation.max_new_tokens, 256);
        assert_eq!(config.response.min_chars, 20);
    }

    #[test]
    fn test_dtype_parsing() {
        assert_eq!("float16".parse::<WeightDType>().unwrap(), WeightDType::F16);
        assert_eq!("BF16".parse::<WeightDType>().unwrap(), WeightDType::Bf16);
        assert!("int3".parse::<WeightDType>().is_err());
    }
}
