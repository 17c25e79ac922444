// Location: src/model/runtime.rs

use std::collections::HashSet;

use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::{LogitsProcessor, Sampling};
use candle_transformers::models::llama::{Cache, Config, Llama};
use candle_transformers::models::quantized_llama::ModelWeights;
use tracing::{debug, warn};

use super::TextGenerator;
use crate::{
    config::GenerationConfig,
    error::{BrelloError, Result},
};

/// Llama-family weights, full precision or GGUF-quantized.
pub enum LlamaWeights {
    Full {
        model: Llama,
        config: Config,
        dtype: DType,
        cache: Cache,
    },
    Quantized(ModelWeights),
}

impl LlamaWeights {
    pub fn full(model: Llama, config: Config, dtype: DType, device: &Device) -> Result<Self> {
        let cache = Cache::new(true, dtype, &config, device)?;
        Ok(LlamaWeights::Full {
            model,
            config,
            dtype,
            cache,
        })
    }

    /// Clears the KV cache before a new sequence.
    fn reset(&mut self, device: &Device) -> Result<()> {
        match self {
            LlamaWeights::Full {
                config, dtype, cache, ..
            } => {
                *cache = Cache::new(true, *dtype, config, device)?;
            }
            // The quantized model resets its cache whenever index_pos is 0.
            LlamaWeights::Quantized(_) => {}
        }
        Ok(())
    }

    /// Logits for the last position, shape `[1, vocab]`.
    fn forward(&mut self, input: &Tensor, index_pos: usize) -> Result<Tensor> {
        let logits = match self {
            LlamaWeights::Full { model, cache, .. } => model.forward(input, index_pos, cache)?,
            LlamaWeights::Quantized(model) => model.forward(input, index_pos)?,
        };
        Ok(logits)
    }
}

/// [`TextGenerator`] backed by a candle Llama model.
pub struct CandleGenerator {
    weights: LlamaWeights,
    device: Device,
    eos_token_ids: Vec<u32>,
    max_positions: usize,
    calls: u64,
}

impl CandleGenerator {
    pub fn new(weights: LlamaWeights, device: Device, eos_token_ids: Vec<u32>, max_positions: usize) -> Self {
        Self {
            weights,
            device,
            eos_token_ids,
            max_positions,
            calls: 0,
        }
    }

    fn sampler(&self, config: &GenerationConfig) -> LogitsProcessor {
        let sampling = if !config.do_sample {
            Sampling::ArgMax
        } else {
            let temperature = config.temperature;
            match (config.top_k, config.top_p < 1.0) {
                (Some(k), true) => Sampling::TopKThenTopP {
                    k,
                    p: config.top_p,
                    temperature,
                },
                (Some(k), false) => Sampling::TopK { k, temperature },
                (None, true) => Sampling::TopP {
                    p: config.top_p,
                    temperature,
                },
                (None, false) => Sampling::All { temperature },
            }
        };
        // Without an explicit seed each call draws a fresh, reproducible stream.
        let seed = match config.seed {
            Some(seed) => seed,
            None => config.seed_or_default().wrapping_add(self.calls),
        };
        LogitsProcessor::from_sampling(seed, sampling)
    }
}

impl TextGenerator for CandleGenerator {
    fn generate(&mut self, prompt_ids: &[u32], config: &GenerationConfig) -> Result<Vec<u32>> {
        if prompt_ids.is_empty() {
            return Err(BrelloError::Generation("Prompt encoded to zero tokens".to_string()));
        }
        for key in config.extra.keys() {
            warn!(parameter = %key, "Generation parameter not understood by the candle backend, ignoring");
        }

        // max_new_tokens takes precedence over max_length; only the position
        // table bounds it.
        let room = self.max_positions.saturating_sub(prompt_ids.len());
        if room == 0 {
            return Err(BrelloError::Generation(format!(
                "Prompt of {} tokens fills the model's {} positions",
                prompt_ids.len(),
                self.max_positions
            )));
        }
        let budget = config.max_new_tokens.min(room);

        self.weights.reset(&self.device)?;
        let mut logits_processor = self.sampler(config);
        self.calls += 1;

        let mut tokens = prompt_ids.to_vec();
        let mut index_pos = 0;

        for step in 0..budget {
            let context = if step == 0 {
                &tokens[..]
            } else {
                &tokens[tokens.len() - 1..]
            };
            let input = Tensor::new(context, &self.device)?.unsqueeze(0)?;
            let logits = self.weights.forward(&input, index_pos)?;
            index_pos += context.len();

            let mut scores = logits.squeeze(0)?.to_dtype(DType::F32)?.to_vec1::<f32>()?;
            apply_repetition_penalty(&mut scores, &tokens, config.repetition_penalty);
            suppress_tokens(&mut scores, &banned_ngram_tokens(&tokens, config.no_repeat_ngram_size));
            if tokens.len() < config.min_length {
                suppress_tokens(&mut scores, &self.eos_token_ids);
            }

            let scores = Tensor::new(scores.as_slice(), &self.device)?;
            let next_token = logits_processor.sample(&scores)?;
            tokens.push(next_token);

            if self.eos_token_ids.contains(&next_token) {
                break;
            }
        }

        debug!(
            prompt_tokens = prompt_ids.len(),
            generated_tokens = tokens.len() - prompt_ids.len(),
            "Generation finished"
        );
        Ok(tokens)
    }
}

/// Divides positive and multiplies negative logits of every token already in
/// `context`.
pub(crate) fn apply_repetition_penalty(scores: &mut [f32], context: &[u32], penalty: f32) {
    if penalty == 1.0 {
        return;
    }
    let seen: HashSet<u32> = context.iter().copied().collect();
    for token in seen {
        if let Some(score) = scores.get_mut(token as usize) {
            *score = if *score < 0.0 { *score * penalty } else { *score / penalty };
        }
    }
}

/// Tokens that would complete an `n`-gram already present in `tokens`.
pub(crate) fn banned_ngram_tokens(tokens: &[u32], n: usize) -> Vec<u32> {
    if n == 0 || tokens.len() + 1 < n {
        return Vec::new();
    }
    let prefix = &tokens[tokens.len() + 1 - n..];
    tokens
        .windows(n)
        .filter(|window| &window[..n - 1] == prefix)
        .map(|window| window[n - 1])
        .collect()
}

fn suppress_tokens(scores: &mut [f32], tokens: &[u32]) {
    for &token in tokens {
        if let Some(score) = scores.get_mut(token as usize) {
            *score = f32::NEG_INFINITY;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::{VarBuilder, VarMap};

    const VOCAB: usize = 300;
    const HIDDEN: usize = 8;
    const FAVOURED: u32 = 42;
    const PROMPT: [u32; 4] = [1, 2, 3, 4];

    /// One-layer Llama whose logits always peak at `FAVOURED`.
    fn tiny_generator(eos_token_ids: Vec<u32>, max_positions: usize) -> CandleGenerator {
        let device = Device::Cpu;
        let config = Config {
            hidden_size: HIDDEN,
            intermediate_size: 16,
            vocab_size: VOCAB,
            num_hidden_layers: 1,
            num_attention_heads: 2,
            num_key_value_heads: 2,
            rms_norm_eps: 1e-5,
            rope_theta: 10_000.0,
            use_flash_attn: false,
            bos_token_id: None,
            eos_token_id: None,
            rope_scaling: None,
            max_position_embeddings: 64,
            tie_word_embeddings: false,
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = Llama::load(vb, &config).unwrap();

        // Constant embeddings pass through zeroed blocks unchanged, so the head
        // row of FAVOURED decides every step.
        let mut head = vec![0f32; VOCAB * HIDDEN];
        head[FAVOURED as usize * HIDDEN..(FAVOURED as usize + 1) * HIDDEN].fill(1.0);
        for (name, var) in varmap.data().lock().unwrap().iter() {
            let value = match name.as_str() {
                "model.embed_tokens.weight" | "model.norm.weight" => var.ones_like().unwrap(),
                "lm_head.weight" => Tensor::from_vec(head.clone(), (VOCAB, HIDDEN), &device).unwrap(),
                _ => var.zeros_like().unwrap(),
            };
            var.set(&value).unwrap();
        }

        let weights = LlamaWeights::full(model, config, DType::F32, &device).unwrap();
        CandleGenerator::new(weights, device, eos_token_ids, max_positions)
    }

    fn greedy(max_new_tokens: usize) -> GenerationConfig {
        GenerationConfig {
            do_sample: false,
            max_new_tokens,
            min_length: 0,
            no_repeat_ngram_size: 0,
            repetition_penalty: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_generate_returns_prompt_and_budgeted_continuation() {
        let mut generator = tiny_generator(Vec::new(), 64);
        let tokens = generator.generate(&PROMPT, &greedy(3)).unwrap();
        assert_eq!(tokens, vec![1, 2, 3, 4, FAVOURED, FAVOURED, FAVOURED]);
    }

    #[test]
    fn test_max_new_tokens_wins_over_short_max_length() {
        let mut generator = tiny_generator(Vec::new(), 64);
        let config = GenerationConfig {
            max_length: 2,
            ..greedy(3)
        };
        let tokens = generator.generate(&PROMPT, &config).unwrap();
        assert_eq!(tokens.len(), PROMPT.len() + 3);
    }

    #[test]
    fn test_budget_capped_by_model_positions() {
        let mut generator = tiny_generator(Vec::new(), 6);
        let tokens = generator.generate(&PROMPT, &greedy(10)).unwrap();
        assert_eq!(tokens.len(), 6);
    }

    #[test]
    fn test_prompt_filling_positions_is_an_error() {
        let mut generator = tiny_generator(Vec::new(), 4);
        let err = generator.generate(&PROMPT, &greedy(10)).unwrap_err();
        assert!(matches!(err, BrelloError::Generation(_)));
    }

    #[test]
    fn test_stops_on_eos() {
        let mut generator = tiny_generator(vec![7, FAVOURED], 64);
        let tokens = generator.generate(&PROMPT, &greedy(10)).unwrap();
        assert_eq!(tokens, vec![1, 2, 3, 4, FAVOURED]);
    }

    #[test]
    fn test_eos_suppressed_below_min_length() {
        let mut generator = tiny_generator(vec![FAVOURED], 64);
        let config = GenerationConfig {
            min_length: 6,
            ..greedy(10)
        };
        let tokens = generator.generate(&PROMPT, &config).unwrap();

        // positions 4 and 5 are generated below min_length, EOS only after
        assert_eq!(tokens.len(), 7);
        assert_ne!(tokens[4], FAVOURED);
        assert_ne!(tokens[5], FAVOURED);
        assert_eq!(tokens[6], FAVOURED);
    }

    #[test]
    fn test_repetition_penalty() {
        let mut scores = vec![2.0, -2.0, 2.0, 4.0];
        apply_repetition_penalty(&mut scores, &[0, 1, 1, 9], 2.0);
        assert_eq!(scores, vec![1.0, -4.0, 2.0, 4.0]);
    }

    #[test]
    fn test_neutral_penalty_is_noop() {
        let mut scores = vec![2.0, -2.0];
        apply_repetition_penalty(&mut scores, &[0, 1], 1.0);
        assert_eq!(scores, vec![2.0, -2.0]);
    }

    #[test]
    fn test_ngram_ban() {
        // "a b c a b" with trigrams: the prefix "a b" was followed by "c"
        let tokens = [1, 2, 3, 1, 2];
        assert_eq!(banned_ngram_tokens(&tokens, 3), vec![3]);
        // bigrams: "b" was followed by "c"
        assert_eq!(banned_ngram_tokens(&tokens, 2), vec![3]);
        // unigrams ban every token already seen
        let mut unigrams = banned_ngram_tokens(&tokens, 1);
        unigrams.sort();
        unigrams.dedup();
        assert_eq!(unigrams, vec![1, 2, 3]);
    }

    #[test]
    fn test_ngram_ban_disabled_or_too_short() {
        assert!(banned_ngram_tokens(&[1, 2, 3], 0).is_empty());
        assert!(banned_ngram_tokens(&[1], 3).is_empty());
        assert!(banned_ngram_tokens(&[1, 2, 3, 4], 3).is_empty());
    }

    #[test]
    fn test_suppress_tokens() {
        let mut scores = vec![0.5, 0.5, 0.5];
        suppress_tokens(&mut scores, &[1, 7]);
        assert_eq!(scores[1], f32::NEG_INFINITY);
        assert_eq!(scores[0], 0.5);
    }
}
