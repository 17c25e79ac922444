//! Brello EI - emotionally-aware response generation
//!
//! This crate wraps a pretrained causal language model with a fixed persona
//! prompt, sensible generation defaults and reply post-processing. It also
//! ships the surrounding tooling: a fine-tuning loop over a small built-in
//! dialogue set, and packaging plus upload of the result to a model hub.
//!
//! ```no_run
//! use brello_ei::{GenerationOverrides, ResponseGenerator};
//!
//! # async fn run() -> brello_ei::Result<()> {
//! let mut generator = ResponseGenerator::builder()
//!     .with_device("cpu")
//!     .load()
//!     .await?;
//! let reply = generator.generate_response(
//!     "I'm feeling really anxious about my job interview tomorrow.",
//!     &GenerationOverrides::new().temperature(0.5),
//! )?;
//! println!("{}", reply);
//! # Ok(())
//! # }
//! ```

use std::fmt;

use candle_core::Device;

// Public modules
pub mod config;
pub mod engine;
pub mod evaluation;
pub mod error;
pub mod gpu;
pub mod model;
pub mod prompt;
pub mod publish;
pub mod training;
pub mod utils;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const MIN_RUST_VERSION: &str = "1.75.0";

// Re-exports for public API
pub use config::{BrelloConfig, GenerationConfig, GenerationOverrides, ModelOptions, QuantizationMode};
pub use engine::{load_generator, GeneratorBuilder, GeneratorInfo, ResponseGenerator};
pub use error::{BrelloError, Result};
pub use prompt::{Exchange, PromptTemplate};

/// Feature detection for supported backends
pub struct Features {
    /// Whether a CUDA device can be opened
    pub cuda: bool,
    /// Number of CUDA devices that could be opened
    pub cuda_devices: usize,
    /// Whether a Metal device can be opened
    pub metal: bool,
    /// Whether the CPU kernels were built with AVX
    pub avx: bool,
}

impl Features {
    /// Detect available features at runtime
    pub fn detect() -> Self {
        let cuda_devices = if candle_core::utils::cuda_is_available() {
            (0..8).take_while(|&i| Device::new_cuda(i).is_ok()).count()
        } else {
            0
        };
        let metal = candle_core::utils::metal_is_available() && Device::new_metal(0).is_ok();

        Self {
            cuda: cuda_devices > 0,
            cuda_devices,
            metal,
            avx: candle_core::utils::with_avx(),
        }
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CUDA support: {}", if self.cuda { "yes" } else { "no" })?;
        if self.cuda {
            writeln!(f, "CUDA devices: {}", self.cuda_devices)?;
        }
        writeln!(f, "Metal support: {}", if self.metal { "yes" } else { "no" })?;
        writeln!(f, "AVX: {}", if self.avx { "yes" } else { "no" })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_detection() {
        let features = Features::detect();
        assert_eq!(features.cuda, features.cuda_devices > 0);
        println!("Detected features:\n{}", features);
    }

    #[test]
    fn test_version_numbers() {
        assert!(!VERSION.is_empty());
        assert!(!MIN_RUST_VERSION.is_empty());
    }
}
