//! Fine-tuning on the built-in emotional-intelligence dialogues
//!
//! [`Trainer::prepare`] fetches a base model into trainable variables and
//! [`Trainer::train`] runs AdamW over the ten fixed dialogues, writing
//! rotating checkpoints and a final model directory that
//! [`HubResolver`](crate::model::HubResolver) can load back.

mod dataset;
mod trainer;

pub use dataset::{
    build_dataset, encode_example, training_dialogues, training_template, TrainingExample, TRAINING_PERSONA,
};
pub use trainer::{rotate_checkpoints, Trainer, TrainingConfig, TrainingReport};
