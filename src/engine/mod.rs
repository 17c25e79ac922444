//! Response generator: the main interface of the crate

mod builder;
mod generator;

pub use builder::GeneratorBuilder;
pub use generator::{load_generator, GeneratorInfo, ResponseGenerator};
