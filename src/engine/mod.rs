pub mod bands;
pub mod error;
pub mod index;
pub mod scoring;

pub use error::EngineError;
pub use index::{ItemIndex, Location, OutcomeLookup};
pub use scoring::{Improvement, Score};
