//! Episode creation pipeline: title derivation, remote job submission and
//! initial poll scheduling.

mod pipeline;
mod title;

pub use pipeline::{CreateError, EpisodeCreator};
pub use title::derive_title;
