pub mod engine;
pub mod levels;

pub use engine::GridEngine;
pub use levels::{GridLevel, LevelState};
