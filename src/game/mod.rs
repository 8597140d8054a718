//! Game simulation modules

pub mod combat;
pub mod engine;
pub mod math;
pub mod r#match;
pub mod physics;
pub mod scoring;
pub mod setup;
pub mod snapshot;
pub mod state;

pub use r#match::GameMatch;
pub use setup::GameSetup;
