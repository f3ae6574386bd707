pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod guillotine;
pub mod merger;
pub mod nester;
pub mod oracle;
pub mod orchestrator;
pub mod registry;
pub mod render;
pub mod runner;
pub mod search;
pub mod splitter;
pub mod store;
pub mod svg;
pub mod types;

pub use engine::{Engine, Job};
pub use error::{Error, Result};
pub use runner::JobRunner;
pub use types::Outcome;
