//! Infrastructure layer - storage backends, providers, sandboxes and the engine

pub mod llm;
pub mod logging;
pub mod observability;
pub mod sandbox;
pub mod services;
pub mod storage;
pub mod tool;
pub mod workflow;
