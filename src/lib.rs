//! Era-based history quiz: keyword catalog, LLM-backed question generation,
//! response normalization and the per-chat quiz session.

pub mod catalog;
pub mod config;
pub mod error;
pub mod quiz;
pub mod server;

pub use catalog::KeywordCatalog;
pub use error::GenerateError;
pub use quiz::{AnswerOption, QuizItem};
