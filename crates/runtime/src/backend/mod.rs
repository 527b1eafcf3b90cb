//! Model backend adapters.
//!
//! Each adapter implements [`Backend`](crate::llm::Backend) for one API.

mod openai;

pub use openai::{DEFAULT_BASE_URL, OpenAiBackend, OpenAiBackendBuilder};
