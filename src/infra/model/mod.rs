//! Model provider backends.

pub mod openai;

pub use openai::OpenAiClient;
