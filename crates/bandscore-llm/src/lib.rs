//! Bandscore LLM delegates
//!
//! HTTP implementations of the engine's `TextGenerator` and `ImageToText`
//! traits over the chat-completions API. Models named `gpt-*` go to OpenAI,
//! `gemini-*` to Gemini's OpenAI-compatible endpoint.

pub mod client;
pub mod provider;

pub use client::{ChatCompletionsClient, HttpClientConfig};
pub use provider::{check_models, Credentials, Provider};
