//! Embedding generation.
//!
//! [`EmbeddingProvider`] is one remote (or local) model; [`EmbeddingClient`]
//! wraps a provider with batching, deadlines, retries and usage counters.

pub mod client;
pub mod provider;
pub mod providers;

pub use client::{EmbeddingClient, EmbeddingStats, RetryPolicy};
pub use provider::{create_provider, EmbeddingProvider};
