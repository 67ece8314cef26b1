//! Model backend implementations for Cadence.
//!
//! All providers implement the `cadence_core::Provider` trait. The
//! [`BackendPair`] puts a primary and an optional secondary behind per-call
//! timeouts and falls back between them.

pub mod fallback;
pub mod openai_compat;
pub mod router;

pub use fallback::{Backend, BackendPair, Completion, Route};
pub use openai_compat::OpenAiCompatProvider;
pub use router::{backend_from_config, build_from_config, search_backend};
