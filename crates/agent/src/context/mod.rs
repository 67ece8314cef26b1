//! Context assembly.
//!
//! Gathers everything the model should see for one exchange and renders it
//! into labelled sections under a token budget.
//!
//! | Section | Source | Trim strategy |
//! |---------|--------|---------------|
//! | `[Today's chapter]` | Daily artifact | Truncated to half the budget |
//! | `[Reference]` | Full-text index hits | Lowest-ranked dropped |
//! | `[Reply window]` | Chronicle events around the anchor | Oldest dropped |
//! | `[Around the replied message]` | Message history around the anchor | Oldest dropped |
//! | `[Link excerpts]` | Pre-fetched link excerpts | Last dropped |
//! | history | Thread's recent turns | Oldest turns dropped |

pub mod assembler;
pub mod token;

pub use assembler::{
    AssemblyMetadata, ContextAssembler, ContextBundle, DropInfo, LayerStats, PromptContext,
};
