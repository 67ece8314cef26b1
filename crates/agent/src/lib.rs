//! The exchange engine of Cadence.
//!
//! One inbound message goes through one cycle:
//!
//! 1. **Gate**: skip or accept, and pick a role-aware delay
//! 2. **Assemble** context from history, the chronicle, the library and
//!    today's chapter
//! 3. **Invoke** the backend pair, running tools as requested
//! 4. **Wait** out the delay unless a newer message supersedes the send
//! 5. **Fire**: send, chronicle, journal, and maybe schedule a follow-up

pub mod calendar;
pub mod commands;
pub mod context;
pub mod gate;
pub mod invoker;
pub mod links;
pub mod orchestrator;
pub mod persona;
pub mod rate_limit;
pub mod scheduler;
pub mod split;
pub mod threads;
pub mod voice;

pub use calendar::{Artifact, CalendarError, DailyArtifactScheduler, monthly_assignment};
pub use commands::{Command, parse_command};
pub use context::{AssemblyMetadata, ContextAssembler, ContextBundle, PromptContext};
pub use gate::{
    ActorRole, DefaultStrategy, GateDecision, IntakeGate, PrivilegedStrategy, ReplyStrategy,
    RoleLookup,
};
pub use invoker::{InvokeError, Invocation, ModelInvoker};
pub use links::{CachedExcerptFetcher, ExcerptFetcher, HttpExcerptFetcher, LinkExcerpt};
pub use orchestrator::{Disposition, ExchangeOutcome, ExchangeSettings, Orchestrator};
pub use persona::Persona;
pub use rate_limit::RateLimiter;
pub use scheduler::{DelayScheduler, PendingSend};
pub use split::split_message;
pub use threads::{ThreadState, ThreadStore};
pub use voice::VoiceModes;
