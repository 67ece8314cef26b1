//! Transports for Cadence.
//!
//! Each channel turns a chat platform into a stream of
//! [`InboundMessage`](cadence_core::InboundMessage) envelopes and implements
//! [`Outbound`](cadence_core::Outbound) for replies.
//!
//! - **CLI**: interactive terminal chat (stdin/stdout)
//! - **Telegram**: Bot API long polling

pub mod cli;
pub mod telegram;

pub use cli::CliChannel;
pub use telegram::{TelegramChannel, TelegramConfig};
