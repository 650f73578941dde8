//! Wire Protocol
//!
//! Everything needed to turn `(command, args...)` into bytes, and bytes back into replies:
//!
//! - [`encode`] — request framing ([`encode::encode_command`], [`encode::Encodable`]).
//! - [`parser`] — the incremental reply decoder ([`parser::ReplyParser`]).
//! - [`reply`] — the reply value types ([`reply::Reply`], [`reply::Token`]).

pub mod encode;
pub mod parser;
pub mod reply;

pub use encode::{encode_command, Encodable};
pub use parser::{ParsedReply, ReplyParser};
pub use reply::{Reply, Token};
