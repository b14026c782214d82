//! Gateway wire protocol: op codes, frames, close codes and compression

mod close_codes;
mod inflate;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::CloseCode;
pub use inflate::{InflateError, Inflater};
pub use messages::GatewayMessage;
pub use opcodes::OpCode;
pub use payloads::{HelloPayload, IdentifyPayload, IdentifyProperties, ResumePayload};
