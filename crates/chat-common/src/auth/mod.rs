//! Bot authentication

mod token;

pub use token::{Credentials, TokenKind};
