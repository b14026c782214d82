//! Error classification shared by the client crates

mod category;

pub use category::{Categorize, ErrorCategory};
