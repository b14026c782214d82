//! # chat-dispatch
//!
//! Bucketed dispatch queue. Every outbound unary call and gateway frame goes
//! through [`DispatchQueue::enqueue`], which serializes requests per quota
//! bucket and applies reactive or preemptive rate limiting.

mod bucket;
mod error;
mod gate;
pub mod headers;
mod queue;

pub use bucket::{Bucket, Method, RouteKey};
pub use error::DispatchError;
pub use gate::{BucketGate, GateMode};
pub use headers::RateLimitInfo;
pub use queue::{
    DispatchOutcome, DispatchQueue, Dispatchable, EnqueueOptions, QueueConfig, RateLimitNotice,
};
