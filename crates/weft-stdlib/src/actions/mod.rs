//! Built-in action implementations

pub mod basic;
pub mod command;
pub mod events;
pub mod http;
pub mod jobs;

pub use basic::{LogMessage, NoOp, SetContext};
pub use command::RunCommand;
pub use events::SendEvent;
pub use http::HttpCall;
pub use jobs::{ClaimJob, CompleteJob, FailJob};
