//! GitHub REST plumbing used by the GitHub repository host.

pub mod http;
pub mod types;
