//! HTTP networking module
//!
//! Provides the HTTP client used by provider adapters and the overlay
//! network reachability check consulted before dispatch.

mod client;
mod reachability;
mod user_agent;

pub use client::{HttpClient, HttpResponse};
pub use reachability::{OverlayNetwork, ProxyReachability, ReachabilityCheck, StaticReachability};
pub use user_agent::generate_user_agent;
