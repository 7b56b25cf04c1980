//! Origin inventory, health tracking and retrying request dispatch for a
//! reverse proxy.
//!
//! An [`inventory::OriginsInventory`] tracks the origins of one backend
//! application and their ACTIVE / INACTIVE / DISABLED states. Load-balancing
//! strategies pick among the active ones, and a
//! [`client::BackendServiceClient`] dispatches each request with bounded
//! retries.

pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod healthcheck;
pub mod inventory;
pub mod loadbalancing;
pub mod metrics;
pub mod origin;
pub mod proxy;
pub mod retry;

#[cfg(test)]
mod testing;
