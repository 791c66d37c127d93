//! Steam store metadata client.
//!
//! Resolves an app id to its name, type, and known depot and DLC ids
//! through the store `appdetails` endpoint, retrying transient failures
//! with exponential backoff.

pub mod client;
pub mod types;

pub use client::{SteamClient, SteamConfig};
