//! Agent-side actors

pub mod client;

pub use client::{AgentClient, ClientEvent};
