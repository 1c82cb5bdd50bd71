//! Core agent orchestration for kiln.
//!
//! Drives a multi-turn conversation between a user, a streaming language
//! model, and a set of executable tools. The model transport, the tool
//! implementations, and the terminal surface are external collaborators;
//! this crate owns the loop, the policies, and the message history.

pub mod config;
pub mod core;
pub mod logging;
pub mod providers;
pub mod tools;
