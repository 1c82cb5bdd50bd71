//! Core agent orchestration: the loop and its policies.

pub mod agent;
pub mod context;
pub mod events;
pub mod interrupt;
pub mod permissions;
pub mod plan;
pub mod session;
