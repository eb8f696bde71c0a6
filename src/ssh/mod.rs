// ABOUTME: SSH transport for executing deployment commands on remote hosts.
// ABOUTME: Exposes session management built on russh.

mod client;
mod error;

pub use client::{Session, SessionConfig};
pub use error::{Error, Result};
