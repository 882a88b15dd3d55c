//! Orchestration core.
//!
//! This module contains:
//! - Validator: the uniform validate/reflect/escalate gate
//! - Sequencer: workflow start/await, fan-out/fan-in, fatal absorption
//! - Runtime: assembly (dependency injection) and the public run API

pub mod runtime;
pub mod sequencer;
pub mod validator;

pub use runtime::{Collaborators, RunError, Runtime};
pub use sequencer::{RunOutcome, Sequencer};
pub use validator::Validator;
