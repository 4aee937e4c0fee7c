//! The two engines the agent routes work to.
//!
//! - [`task::TaskEngine`] owns the code conversation and turns replies into file edits.
//! - [`chat::ChatEngine`] handles operator chat, news, and reflection.

pub mod chat;
pub mod task;

pub use chat::ChatEngine;
pub use task::{CodeEdit, Generation, TaskContext, TaskEngine};
