//! ARM Debug Access Port link layer

pub mod regs;
mod target;

pub use target::{DebugTarget, WORD_SIZE};
