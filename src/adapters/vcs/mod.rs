//! Version control adapters.

pub mod git;
pub mod mock;

pub use git::GitVcs;
pub use mock::{MockCommit, MockVcs};
