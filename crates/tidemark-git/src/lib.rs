//! Git-backed source control queries for tidemark.

mod oracle;

pub use oracle::{GitError, GitOracle};
