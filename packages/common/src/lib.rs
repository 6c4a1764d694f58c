pub mod retry;
pub mod verdict;

pub use verdict::{JudgeErrorKind, Verdict};
