use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Verdict assigned to a submission.
///
/// The string forms are the wire format stored in the `verdict` column, so
/// they keep their spaces (`Wrong Answer`, not `WrongAnswer`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    /// Waiting to be picked up by the judge worker.
    #[serde(rename = "Pending")]
    Pending,
    /// All test cases passed.
    #[serde(rename = "Accepted")]
    Accepted,
    /// Output did not match expected output.
    #[serde(rename = "Wrong Answer")]
    WrongAnswer,
    /// Exceeded the CPU time limit.
    #[serde(rename = "Time Limit Exceeded")]
    TimeLimitExceeded,
    /// Exceeded the address-space limit.
    #[serde(rename = "Memory Limit Exceeded")]
    MemoryLimitExceeded,
    /// Program crashed, was signalled, or exited non-zero.
    #[serde(rename = "Runtime Error")]
    RuntimeError,
    /// Failed to compile.
    #[serde(rename = "Compilation Error")]
    CompilationError,
    /// Internal judge failure. Catch-all so Pending never leaks.
    #[serde(rename = "Judge Error")]
    JudgeError,
}

impl Verdict {
    /// Returns true if judging is complete.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// All possible verdict values.
    pub const ALL: &'static [Verdict] = &[
        Self::Pending,
        Self::Accepted,
        Self::WrongAnswer,
        Self::TimeLimitExceeded,
        Self::MemoryLimitExceeded,
        Self::RuntimeError,
        Self::CompilationError,
        Self::JudgeError,
    ];

    /// All terminal verdict values.
    pub const TERMINAL: &'static [Verdict] = &[
        Self::Accepted,
        Self::WrongAnswer,
        Self::TimeLimitExceeded,
        Self::MemoryLimitExceeded,
        Self::RuntimeError,
        Self::CompilationError,
        Self::JudgeError,
    ];

    /// Returns the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Accepted => "Accepted",
            Self::WrongAnswer => "Wrong Answer",
            Self::TimeLimitExceeded => "Time Limit Exceeded",
            Self::MemoryLimitExceeded => "Memory Limit Exceeded",
            Self::RuntimeError => "Runtime Error",
            Self::CompilationError => "Compilation Error",
            Self::JudgeError => "Judge Error",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Verdict {
    fn default() -> Self {
        Self::Pending
    }
}

/// Error when parsing an invalid verdict string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseVerdictError {
    invalid: String,
}

impl fmt::Display for ParseVerdictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid verdict '{}'. Valid values: {}",
            self.invalid,
            Verdict::ALL
                .iter()
                .map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl std::error::Error for ParseVerdictError {}

impl FromStr for Verdict {
    type Err = ParseVerdictError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Accepted" => Ok(Self::Accepted),
            "Wrong Answer" => Ok(Self::WrongAnswer),
            "Time Limit Exceeded" => Ok(Self::TimeLimitExceeded),
            "Memory Limit Exceeded" => Ok(Self::MemoryLimitExceeded),
            "Runtime Error" => Ok(Self::RuntimeError),
            "Compilation Error" => Ok(Self::CompilationError),
            // Judge errors carry a reason suffix ("Judge Error: No test cases").
            s if s.starts_with("Judge Error") => Ok(Self::JudgeError),
            _ => Err(ParseVerdictError {
                invalid: s.to_string(),
            }),
        }
    }
}

/// Reason a judging pass failed internally. Each maps to the `Judge Error`
/// verdict with a reason suffix in the stored string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JudgeErrorKind {
    /// Submission row or materialized source could not be read.
    SourceNotFound,
    /// The problem has no test cases.
    NoTestCases,
    /// The judging work directory could not be created.
    StorageUnavailable,
    /// Anything else: fork failure, compiler missing, pipe breakage.
    Internal,
}

impl JudgeErrorKind {
    /// The string written to the `verdict` column.
    pub fn verdict_string(&self) -> &'static str {
        match self {
            Self::SourceNotFound => "Judge Error: Source not found",
            Self::NoTestCases => "Judge Error: No test cases",
            Self::StorageUnavailable => "Judge Error: Storage unavailable",
            Self::Internal => "Judge Error",
        }
    }
}

impl fmt::Display for JudgeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verdict_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_roundtrip() {
        for verdict in Verdict::ALL {
            let json = serde_json::to_string(verdict).unwrap();
            let parsed: Verdict = serde_json::from_str(&json).unwrap();
            assert_eq!(*verdict, parsed);
        }
    }

    #[test]
    fn test_wire_roundtrip() {
        for verdict in Verdict::ALL {
            assert_eq!(verdict.as_str().parse::<Verdict>().unwrap(), *verdict);
        }
    }

    #[test]
    fn test_from_str() {
        assert_eq!(
            "Wrong Answer".parse::<Verdict>().unwrap(),
            Verdict::WrongAnswer
        );
        assert!("WrongAnswer".parse::<Verdict>().is_err());
        assert!("Invalid".parse::<Verdict>().is_err());
    }

    #[test]
    fn test_judge_error_prefix_parses() {
        for kind in [
            JudgeErrorKind::SourceNotFound,
            JudgeErrorKind::NoTestCases,
            JudgeErrorKind::StorageUnavailable,
            JudgeErrorKind::Internal,
        ] {
            assert_eq!(
                kind.verdict_string().parse::<Verdict>().unwrap(),
                Verdict::JudgeError
            );
        }
    }

    #[test]
    fn test_terminality() {
        assert!(!Verdict::Pending.is_terminal());
        for verdict in Verdict::TERMINAL {
            assert!(verdict.is_terminal());
        }
    }
}
