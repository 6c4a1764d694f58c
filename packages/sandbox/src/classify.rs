use common::Verdict;

use crate::ExecutionReport;

/// How the child left the sandbox, as reported by the wait status.
///
/// Kept separate from the raw wait status so classification stays a pure
/// function over injectable values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitDisposition {
    /// Exited normally with the given code.
    Exited(i32),
    /// Killed by the given signal number.
    Signaled(i32),
}

impl ExecutionReport {
    /// Build a report from an exit disposition and the captured streams.
    ///
    /// `wall_clock_killed` marks a child the parent had to SIGKILL after the
    /// dead-man deadline; it is reported as a timeout since the CPU-time
    /// signal can never fire for a child blocked on I/O.
    pub fn from_outcome(
        disposition: ExitDisposition,
        stdout: String,
        stderr: String,
        wall_clock_killed: bool,
    ) -> Self {
        let mut report = ExecutionReport {
            stdout,
            stderr,
            timed_out: wall_clock_killed,
            ..Default::default()
        };

        match disposition {
            ExitDisposition::Exited(code) => {
                report.exit_code = Some(code);
            }
            ExitDisposition::Signaled(signal) => {
                report.signal_killed = true;
                report.signal = Some(signal);
                if signal == libc::SIGXCPU {
                    report.timed_out = true;
                }
            }
        }

        // RLIMIT_AS rejection surfaces as a failed allocation inside the
        // child, not as a dedicated wait status. A C++ program reports it on
        // stderr before aborting; anything else stays a Runtime Error.
        let failed = report.exit_code != Some(0);
        if failed && (report.stderr.contains("bad_alloc") || report.stderr.contains("out of memory"))
        {
            report.memory_exceeded = true;
        }

        report
    }
}

/// Map an execution report to a verdict for one test case.
///
/// Precedence: timeout, then memory, then any abnormal exit, then output
/// comparison.
pub fn classify(report: &ExecutionReport, expected_output: &str) -> Verdict {
    if report.timed_out {
        return Verdict::TimeLimitExceeded;
    }
    if report.memory_exceeded {
        return Verdict::MemoryLimitExceeded;
    }
    if report.signal_killed || report.exit_code != Some(0) {
        return Verdict::RuntimeError;
    }
    if output_matches(&report.stdout, expected_output) {
        Verdict::Accepted
    } else {
        Verdict::WrongAnswer
    }
}

/// Compare program output against the expected output.
///
/// Only trailing whitespace is stripped from the right of both strings;
/// leading and interior whitespace stays significant.
pub fn output_matches(actual: &str, expected: &str) -> bool {
    actual.trim_end_matches([' ', '\t', '\r', '\n'])
        == expected.trim_end_matches([' ', '\t', '\r', '\n'])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(disposition: ExitDisposition, stdout: &str, stderr: &str) -> ExecutionReport {
        ExecutionReport::from_outcome(disposition, stdout.to_string(), stderr.to_string(), false)
    }

    #[test]
    fn test_sigxcpu_is_time_limit_exceeded() {
        let r = report(ExitDisposition::Signaled(libc::SIGXCPU), "", "");
        assert!(r.timed_out);
        assert_eq!(classify(&r, "anything"), Verdict::TimeLimitExceeded);
    }

    #[test]
    fn test_wall_clock_kill_is_time_limit_exceeded() {
        let r = ExecutionReport::from_outcome(
            ExitDisposition::Signaled(libc::SIGKILL),
            String::new(),
            String::new(),
            true,
        );
        assert_eq!(classify(&r, ""), Verdict::TimeLimitExceeded);
    }

    #[test]
    fn test_bad_alloc_is_memory_limit_exceeded() {
        let r = report(
            ExitDisposition::Signaled(libc::SIGABRT),
            "",
            "terminate called after throwing an instance of 'std::bad_alloc'",
        );
        assert!(r.memory_exceeded);
        assert_eq!(classify(&r, ""), Verdict::MemoryLimitExceeded);
    }

    #[test]
    fn test_bad_alloc_in_stdout_of_successful_run_is_not_memory() {
        let r = report(ExitDisposition::Exited(0), "bad_alloc\n", "");
        assert!(!r.memory_exceeded);
    }

    #[test]
    fn test_nonzero_exit_is_runtime_error() {
        let r = report(ExitDisposition::Exited(1), "15\n", "");
        assert_eq!(classify(&r, "15\n"), Verdict::RuntimeError);
    }

    #[test]
    fn test_segfault_is_runtime_error() {
        let r = report(ExitDisposition::Signaled(libc::SIGSEGV), "", "");
        assert!(r.signal_killed);
        assert_eq!(r.signal, Some(libc::SIGSEGV));
        assert_eq!(classify(&r, ""), Verdict::RuntimeError);
    }

    #[test]
    fn test_exec_sentinel_is_runtime_error() {
        let r = report(ExitDisposition::Exited(127), "", "");
        assert_eq!(classify(&r, ""), Verdict::RuntimeError);
    }

    #[test]
    fn test_matching_output_is_accepted() {
        let r = report(ExitDisposition::Exited(0), "15\n", "");
        assert_eq!(classify(&r, "15\n"), Verdict::Accepted);
    }

    #[test]
    fn test_extra_trailing_whitespace_is_accepted() {
        let r = report(ExitDisposition::Exited(0), "15 \t\r\n\n", "");
        assert_eq!(classify(&r, "15\n"), Verdict::Accepted);
    }

    #[test]
    fn test_leading_whitespace_is_wrong_answer() {
        let r = report(ExitDisposition::Exited(0), " 15\n", "");
        assert_eq!(classify(&r, "15\n"), Verdict::WrongAnswer);
    }

    #[test]
    fn test_mismatch_is_wrong_answer() {
        let r = report(ExitDisposition::Exited(0), "14\n", "");
        assert_eq!(classify(&r, "15\n"), Verdict::WrongAnswer);
    }

    #[test]
    fn test_output_matches_both_sides_normalized() {
        assert!(output_matches("15", "15\n"));
        assert!(output_matches("15\n", "15"));
        assert!(!output_matches("1 5", "15"));
    }
}
