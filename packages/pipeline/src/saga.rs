use futures::future::BoxFuture;
use tracing::{error, warn};

/// One action of a saga step, borrowing the shared state for the duration
/// of its future.
pub type StepFn<C, E> = Box<dyn for<'a> FnMut(&'a mut C) -> BoxFuture<'a, Result<(), E>> + Send>;

struct Step<C, E> {
    name: &'static str,
    execute: StepFn<C, E>,
    compensate: StepFn<C, E>,
}

/// An ordered list of `(execute, compensate)` pairs.
///
/// Local saga, not a two-phase commit: `run` executes the steps in order
/// and, on the first failure, compensates the already-completed steps in
/// reverse. Compensation failures are logged and never propagated; the
/// caller always sees the original error.
pub struct Saga<C, E> {
    steps: Vec<Step<C, E>>,
}

impl<C, E: std::fmt::Display> Saga<C, E> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn step(
        mut self,
        name: &'static str,
        execute: StepFn<C, E>,
        compensate: StepFn<C, E>,
    ) -> Self {
        self.steps.push(Step {
            name,
            execute,
            compensate,
        });
        self
    }

    pub async fn run(mut self, state: &mut C) -> Result<(), E> {
        for index in 0..self.steps.len() {
            if let Err(err) = (self.steps[index].execute)(state).await {
                warn!(step = self.steps[index].name, error = %err, "Saga step failed, compensating");

                for completed in self.steps[..index].iter_mut().rev() {
                    if let Err(comp_err) = (completed.compensate)(state).await {
                        error!(step = completed.name, error = %comp_err, "Saga compensation failed");
                    }
                }

                return Err(err);
            }
        }

        Ok(())
    }
}

impl<C, E: std::fmt::Display> Default for Saga<C, E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    type Log = Vec<String>;

    fn ok_step(tag: &'static str) -> StepFn<Log, String> {
        Box::new(move |log: &mut Log| {
            async move {
                log.push(format!("exec:{tag}"));
                Ok(())
            }
            .boxed()
        })
    }

    fn failing_step(tag: &'static str) -> StepFn<Log, String> {
        Box::new(move |log: &mut Log| {
            async move {
                log.push(format!("exec:{tag}"));
                Err(format!("{tag} failed"))
            }
            .boxed()
        })
    }

    fn compensation(tag: &'static str) -> StepFn<Log, String> {
        Box::new(move |log: &mut Log| {
            async move {
                log.push(format!("comp:{tag}"));
                Ok(())
            }
            .boxed()
        })
    }

    fn failing_compensation(tag: &'static str) -> StepFn<Log, String> {
        Box::new(move |log: &mut Log| {
            async move {
                log.push(format!("comp:{tag}"));
                Err(format!("{tag} compensation failed"))
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_all_steps_execute_in_order() {
        let mut log = Log::new();
        let saga: Saga<Log, String> = Saga::new()
            .step("a", ok_step("a"), compensation("a"))
            .step("b", ok_step("b"), compensation("b"));

        saga.run(&mut log).await.unwrap();
        assert_eq!(log, vec!["exec:a", "exec:b"]);
    }

    #[tokio::test]
    async fn test_failure_compensates_completed_steps_in_reverse() {
        let mut log = Log::new();
        let saga: Saga<Log, String> = Saga::new()
            .step("a", ok_step("a"), compensation("a"))
            .step("b", ok_step("b"), compensation("b"))
            .step("c", failing_step("c"), compensation("c"));

        let err = saga.run(&mut log).await.unwrap_err();
        assert_eq!(err, "c failed");
        // c's own compensation never runs; b then a are unwound.
        assert_eq!(
            log,
            vec!["exec:a", "exec:b", "exec:c", "comp:b", "comp:a"]
        );
    }

    #[tokio::test]
    async fn test_first_step_failure_compensates_nothing() {
        let mut log = Log::new();
        let saga: Saga<Log, String> = Saga::new()
            .step("a", failing_step("a"), compensation("a"))
            .step("b", ok_step("b"), compensation("b"));

        assert!(saga.run(&mut log).await.is_err());
        assert_eq!(log, vec!["exec:a"]);
    }

    #[tokio::test]
    async fn test_compensation_failure_does_not_mask_original_error() {
        let mut log = Log::new();
        let saga: Saga<Log, String> = Saga::new()
            .step("a", ok_step("a"), failing_compensation("a"))
            .step("b", failing_step("b"), compensation("b"));

        let err = saga.run(&mut log).await.unwrap_err();
        assert_eq!(err, "b failed");
        assert_eq!(log, vec!["exec:a", "exec:b", "comp:a"]);
    }

    #[tokio::test]
    async fn test_empty_saga_succeeds() {
        let mut log = Log::new();
        let saga: Saga<Log, String> = Saga::new();
        assert!(saga.run(&mut log).await.is_ok());
        assert!(log.is_empty());
    }
}
