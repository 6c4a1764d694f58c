use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{JudgeErrorKind, Verdict};
use mq::JUDGE_QUEUE;
use sandbox::{ResourceLimits, SandboxConfig};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DbErr, EntityTrait, QueryFilter, QueryOrder};
use tracing::{error, info, warn};

use crate::context::PipelineContext;
use crate::database::is_retryable;
use crate::entity::{submission, test_case};

const MAX_BACKOFF_SECS: u64 = 30;

/// Run one judge worker: block on the queue and judge submissions forever.
///
/// A transiently failing store requeues the id and backs the loop off with
/// capped exponential sleeps, so a sustained outage does not turn into a
/// tight pop/fail/requeue spin against the connection pool.
pub async fn run(ctx: Arc<PipelineContext>, worker_id: usize) {
    info!(worker_id, "Judge worker started");

    let mut consecutive_failures: u32 = 0;

    loop {
        let mut consumer = match ctx.broker.consumer(JUDGE_QUEUE).await {
            Ok(consumer) => consumer,
            Err(e) => {
                error!(worker_id, error = %e, "Failed to open judge queue consumer");
                tokio::time::sleep(Duration::from_secs(2)).await;
                continue;
            }
        };

        loop {
            let submission_id = match consumer.next().await {
                Ok(id) => id,
                Err(mq::MqError::InvalidPayload(payload)) => {
                    warn!(worker_id, payload = %payload, "Dropping malformed queue payload");
                    continue;
                }
                Err(e) => {
                    error!(worker_id, error = %e, "Judge queue pop failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    break; // reconnect
                }
            };

            match process(&ctx, submission_id).await {
                Ok(()) => consecutive_failures = 0,
                Err(e) => {
                    error!(
                        worker_id,
                        submission_id,
                        error = %e,
                        "Transient store failure, requeueing for redelivery"
                    );
                    requeue(&ctx, submission_id).await;

                    consecutive_failures = consecutive_failures.saturating_add(1);
                    if consecutive_failures >= 3 {
                        let backoff_secs =
                            2_u64.saturating_pow(consecutive_failures - 3).min(MAX_BACKOFF_SECS);
                        warn!(
                            worker_id,
                            consecutive_failures,
                            backoff_secs, "Multiple store failures, backing off"
                        );
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    }
                }
            }
        }
    }
}

/// Judge one submission. Every path through here ends in exactly one
/// verdict write, except when the row itself is gone (the message is
/// dropped) or the store is transiently down (the error propagates so the
/// caller requeues the id and backs off).
async fn process(ctx: &PipelineContext, submission_id: i32) -> Result<(), DbErr> {
    let row = match submission::Entity::find_by_id(submission_id)
        .one(&ctx.db)
        .await
    {
        Ok(Some(row)) => row,
        Ok(None) => {
            warn!(submission_id, "Submission missing from store, dropping");
            return Ok(());
        }
        Err(e) if is_retryable(&e) => return Err(e),
        Err(e) => {
            error!(submission_id, error = %e, "Failed to fetch submission");
            return write_verdict(
                ctx,
                submission_id,
                JudgeErrorKind::SourceNotFound.verdict_string(),
            )
            .await;
        }
    };

    let verdict = match evaluate(ctx, &row).await {
        Ok(verdict) => verdict,
        Err(e) if is_retryable(&e) => return Err(e),
        Err(e) => {
            error!(submission_id, error = %e, "Judging failed internally");
            JudgeErrorKind::Internal.verdict_string().to_owned()
        }
    };

    write_verdict(ctx, submission_id, &verdict).await
}

/// Produce the verdict string for a fetched submission. Internal failures
/// become `Judge Error` verdicts here; only store errors propagate.
async fn evaluate(ctx: &PipelineContext, row: &submission::Model) -> Result<String, DbErr> {
    let test_cases = test_case::Entity::find()
        .filter(test_case::Column::ProblemId.eq(row.problem_id))
        .order_by_asc(test_case::Column::Id)
        .all(&ctx.db)
        .await?;

    if test_cases.is_empty() {
        warn!(submission_id = row.id, problem_id = row.problem_id, "No test cases");
        return Ok(JudgeErrorKind::NoTestCases.verdict_string().to_owned());
    }

    // Unique work directory per evaluation, removed on the way out.
    let workdir = std::env::temp_dir().join(format!("judge-{}-{}", std::process::id(), row.id));
    if let Err(e) = tokio::fs::create_dir_all(&workdir).await {
        error!(submission_id = row.id, error = %e, "Cannot create judge work directory");
        return Ok(JudgeErrorKind::StorageUnavailable.verdict_string().to_owned());
    }

    let verdict = judge_in_workdir(ctx, row, &test_cases, &workdir).await;

    if let Err(e) = tokio::fs::remove_dir_all(&workdir).await {
        warn!(workdir = %workdir.display(), error = %e, "Failed to clean up judge work directory");
    }

    Ok(verdict)
}

async fn judge_in_workdir(
    ctx: &PipelineContext,
    row: &submission::Model,
    test_cases: &[test_case::Model],
    workdir: &Path,
) -> String {
    // The materialized file is the preferred source; the stored row is the
    // fallback when materialization is disabled or the write was lost.
    let source = match materialized_source(ctx, row.id).await {
        Some(source) => source,
        None => row.source_code.clone(),
    };

    let source_path = workdir.join("main.cpp");
    if let Err(e) = tokio::fs::write(&source_path, source.as_bytes()).await {
        error!(submission_id = row.id, error = %e, "Cannot write source into work directory");
        return JudgeErrorKind::StorageUnavailable.verdict_string().to_owned();
    }
    let exe_path = workdir.join("solution");

    // Compile under the looser compiler limits.
    let compile_config = SandboxConfig::new(
        ResourceLimits::compile(),
        Some(ctx.config.judge_user.clone()),
    );
    let compile_result = {
        let source_path = source_path.clone();
        let exe_path = exe_path.clone();
        let workdir = workdir.to_path_buf();
        tokio::task::spawn_blocking(move || {
            sandbox::compile(&compile_config, &source_path, &exe_path, &workdir)
        })
        .await
    };

    match compile_result {
        Ok(Ok(outcome)) if outcome.success => {}
        Ok(Ok(outcome)) => {
            info!(submission_id = row.id, "Compilation failed");
            tracing::debug!(submission_id = row.id, log = %outcome.log, "Compiler output");
            return Verdict::CompilationError.as_str().to_owned();
        }
        Ok(Err(e)) => {
            error!(submission_id = row.id, error = %e, "Compile step failed in sandbox");
            return JudgeErrorKind::Internal.verdict_string().to_owned();
        }
        Err(e) => {
            error!(submission_id = row.id, error = %e, "Compile task failed");
            return JudgeErrorKind::Internal.verdict_string().to_owned();
        }
    }

    // Cases run in id order; the first non-Accepted outcome is the verdict.
    let run_config = SandboxConfig::new(
        ResourceLimits::run(
            ctx.config.judge_time_limit_seconds,
            ctx.config.judge_memory_limit_mb,
        ),
        Some(ctx.config.judge_user.clone()),
    );

    for case in test_cases {
        let report = {
            let run_config = run_config.clone();
            let exe_path = exe_path.clone();
            let workdir = workdir.to_path_buf();
            let input = case.input.clone();
            tokio::task::spawn_blocking(move || {
                sandbox::execute(&run_config, &exe_path, &[], input.as_bytes(), &workdir)
            })
            .await
        };

        let report = match report {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                error!(submission_id = row.id, test_case = case.id, error = %e, "Sandbox execution failed");
                return JudgeErrorKind::Internal.verdict_string().to_owned();
            }
            Err(e) => {
                error!(submission_id = row.id, test_case = case.id, error = %e, "Execution task failed");
                return JudgeErrorKind::Internal.verdict_string().to_owned();
            }
        };

        let verdict = sandbox::classify(&report, &case.expected_output);
        if !verdict.is_accepted() {
            info!(
                submission_id = row.id,
                test_case = case.id,
                verdict = %verdict,
                "Short-circuiting on first failing test case"
            );
            return verdict.as_str().to_owned();
        }
    }

    Verdict::Accepted.as_str().to_owned()
}

async fn materialized_source(ctx: &PipelineContext, submission_id: i32) -> Option<String> {
    let path = ctx.config.source_file_path(submission_id)?;
    tokio::fs::read_to_string(&path).await.ok()
}

/// Write the terminal verdict. Idempotent: redelivery after a crash
/// overwrites with the same function of the same inputs. Transient store
/// errors propagate so the caller can requeue; anything else is final and
/// logged here.
pub async fn write_verdict(
    ctx: &PipelineContext,
    submission_id: i32,
    verdict: &str,
) -> Result<(), DbErr> {
    let result = submission::Entity::update_many()
        .col_expr(submission::Column::Verdict, Expr::value(verdict))
        .filter(submission::Column::Id.eq(submission_id))
        .exec(&ctx.db)
        .await;

    match result {
        Ok(_) => {
            info!(submission_id, verdict, "Verdict written");
            Ok(())
        }
        Err(e) if is_retryable(&e) => Err(e),
        Err(e) => {
            error!(submission_id, error = %e, "Failed to write verdict");
            Ok(())
        }
    }
}

async fn requeue(ctx: &PipelineContext, submission_id: i32) {
    if let Err(e) = ctx.broker.requeue(JUDGE_QUEUE, submission_id).await {
        error!(submission_id, error = %e, "Failed to requeue submission");
    }
}
