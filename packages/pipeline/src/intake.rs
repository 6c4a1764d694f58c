use std::path::PathBuf;

use chrono::Utc;
use common::Verdict;
use common::retry::calculate_backoff;
use futures::FutureExt;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, DbErr, EntityTrait, IsolationLevel, TransactionTrait};
use thiserror::Error;
use tracing::{info, warn};

use crate::context::PipelineContext;
use crate::database::is_retryable;
use crate::entity::submission;
use crate::saga::Saga;

/// Attempts for the serializable insert before surfacing the error.
const INSERT_ATTEMPTS: u8 = 5;
const INSERT_BACKOFF_BASE_MS: u64 = 50;
const INSERT_BACKOFF_MAX_MS: u64 = 1600;

#[derive(Debug, Error)]
pub enum IntakeError {
    /// Malformed request; nothing was persisted.
    #[error("source code must not be empty")]
    EmptySource,

    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error("queue error: {0}")]
    Queue(#[from] mq::MqError),
}

struct IntakeState<'a> {
    ctx: &'a PipelineContext,
    problem_id: i32,
    source_code: &'a str,
    submission_id: Option<i32>,
    stored_file: Option<PathBuf>,
}

/// Accept a submission: persist it, optionally materialize the source on
/// disk, and put its id on both work queues in one atomic round trip.
///
/// Either every step completes and the caller gets the new id, or the
/// completed steps are compensated in reverse and no observable state
/// change remains.
pub async fn submit(
    ctx: &PipelineContext,
    problem_id: i32,
    source_code: &str,
) -> Result<i32, IntakeError> {
    if source_code.trim().is_empty() {
        return Err(IntakeError::EmptySource);
    }

    let mut state = IntakeState {
        ctx,
        problem_id,
        source_code,
        submission_id: None,
        stored_file: None,
    };

    let saga: Saga<IntakeState<'_>, IntakeError> = Saga::new()
        .step(
            "database_insert",
            Box::new(|state| insert_submission(state).boxed()),
            Box::new(|state| delete_submission(state).boxed()),
        )
        .step(
            "file_storage",
            Box::new(|state| store_source(state).boxed()),
            Box::new(|state| remove_source(state).boxed()),
        )
        .step(
            "queue_operations",
            Box::new(|state| enqueue(state).boxed()),
            Box::new(|state| dequeue(state).boxed()),
        );

    saga.run(&mut state).await?;

    match state.submission_id {
        Some(id) => {
            info!(submission_id = id, problem_id, "Submission accepted");
            Ok(id)
        }
        None => Err(IntakeError::Database(DbErr::Custom(
            "intake succeeded without a submission id".into(),
        ))),
    }
}

/// Serializable insert with retry on serialization failure or deadlock.
async fn insert_submission(state: &mut IntakeState<'_>) -> Result<(), IntakeError> {
    let mut attempt: u8 = 0;
    loop {
        match try_insert(state.ctx, state.problem_id, state.source_code).await {
            Ok(id) => {
                state.submission_id = Some(id);
                return Ok(());
            }
            Err(err) if is_retryable(&err) && attempt + 1 < INSERT_ATTEMPTS => {
                attempt += 1;
                let delay =
                    calculate_backoff(attempt, INSERT_BACKOFF_BASE_MS, INSERT_BACKOFF_MAX_MS);
                warn!(attempt, error = %err, "Transient insert failure, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

async fn try_insert(
    ctx: &PipelineContext,
    problem_id: i32,
    source_code: &str,
) -> Result<i32, DbErr> {
    let txn = ctx
        .db
        .begin_with_config(Some(IsolationLevel::Serializable), None)
        .await?;

    let model = submission::ActiveModel {
        problem_id: Set(problem_id),
        source_code: Set(source_code.to_owned()),
        verdict: Set(Verdict::Pending.as_str().to_owned()),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;
    Ok(model.id)
}

async fn delete_submission(state: &mut IntakeState<'_>) -> Result<(), IntakeError> {
    let Some(id) = state.submission_id else {
        return Ok(());
    };
    submission::Entity::delete_by_id(id)
        .exec(&state.ctx.db)
        .await?;
    Ok(())
}

/// Materialize the source under the storage path. Best effort: a
/// write-protected volume must not fail the intake, so errors degrade to
/// warnings and the judge worker falls back to the stored row.
async fn store_source(state: &mut IntakeState<'_>) -> Result<(), IntakeError> {
    let Some(id) = state.submission_id else {
        return Ok(());
    };
    let Some(path) = state.ctx.config.source_file_path(id) else {
        return Ok(());
    };

    if let Some(parent) = path.parent()
        && let Err(e) = tokio::fs::create_dir_all(parent).await
    {
        warn!(path = %path.display(), error = %e, "Failed to create submission storage directory");
        return Ok(());
    }

    match tokio::fs::write(&path, state.source_code.as_bytes()).await {
        Ok(()) => state.stored_file = Some(path),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to materialize submission source")
        }
    }

    Ok(())
}

async fn remove_source(state: &mut IntakeState<'_>) -> Result<(), IntakeError> {
    if let Some(path) = state.stored_file.take() {
        let _ = tokio::fs::remove_file(&path).await;
    }
    Ok(())
}

async fn enqueue(state: &mut IntakeState<'_>) -> Result<(), IntakeError> {
    let Some(id) = state.submission_id else {
        return Ok(());
    };
    state.ctx.broker.enqueue_submission(id).await?;
    Ok(())
}

async fn dequeue(state: &mut IntakeState<'_>) -> Result<(), IntakeError> {
    if let Some(id) = state.submission_id {
        state.ctx.broker.remove_submission(id).await?;
    }
    Ok(())
}
