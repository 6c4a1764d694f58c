use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mq::PLAGIARISM_QUEUE;
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DbErr, EntityTrait, QueryFilter};
use similarity::{CANDIDATE_LIMIT, Fingerprint, LshIndex, SimilarityScores, score_pair};
use tracing::{error, info, warn};

use crate::context::PipelineContext;
use crate::entity::{plagiarism_report, submission};

const MAX_BACKOFF_SECS: u64 = 30;

/// Run the plagiarism worker: block on the queue and analyze submissions
/// forever. One worker is sufficient; the per-problem indexes are guarded
/// by the context lock regardless. Repeated store failures back the loop
/// off with capped exponential sleeps instead of spinning on the queue.
pub async fn run(ctx: Arc<PipelineContext>) {
    info!("Plagiarism worker started");

    let mut consecutive_failures: u32 = 0;

    loop {
        let mut consumer = match ctx.broker.consumer(PLAGIARISM_QUEUE).await {
            Ok(consumer) => consumer,
            Err(e) => {
                error!(error = %e, "Failed to open plagiarism queue consumer");
                tokio::time::sleep(Duration::from_secs(2)).await;
                continue;
            }
        };

        loop {
            let submission_id = match consumer.next().await {
                Ok(id) => id,
                Err(mq::MqError::InvalidPayload(payload)) => {
                    warn!(payload = %payload, "Dropping malformed queue payload");
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Plagiarism queue pop failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    break; // reconnect
                }
            };

            // A failed analysis drops the message; the index and reports
            // heal on the next submission for the same problem.
            match process(&ctx, submission_id).await {
                Ok(()) => consecutive_failures = 0,
                Err(e) => {
                    error!(submission_id, error = %e, "Plagiarism analysis failed");

                    consecutive_failures = consecutive_failures.saturating_add(1);
                    if consecutive_failures >= 3 {
                        let backoff_secs =
                            2_u64.saturating_pow(consecutive_failures - 3).min(MAX_BACKOFF_SECS);
                        warn!(
                            consecutive_failures,
                            backoff_secs, "Multiple analysis failures, backing off"
                        );
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    }
                }
            }
        }
    }
}

/// Analyze one submission: fingerprint it, index it, retrieve candidates
/// and record every pair whose blended similarity clears the threshold.
pub async fn process(ctx: &PipelineContext, submission_id: i32) -> Result<(), DbErr> {
    let Some(row) = submission::Entity::find_by_id(submission_id)
        .one(&ctx.db)
        .await?
    else {
        warn!(submission_id, "Submission missing from store, dropping");
        return Ok(());
    };

    let fingerprint = fingerprint_for(ctx, submission_id, &row.source_code).await;

    let candidates = {
        let mut indexes = ctx.indexes.lock().await;
        if !indexes.contains_key(&row.problem_id) {
            let index = build_index(ctx, row.problem_id, submission_id).await?;
            indexes.insert(row.problem_id, index);
        }
        // Just inserted above when absent.
        let Some(index) = indexes.get_mut(&row.problem_id) else {
            return Ok(());
        };
        index.add(submission_id, &fingerprint);
        index.candidates(&fingerprint, CANDIDATE_LIMIT)
    };

    for candidate_id in candidates {
        if candidate_id == submission_id {
            continue;
        }

        let candidate_fp = match candidate_fingerprint(ctx, candidate_id).await {
            Ok(Some(fp)) => fp,
            Ok(None) => continue,
            Err(e) => {
                warn!(submission_id, candidate_id, error = %e, "Skipping candidate after store error");
                continue;
            }
        };

        let scores = score_pair(&fingerprint, &candidate_fp);
        if scores.blended < ctx.config.plagiarism_threshold {
            continue;
        }

        info!(
            submission_id,
            candidate_id,
            similarity = scores.blended,
            "High structural similarity"
        );

        if let Err(e) = upsert_report(ctx, submission_id, candidate_id, &scores).await {
            warn!(submission_id, candidate_id, error = %e, "Failed to record plagiarism report");
        }
    }

    Ok(())
}

/// Fingerprint from the cache, or compute from the given source and cache.
async fn fingerprint_for(
    ctx: &PipelineContext,
    submission_id: i32,
    source_code: &str,
) -> Arc<Fingerprint> {
    if let Some(fingerprint) = ctx.fingerprints.get(submission_id).await {
        return fingerprint;
    }
    let fingerprint = similarity::fingerprint(source_code);
    ctx.fingerprints.insert(submission_id, fingerprint).await
}

/// Candidate fingerprint from the cache, refetching the source on a miss.
async fn candidate_fingerprint(
    ctx: &PipelineContext,
    candidate_id: i32,
) -> Result<Option<Arc<Fingerprint>>, DbErr> {
    if let Some(fingerprint) = ctx.fingerprints.get(candidate_id).await {
        return Ok(Some(fingerprint));
    }

    let Some(row) = submission::Entity::find_by_id(candidate_id)
        .one(&ctx.db)
        .await?
    else {
        return Ok(None);
    };

    Ok(Some(
        ctx.fingerprints
            .insert(candidate_id, similarity::fingerprint(&row.source_code))
            .await,
    ))
}

/// First access for a problem: index every stored submission so history is
/// searchable after a restart. Later submissions update incrementally.
async fn build_index(
    ctx: &PipelineContext,
    problem_id: i32,
    exclude_id: i32,
) -> Result<LshIndex, DbErr> {
    let rows = submission::Entity::find()
        .filter(submission::Column::ProblemId.eq(problem_id))
        .filter(submission::Column::Id.ne(exclude_id))
        .all(&ctx.db)
        .await?;

    info!(problem_id, submissions = rows.len(), "Building LSH index");

    let mut index = LshIndex::new(ctx.config.lsh_tables, ctx.config.lsh_band_size_hint);
    for row in rows {
        let fingerprint = fingerprint_for(ctx, row.id, &row.source_code).await;
        index.add(row.id, &fingerprint);
    }

    Ok(index)
}

/// Upsert the report for an ordered pair; re-runs overwrite the scores.
async fn upsert_report(
    ctx: &PipelineContext,
    submission_id: i32,
    candidate_id: i32,
    scores: &SimilarityScores,
) -> Result<(), DbErr> {
    // The stored pair is ordered; the containments follow the swap.
    let (submission_a, submission_b, containment_a_in_b, containment_b_in_a) =
        if submission_id <= candidate_id {
            (
                submission_id,
                candidate_id,
                scores.containment_a,
                scores.containment_b,
            )
        } else {
            (
                candidate_id,
                submission_id,
                scores.containment_b,
                scores.containment_a,
            )
        };

    let model = plagiarism_report::ActiveModel {
        submission_a: Set(submission_a),
        submission_b: Set(submission_b),
        similarity: Set(scores.blended),
        jaccard_similarity: Set(scores.jaccard),
        containment_a_in_b: Set(containment_a_in_b),
        containment_b_in_a: Set(containment_b_in_a),
        created_at: Set(Utc::now()),
        ..Default::default()
    };

    plagiarism_report::Entity::insert(model)
        .on_conflict(
            OnConflict::columns([
                plagiarism_report::Column::SubmissionA,
                plagiarism_report::Column::SubmissionB,
            ])
            .update_columns([
                plagiarism_report::Column::Similarity,
                plagiarism_report::Column::JaccardSimilarity,
                plagiarism_report::Column::ContainmentAInB,
                plagiarism_report::Column::ContainmentBInA,
            ])
            .to_owned(),
        )
        .exec_without_returning(&ctx.db)
        .await?;

    Ok(())
}
