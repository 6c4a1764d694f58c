use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr};
use tracing::{info, warn};

/// Schema details the entity sync cannot express, applied on startup.
pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    // The report upsert relies on ON CONFLICT against this index, so its
    // absence is fatal.
    db.execute_unprepared(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_plagiarism_reports_pair \
         ON plagiarism_reports (submission_a, submission_b)",
    )
    .await?;
    info!("Ensured unique index on plagiarism_reports (submission_a, submission_b)");

    // Legacy deployments carry the three-column report table; grow it.
    for column in [
        "jaccard_similarity",
        "containment_a_in_b",
        "containment_b_in_a",
    ] {
        let stmt = format!(
            "ALTER TABLE plagiarism_reports \
             ADD COLUMN IF NOT EXISTS {column} DOUBLE PRECISION NOT NULL DEFAULT 0"
        );
        if let Err(e) = db.execute_unprepared(&stmt).await {
            warn!(column, error = %e, "Failed to ensure report score column");
        }
    }

    Ok(())
}
