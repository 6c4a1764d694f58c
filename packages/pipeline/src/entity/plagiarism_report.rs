use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A flagged submission pair.
///
/// Rows exist only for pairs whose blended similarity cleared the reporting
/// threshold. The pair is stored ordered (`submission_a < submission_b`) and
/// is unique; re-runs overwrite the scores.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "plagiarism_reports")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub submission_a: i32,
    pub submission_b: i32,

    /// Blended score: `0.4 * jaccard + 0.6 * max(containments)`.
    pub similarity: f64,
    pub jaccard_similarity: f64,
    pub containment_a_in_b: f64,
    pub containment_b_in_a: f64,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
