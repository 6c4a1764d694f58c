use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A submitted solution.
///
/// The `verdict` column holds the wire strings of [`common::Verdict`]
/// (`Pending`, `Wrong Answer`, `Judge Error: No test cases`, ...). It starts
/// at `Pending` and is mutated exactly once, by the judge worker; re-judging
/// after queue redelivery overwrites idempotently.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "submissions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub problem_id: i32,

    #[sea_orm(column_type = "Text")]
    pub source_code: String,

    #[sea_orm(default_value = "Pending")]
    pub verdict: String,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
