use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "test_cases")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(column_type = "Text")]
    pub input: String,
    #[sea_orm(column_type = "Text")]
    pub expected_output: String,

    pub problem_id: i32,

    #[sea_orm(belongs_to, from = "problem_id", to = "id", on_delete = "Cascade")]
    pub problem: HasOne<super::problem::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
