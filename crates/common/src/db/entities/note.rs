//! Note entity (read-only)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::Note;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: String,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub content: String,

    /// JSON array of tag strings
    pub tags: Json,

    pub is_deleted: bool,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::note_chunk::Entity")]
    Chunks,
}

impl Related<super::note_chunk::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Chunks.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for Note {
    fn from(row: Model) -> Self {
        Note {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            content: row.content,
            tags: serde_json::from_value(row.tags).unwrap_or_default(),
            updated_at: row.updated_at.with_timezone(&chrono::Utc),
        }
    }
}
