//! Note chunk entity
//!
//! `embedding` is a pgvector column; it is written and searched with raw
//! SQL and only mapped as text here.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "note_chunks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub note_id: Uuid,

    pub user_id: String,

    pub chunk_index: i32,

    #[sea_orm(column_type = "Text")]
    pub content: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub embedding: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub embedding_model: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::note::Entity",
        from = "Column::NoteId",
        to = "super::note::Column::Id",
        on_delete = "Cascade"
    )]
    Note,
}

impl Related<super::note::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Note.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Format a vector as a pgvector literal: "[1,2,3]"
pub fn to_pgvector(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

/// Parse the text form of a pgvector column
pub fn parse_pgvector(text: &str) -> Option<Vec<f32>> {
    let inner = text.trim().trim_start_matches('[').trim_end_matches(']');
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }
    inner.split(',').map(|v| v.trim().parse::<f32>().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pgvector_text_format() {
        let text = to_pgvector(&[1.0, -0.5, 0.25]);
        assert_eq!(text, "[1,-0.5,0.25]");
        assert_eq!(parse_pgvector(&text), Some(vec![1.0, -0.5, 0.25]));
        assert_eq!(parse_pgvector("[1,abc]"), None);
    }
}
