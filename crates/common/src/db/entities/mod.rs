//! SeaORM entity models
//!
//! Database entities for the SecondBrain RAG tables. `notes` is owned by
//! the note CRUD layer and only read here.

pub mod indexing_job;
pub mod note;
pub mod note_chunk;
pub mod rag_query_log;
pub mod user_rag_preferences;

pub use indexing_job::{
    ActiveModel as IndexingJobActiveModel, Column as IndexingJobColumn,
    Entity as IndexingJobEntity, Model as IndexingJobRow,
};
pub use note::{Column as NoteColumn, Entity as NoteEntity, Model as NoteRow};
pub use note_chunk::{Column as NoteChunkColumn, Entity as NoteChunkEntity};
pub use rag_query_log::{
    ActiveModel as RagQueryLogActiveModel, Column as RagQueryLogColumn,
    Entity as RagQueryLogEntity, Model as RagQueryLogRow,
};
pub use user_rag_preferences::{
    Entity as UserRagPreferencesEntity, Model as UserRagPreferencesRow,
};
