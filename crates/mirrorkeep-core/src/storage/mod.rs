mod queries;
mod sqlite;

pub use queries::DivergenceRecord;
pub use sqlite::MetadataStore;
