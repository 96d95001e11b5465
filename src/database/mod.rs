// Storage modules
// `lancedb` holds the vector index; `documents` is the metadata persistence
// seam (durable backends plug in behind the DocumentStore trait).

pub mod documents;
pub mod lancedb;
