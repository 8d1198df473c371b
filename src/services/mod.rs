pub mod catalog_registry; // Catalog registration and introspection
pub mod context; // ServiceContext wiring
pub mod engine; // Federation engine clients (Trino REST protocol)
pub mod llm_service;
pub mod ontology_store;
pub mod schema_cache; // Ontology context cache with TTL
pub mod vkg; // Question -> SQL -> graph -> answer pipeline

pub use catalog_registry::*;
pub use context::ServiceContext;
pub use engine::*;
pub use llm_service::*;
pub use ontology_store::*;
pub use schema_cache::*;
