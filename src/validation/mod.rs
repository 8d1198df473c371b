pub mod mapping_validator;
pub mod sql_validator;

pub use mapping_validator::{MappingValidator, ValidationReport};
pub use sql_validator::SqlValidator;
