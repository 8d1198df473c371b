use std::sync::Arc;

use crate::services::ServiceContext;

pub mod catalog;
pub mod ontology;
pub mod vkg;

/// Shared application state
pub type AppState = Arc<ServiceContext>;
