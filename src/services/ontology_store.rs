use async_trait::async_trait;

use crate::api::middleware::AppError;
use crate::models::{DataProperty, MappingSet, ObjectProperty, OntologyClass, OntologyScope};

/// Read access to a workspace's ontology elements
#[async_trait]
pub trait OntologyStore: Send + Sync {
    async fn get_classes(
        &self,
        tenant_id: &str,
        workspace_id: &str,
        scope: OntologyScope,
    ) -> Result<Vec<OntologyClass>, AppError>;

    async fn get_object_properties(
        &self,
        tenant_id: &str,
        workspace_id: &str,
        scope: OntologyScope,
    ) -> Result<Vec<ObjectProperty>, AppError>;

    async fn get_data_properties(
        &self,
        tenant_id: &str,
        workspace_id: &str,
        scope: OntologyScope,
    ) -> Result<Vec<DataProperty>, AppError>;

    /// Display name of the workspace, if recorded
    async fn workspace_name(&self, _tenant_id: &str, _workspace_id: &str) -> Result<Option<String>, AppError> {
        Ok(None)
    }
}

/// Ontology-to-physical annotations (class -> table, property -> column, joins)
#[async_trait]
pub trait MappingAnnotationStore: Send + Sync {
    async fn get_mapping_annotations(
        &self,
        tenant_id: &str,
        workspace_id: &str,
        workspace_name: &str,
    ) -> Result<MappingSet, AppError>;
}
