pub mod catalog;
pub mod drift;
pub mod graph;
pub mod ontology;
pub mod query;

pub use catalog::*;
pub use drift::*;
pub use graph::*;
pub use ontology::*;
pub use query::*;
