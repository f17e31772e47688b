pub mod document;
pub mod reconcile;
pub mod schema;
pub mod settings;
pub mod task;

pub use reconcile::SettingsReconciler;
pub use schema::{AttributeRole, FieldSpec, IndexSchema, SchemaRegistry};
pub use settings::{BackendSettings, SettingsChange, SettingsGroup};
pub use task::{BackendTask, SettingsTask, TaskState};
