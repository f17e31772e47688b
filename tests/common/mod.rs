use std::sync::Arc;
use waypoint_search::index::settings::BackendSettings;
use waypoint_search::{
    user_profile_schema, IndexClient, IndexSchema, MemoryBackend, PollConfig, ProfileDocument,
    RetryPolicy, SchemaRegistry, SyncConfig,
};

/// Fast polling so paused-clock tests finish in few steps.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        poll: PollConfig {
            initial_delay_ms: 10,
            max_delay_ms: 100,
            deadline_secs: 5,
        },
        retry: RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 10,
            max_delay_ms: 50,
        },
        ..Default::default()
    }
}

pub fn registry() -> SchemaRegistry {
    SchemaRegistry::validate(user_profile_schema()).unwrap()
}

pub fn client(backend: &Arc<MemoryBackend>) -> IndexClient {
    IndexClient::new(backend.clone(), &registry(), &test_config())
}

/// Backend settings that already match `schema`.
#[allow(dead_code)]
pub fn converged_settings(schema: &IndexSchema) -> BackendSettings {
    BackendSettings {
        primary_key: Some(schema.primary_key_field.clone()),
        number_of_documents: 0,
        searchable_attributes: schema.searchable_attributes(),
        filterable_attributes: schema.filterable_attributes(),
        sortable_attributes: schema.sortable_attributes(),
        ranking_rules: schema.ranking_rules.clone(),
        distinct_attribute: schema.distinct_attribute.clone(),
    }
}

#[allow(dead_code)]
pub fn profile(fid: u64, username: &str) -> ProfileDocument {
    ProfileDocument::new(fid.to_string(), fid)
        .with_username(username)
        .with_display_name(format!("User {}", fid))
        .with_updated_at(1_700_000_000 + fid)
}
