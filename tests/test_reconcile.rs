use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use waypoint_search::index::settings::BackendSettings;
use waypoint_search::{
    user_profile_schema, ApplyOutcome, CancellationToken, MemoryBackend, SettingsGroup, SyncError,
};

mod common;

#[tokio::test(start_paused = true)]
async fn apply_twice_second_is_unchanged_with_no_writes() {
    let backend = Arc::new(MemoryBackend::new());
    let client = common::client(&backend);
    let cancel = CancellationToken::new();

    let first = client.apply_settings(&cancel).await.unwrap();
    assert!(first.success);
    assert!(first.changed);

    let writes = backend.write_count();
    let second = client.apply_settings(&cancel).await.unwrap();
    assert_eq!(second, ApplyOutcome::unchanged());
    assert_eq!(backend.write_count(), writes);
}

#[tokio::test(start_paused = true)]
async fn converged_index_needs_no_writes() {
    let backend = Arc::new(MemoryBackend::new());
    backend.insert_index(
        "user_profiles",
        common::converged_settings(&user_profile_schema()),
    );
    let client = common::client(&backend);

    let outcome = client.apply_settings(&CancellationToken::new()).await.unwrap();
    assert!(!outcome.changed);
    assert_eq!(backend.write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn drift_is_repaired_group_by_group() {
    let backend = Arc::new(MemoryBackend::new());
    let schema = user_profile_schema();
    let mut drifted = common::converged_settings(&schema);
    drifted.sortable_attributes = vec!["updated_at".to_string()];
    drifted.ranking_rules.reverse();
    backend.insert_index("user_profiles", drifted);
    let client = common::client(&backend);

    let outcome = client.apply_settings(&CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome.groups,
        vec![SettingsGroup::SortableAttributes, SettingsGroup::RankingRules]
    );
    assert_eq!(backend.write_count(), 2);
    assert_eq!(
        backend.settings("user_profiles").unwrap(),
        common::converged_settings(&schema)
    );
}

#[tokio::test(start_paused = true)]
async fn differing_primary_key_on_populated_index_issues_zero_writes() {
    let backend = Arc::new(MemoryBackend::new());
    let mut settings = common::converged_settings(&user_profile_schema());
    settings.primary_key = Some("uid".to_string());
    settings.searchable_attributes = vec!["*".to_string()];
    backend.insert_index("user_profiles", settings);
    let doc = json!({"uid": "1", "fid": 1});
    backend.seed_document("user_profiles", "1", doc.as_object().unwrap().clone());
    let client = common::client(&backend);

    let err = client
        .apply_settings(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::ImmutablePrimaryKey { ref current, ref declared }
            if current == "uid" && declared == "id"
    ));
    assert_eq!(backend.write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn differing_primary_key_on_empty_index_is_updated() {
    let backend = Arc::new(MemoryBackend::new());
    let mut settings = common::converged_settings(&user_profile_schema());
    settings.primary_key = Some("uid".to_string());
    backend.insert_index("user_profiles", settings);
    let client = common::client(&backend);

    let outcome = client.apply_settings(&CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.groups, vec![SettingsGroup::PrimaryKey]);
    assert_eq!(
        backend.settings("user_profiles").unwrap().primary_key.as_deref(),
        Some("id")
    );
}

#[tokio::test(start_paused = true)]
async fn rejected_group_is_named_and_later_groups_untouched() {
    let backend = Arc::new(MemoryBackend::new());
    backend.insert_index(
        "user_profiles",
        BackendSettings::fresh(Some("id".to_string())),
    );
    backend.reject_group(SettingsGroup::SortableAttributes, "invalid sortable attribute");
    let client = common::client(&backend);

    let err = client
        .apply_settings(&CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        SyncError::BackendRejected {
            group,
            task_id,
            message,
        } => {
            assert_eq!(group, SettingsGroup::SortableAttributes);
            assert!(!task_id.is_empty());
            assert_eq!(message, "invalid sortable attribute");
        }
        other => panic!("expected BackendRejected, got {other:?}"),
    }

    let settings = backend.settings("user_profiles").unwrap();
    assert_eq!(settings.filterable_attributes, vec!["fid"]);
    assert!(settings.sortable_attributes.is_empty());
    assert_eq!(settings.distinct_attribute, None);
}

#[tokio::test(start_paused = true)]
async fn stalled_task_times_out_with_group_and_task() {
    let backend = Arc::new(MemoryBackend::new());
    let mut settings = common::converged_settings(&user_profile_schema());
    settings.filterable_attributes.clear();
    backend.insert_index("user_profiles", settings);
    backend.stall_tasks(true);
    let client = common::client(&backend);

    let err = client
        .apply_settings(&CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        SyncError::Timeout { group, task_id } => {
            assert_eq!(group, Some(SettingsGroup::FilterableAttributes));
            assert!(task_id.is_some());
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
    assert!(backend
        .settings("user_profiles")
        .unwrap()
        .filterable_attributes
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn deadline_during_a_request_is_a_timeout() {
    let backend = Arc::new(MemoryBackend::new());
    let mut settings = common::converged_settings(&user_profile_schema());
    settings.sortable_attributes.clear();
    backend.insert_index("user_profiles", settings);
    backend.hang_settings_updates(true);
    let client = common::client(&backend);

    let err = client
        .apply_settings(&CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        SyncError::Timeout { group, task_id } => {
            assert_eq!(group, Some(SettingsGroup::SortableAttributes));
            assert_eq!(task_id, None);
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_mid_poll_is_reported() {
    let backend = Arc::new(MemoryBackend::new());
    let mut settings = common::converged_settings(&user_profile_schema());
    settings.distinct_attribute = None;
    backend.insert_index("user_profiles", settings);
    backend.stall_tasks(true);
    let client = common::client(&backend);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let err = client.apply_settings(&cancel).await.unwrap_err();
    match err {
        SyncError::Cancelled { group, task_id } => {
            assert_eq!(group, Some(SettingsGroup::DistinctAttribute));
            assert!(task_id.is_some());
        }
        other => panic!("expected Cancelled, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn missing_index_is_created_first() {
    let backend = Arc::new(MemoryBackend::new());
    let client = common::client(&backend);

    let outcome = client.apply_settings(&CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.groups.first(), Some(&SettingsGroup::PrimaryKey));
    assert_eq!(
        backend.settings("user_profiles").unwrap(),
        common::converged_settings(&user_profile_schema())
    );
}
