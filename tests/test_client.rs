use std::sync::Arc;
use waypoint_search::{
    CancellationToken, CodecError, IndexError, MemoryBackend, Pagination, ProfileDocument,
    QueryError, SearchRequest,
};

mod common;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_upserts_of_distinct_ids_all_land() {
    let backend = Arc::new(MemoryBackend::new());
    let client = common::client(&backend);
    client
        .apply_settings(&CancellationToken::new())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for fid in 1..=100u64 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client
                .upsert_document(&common::profile(fid, &format!("user{}", fid)))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(backend.document_count("user_profiles"), 100);
    for fid in 1..=100u64 {
        let doc = client.get_document(&fid.to_string()).await.unwrap();
        assert_eq!(doc, Some(common::profile(fid, &format!("user{}", fid))));
    }
}

#[tokio::test]
async fn pagination_at_the_last_page_has_no_more() {
    let backend = Arc::new(MemoryBackend::new());
    let client = common::client(&backend);
    let docs: Vec<ProfileDocument> = (1..=57u64)
        .map(|fid| common::profile(fid, &format!("user{}", fid)))
        .collect();
    let summary = client.upsert_documents(&docs).await;
    assert!(summary.is_complete());

    let result = client
        .search(&SearchRequest::new("").with_limit(20).with_offset(40))
        .await
        .unwrap();
    assert_eq!(result.documents.len(), 17);
    assert_eq!(
        result.pagination,
        Pagination {
            total: 57,
            limit: 20,
            offset: 40,
            has_more: false
        }
    );

    let middle = client
        .search(&SearchRequest::new("").with_limit(20).with_offset(20))
        .await
        .unwrap();
    assert!(middle.pagination.has_more);
}

#[tokio::test]
async fn filtering_on_a_non_filterable_field_is_rejected() {
    let backend = Arc::new(MemoryBackend::new());
    let client = common::client(&backend);

    let err = client
        .search(&SearchRequest::new("").with_filter("location:Chicago"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IndexError::Query(QueryError::FieldNotFilterable { ref field }) if field == "location"
    ));
    assert_eq!(err.status_code(), http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deeply_negated_filter_is_a_bad_request() {
    let backend = Arc::new(MemoryBackend::new());
    let client = common::client(&backend);
    let filter = format!("{}fid = 1", "NOT ".repeat(20_000));

    let err = client
        .search(&SearchRequest::new("").with_filter(filter))
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::Query(QueryError::InvalidFilter { .. })));
    assert_eq!(err.status_code(), http::StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn search_filters_and_sorts_after_settings_apply() {
    let backend = Arc::new(MemoryBackend::new());
    let client = common::client(&backend);
    client
        .apply_settings(&CancellationToken::new())
        .await
        .unwrap();

    let docs = vec![
        common::profile(10, "dan").with_bio("building things"),
        common::profile(20, "danny"),
        common::profile(30, "varun"),
        common::profile(40, "dana").with_location("Chicago"),
    ];
    client.upsert_documents(&docs).await;

    let result = client
        .search(
            &SearchRequest::new("dan")
                .with_filter("fid > 10")
                .with_sort("fid:desc"),
        )
        .await
        .unwrap();
    let fids: Vec<u64> = result.documents.iter().map(|d| d.fid).collect();
    assert_eq!(fids, vec![40, 20]);
    assert_eq!(result.pagination.total, 2);
    assert!(result.rejected.is_empty());
}

#[tokio::test]
async fn absent_optional_fields_survive_the_backend() {
    let backend = Arc::new(MemoryBackend::new());
    let client = common::client(&backend);
    let bare = ProfileDocument::new("7", 7);
    client.upsert_document(&bare).await.unwrap();

    let stored = client.get_document("7").await.unwrap().unwrap();
    assert_eq!(stored, bare);
    assert_eq!(stored.bio, None);
    assert_eq!(client.get_document("8").await.unwrap(), None);
}

#[tokio::test]
async fn batch_reports_bad_documents_without_aborting() {
    let backend = Arc::new(MemoryBackend::new());
    let client = common::client(&backend);
    let docs = vec![
        common::profile(1, "a"),
        ProfileDocument::new("", 2),
        common::profile(3, "c"),
    ];

    let summary = client.upsert_documents(&docs).await;
    assert_eq!(summary.upserted, vec!["1", "3"]);
    assert_eq!(summary.rejected.len(), 1);
    assert!(matches!(
        summary.rejected[0].error,
        IndexError::Codec(CodecError::InvalidField { .. })
    ));
    assert_eq!(backend.document_count("user_profiles"), 2);
}

#[tokio::test]
async fn newer_write_wins_regardless_of_arrival_order() {
    let backend = Arc::new(MemoryBackend::new());
    let client = common::client(&backend);
    let newer = common::profile(5, "new-name").with_updated_at(200);
    let older = common::profile(5, "old-name").with_updated_at(100);

    client.upsert_document(&newer).await.unwrap();
    client.upsert_document(&older).await.unwrap();

    let stored = client.get_document("5").await.unwrap().unwrap();
    assert_eq!(stored.username.as_deref(), Some("new-name"));
}
