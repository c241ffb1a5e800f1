use cache_sample::lifecycle::{demo_server, CacheSystem};
use cache_sample::model::{Person, PERSON, TAG};
use record_cache::{Query, RecordState, StoreConfig, StoreError, Verb};
use serde_json::{json, Map};

fn system(page_size: u32) -> CacheSystem {
    CacheSystem::with_config(demo_server(), StoreConfig::default().with_default_page_size(page_size))
}

/// Full end-to-end flow through the REST adapter and the in-memory server.
#[tokio::test]
async fn test_full_cache_system_integration() {
    let system = system(2);
    let store = system.store.clone();

    // Page through every person
    let people = store.find_all(PERSON).await.expect("Failed to load first page");
    assert_eq!(people.len(), 2);
    assert_eq!(people.total_pages(), 3);
    assert!(!people.is_finished());

    people.load_more().await.expect("Failed to load page 2");
    people.load_more().await.expect("Failed to load page 3");
    assert_eq!(people.len(), 5);
    assert!(people.is_finished());

    // The server saw paged GETs under the namespace
    let requests = system.server.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|r| r.verb == Verb::Get && r.url == "/api/people"));
    assert_eq!(requests[2].data, Some(json!({ "page": 3, "pageSize": 2 })));

    // Typed views
    let dale = Person::from_record(&people.object_at(0).unwrap()).unwrap();
    assert_eq!(dale.name, "Scumbag Dale");
    assert_eq!(dale.tag.as_deref(), Some("1"));

    system.shutdown().await.expect("Failed to shut down");
}

#[tokio::test]
async fn test_relationship_arrays_follow_deletes() {
    let system = system(25);
    let store = system.store.clone();
    store.find_all(PERSON).await.unwrap();

    let tag = store.find(TAG, 1).await.unwrap();
    let members = tag.has_many("people").unwrap();
    assert_eq!(members.ids(), vec!["1".to_string(), "2".to_string()]);

    let dale = store.peek(PERSON, 1).await.unwrap().unwrap();
    store.destroy_record(&dale).await.unwrap();

    assert_eq!(members.ids(), vec!["2".to_string()]);
    assert_eq!(system.server.records("people").len(), 4);

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_create_and_save_round_trip() {
    let system = system(25);
    let store = system.store.clone();
    let everyone = store.all(PERSON).await.unwrap();

    let tom = Person::new("Tomster").with_email("tomster@example.com");
    let record = store.create_record(PERSON, tom.fields()).await.unwrap();
    assert_eq!(everyone.len(), 1);

    store.save(&record).await.unwrap();
    assert_eq!(record.id().as_deref(), Some("6"));
    assert_eq!(record.state(), RecordState::Loaded);

    let saved = Person::from_record(&record).unwrap();
    assert_eq!(saved.email.as_deref(), Some("tomster@example.com"));

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_offline_save_keeps_record_in_error() {
    let system = system(25);
    let store = system.store.clone();

    let record = store
        .create_record(PERSON, Person::new("Zoey").fields())
        .await
        .unwrap();
    system.server.set_offline(true);

    let err = store.save(&record).await.unwrap_err();
    assert!(err.is_fetch());
    assert_eq!(record.state(), RecordState::Error);
    assert_eq!(record.id(), None);

    // Retrying once the server is back succeeds.
    system.server.set_offline(false);
    store.save(&record).await.unwrap();
    assert_eq!(record.state(), RecordState::Loaded);

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_query_with_params() {
    let system = system(25);
    let store = system.store.clone();

    let mut params = Map::new();
    params.insert("tag".into(), json!("1"));
    let scumbags = store.find_query(Query::matching(PERSON, params)).await.unwrap();

    assert_eq!(scumbags.ids(), vec!["1".to_string(), "2".to_string()]);
    assert!(scumbags.is_finished());

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_calls_after_shutdown_fail() {
    let system = system(25);
    let store = system.store.clone();
    system.shutdown().await.unwrap();

    assert!(matches!(store.find_all(PERSON).await, Err(StoreError::StoreClosed)));
}
