mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{FakeBackend, Op, briefs, eventually};
use query_sync::cache::QueryKey;
use query_sync::{
    CachedData, FetchStatus, InvalidationPattern, PageOutcome, RecordId, RollbackOutcome,
    TransportError,
};
use serde_json::{Value, json};

#[tokio::test]
async fn concurrent_identical_lists_share_one_transport_call() {
    let backend = FakeBackend::new();
    backend.seed(3);
    let (_store, service) = briefs(&backend);
    let gate = backend.hold(Op::List);

    let params = json!({"status": "open", "sort": "title"});
    let reordered = json!({"sort": "title", "status": "open"});
    let (first, second, ()) = tokio::join!(service.list(&params), service.list(&reordered), async {
        tokio::task::yield_now().await;
        gate.notify_one();
    });

    assert_eq!(first.expect("first list"), second.expect("second list"));
    assert_eq!(backend.call_count(Op::List), 1);
}

#[tokio::test]
async fn failed_update_rolls_back_when_nothing_else_wrote() {
    let backend = FakeBackend::new();
    let id = backend.insert(json!({"title": "draft"}));
    let (store, service) = briefs(&backend);
    let record_id = RecordId::from(id);
    let original = service.detail(&record_id).await.expect("detail");
    let key = QueryKey::detail("briefs", &record_id);
    let version = store.get(&key).expect("entry").version;

    backend.fail(Op::Patch, TransportError::with_status(500, "boom"));
    let err = service
        .partial_update(&record_id, &json!({"title": "final"}))
        .await
        .expect_err("patch fails");

    assert_eq!(err.rollback, RollbackOutcome::Restored);
    assert_eq!(err.http_status(), Some(500));
    let entry = store.get(&key).expect("entry");
    assert_eq!(entry.data, Some(CachedData::Record(original)));
    assert_eq!(entry.version, version);
    assert_eq!(entry.status, FetchStatus::Error);
}

#[tokio::test]
async fn optimistic_value_is_visible_while_the_write_is_pending() {
    let backend = FakeBackend::new();
    let id = backend.insert(json!({"title": "draft", "owner": "ana"}));
    let (_store, service) = briefs(&backend);
    let record_id = RecordId::from(id);
    service.detail(&record_id).await.expect("detail");
    let gate = backend.hold(Op::Patch);

    let patch = json!({"title": "final"});
    let (saved, ()) = tokio::join!(service.partial_update(&record_id, &patch), async {
        tokio::task::yield_now().await;
        let shown = service.cached_detail(&record_id).expect("cached");
        assert_eq!(shown.get("title"), Some(&json!("final")));
        assert_eq!(shown.get("owner"), Some(&json!("ana")));
        gate.notify_one();
    });

    let saved = saved.expect("patch");
    assert_eq!(service.cached_detail(&record_id), Some(saved));
}

#[tokio::test]
async fn rollback_is_skipped_when_a_newer_write_landed() {
    let backend = FakeBackend::new();
    let id = backend.insert(json!({"title": "v1"}));
    let (store, service) = briefs(&backend);
    let record_id = RecordId::from(id);
    service.detail(&record_id).await.expect("detail");
    let key = QueryKey::detail("briefs", &record_id);
    let before = store.get(&key).expect("entry").version;

    let gate = backend.hold(Op::Patch);
    backend.fail(Op::Patch, TransportError::with_status(409, "conflict"));

    let patch = json!({"title": "mine"});
    let (result, ()) = tokio::join!(service.partial_update(&record_id, &patch), async {
        tokio::task::yield_now().await;
        backend.overwrite(id, json!({"title": "theirs"}));
        service.invalidate(&InvalidationPattern::SpecificDetail(record_id.clone()));
        service.detail(&record_id).await.expect("refetch");
        gate.notify_one();
    });

    let err = result.expect_err("patch fails");
    assert_eq!(err.rollback, RollbackOutcome::Skipped);
    let entry = store.get(&key).expect("entry");
    assert_eq!(entry.version, before + 1);
    assert_eq!(
        entry.data.as_ref().and_then(CachedData::as_record).and_then(|r| r.get("title")),
        Some(&json!("theirs"))
    );
}

#[tokio::test]
async fn lists_only_invalidation_leaves_details_alone() {
    let backend = FakeBackend::new();
    backend.seed(2);
    let (store, service) = briefs(&backend);

    service.list(&json!({})).await.expect("list");
    service.infinite_list(&json!({"q": "x"})).await.expect("infinite");
    service.detail(&RecordId::from(1)).await.expect("detail 1");
    service.detail(&RecordId::from(2)).await.expect("detail 2");

    let report = service.invalidate(&InvalidationPattern::ListsOnly);
    assert_eq!(report.marked.len(), 2);

    for key in store.keys_for_resource("briefs") {
        let entry = store.get(&key).expect("entry");
        assert!(entry.data.is_some(), "{key} keeps its data");
        if key.kind().is_list() {
            assert!(entry.is_stale(), "{key} should be stale");
        } else {
            assert!(entry.is_fresh_success(), "{key} should be untouched");
        }
    }
}

#[tokio::test]
async fn infinite_list_pages_advance_monotonically() {
    let backend = FakeBackend::new();
    backend.seed(25);
    backend.set_page_size(10);
    let (_store, service) = briefs(&backend);

    let params = json!({"status": "open"});
    let mut state = service.cursor(&params);
    assert!(service.has_more(&state));

    for (expected_items, expected_more) in [(10, true), (20, true), (25, false)] {
        let outcome = service.next_page(&mut state).await.expect("page");
        assert_eq!(outcome, PageOutcome::Appended);
        assert_eq!(state.item_count(), expected_items);
        assert_eq!(service.has_more(&state), expected_more);
    }
    assert_eq!(service.next_page(&mut state).await.expect("exhausted"), PageOutcome::Exhausted);

    let requested: Vec<Option<u64>> = backend
        .calls(Op::List)
        .iter()
        .map(|params| params.get("page").and_then(Value::as_u64))
        .collect();
    assert_eq!(requested, vec![None, Some(2), Some(3)]);

    let ids: Vec<Option<RecordId>> = state.items().map(|record| record.id("id")).collect();
    assert_eq!(ids.first(), Some(&Some(RecordId::from(1))));
    assert_eq!(ids.last(), Some(&Some(RecordId::from(25))));
}

#[tokio::test]
async fn created_record_shows_up_in_the_next_list_read() {
    let backend = FakeBackend::new();
    backend.seed(2);
    let (_store, service) = briefs(&backend);

    let before = service.list(&json!({})).await.expect("list");
    assert_eq!(before.items.len(), 2);

    let created = service.create(&json!({"title": "new brief"})).await.expect("create");
    let id = created.id(service.id_field()).expect("server id");

    let after = service.list(&json!({})).await.expect("list after create");
    assert_eq!(backend.call_count(Op::List), 2);
    assert!(after.contains_id(service.id_field(), &id));
    assert_eq!(service.cached_detail(&id), Some(created));
}

#[tokio::test]
async fn watched_lists_refetch_after_a_mutation() {
    let backend = FakeBackend::new();
    backend.seed(1);
    let (_store, service) = briefs(&backend);
    let params = json!({});
    service.list(&params).await.expect("list");

    let notified = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notified);
    let _sub = service.subscribe_list(&params, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    service.create(&json!({"title": "second"})).await.expect("create");

    assert!(eventually(|| backend.call_count(Op::List) == 2).await);
    let refreshed = || service.cached_list(&params).is_some_and(|page| page.items.len() == 2);
    assert!(eventually(refreshed).await);
    assert!(notified.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn confirmed_delete_removes_detail_and_refreshes_lists() {
    let backend = FakeBackend::new();
    backend.seed(2);
    let (_store, service) = briefs(&backend);
    let doomed = RecordId::from(1);
    service.list(&json!({})).await.expect("list");
    service.detail(&doomed).await.expect("detail");

    service.remove(&doomed).await.expect("delete");

    assert!(service.cached_detail(&doomed).is_none());
    let list = service.list(&json!({})).await.expect("list");
    assert!(!list.contains_id("id", &doomed));
}

#[tokio::test]
async fn missing_record_surfaces_transport_status() {
    let backend = FakeBackend::new();
    let (_store, service) = briefs(&backend);

    let err = service.detail(&RecordId::from(77)).await.expect_err("not found");
    assert_eq!(err.http_status(), Some(404));
    assert_eq!(err.key(), &QueryKey::detail("briefs", &RecordId::from(77)));
}

#[tokio::test]
async fn list_fetched_across_a_create_is_not_served_as_fresh() {
    let backend = FakeBackend::new();
    backend.seed(2);
    let (store, service) = briefs(&backend);
    let gate = backend.hold(Op::List);

    let empty = json!({});
    let (held, created) = tokio::join!(service.list(&empty), async {
        assert!(eventually(|| backend.call_count(Op::List) == 1).await);
        let created = service.create(&json!({"title": "late"})).await;
        gate.notify_one();
        created
    });
    assert_eq!(held.expect("held list").items.len(), 2);
    let id = created.expect("create").id(service.id_field()).expect("server id");

    let key = QueryKey::list("briefs", &json!({}));
    assert!(store.get(&key).expect("list entry").is_stale());

    let after = service.list(&json!({})).await.expect("list after create");
    assert_eq!(backend.call_count(Op::List), 2);
    assert_eq!(after.items.len(), 3);
    assert!(after.contains_id(service.id_field(), &id));
}

#[tokio::test]
async fn sessions_on_one_infinite_list_share_page_requests() {
    let backend = FakeBackend::new();
    backend.seed(25);
    backend.set_page_size(10);
    let (_store, service) = briefs(&backend);
    let params = json!({"status": "open"});
    let mut leader = service.cursor(&params);
    let mut follower = service.cursor(&params);
    let gate = backend.hold(Op::List);

    let (first, second, ()) = tokio::join!(
        service.next_page(&mut leader),
        service.next_page(&mut follower),
        async {
            assert!(eventually(|| backend.call_count(Op::List) == 1).await);
            gate.notify_one();
        }
    );
    assert_eq!(first.expect("leader"), PageOutcome::Appended);
    assert_eq!(second.expect("follower"), PageOutcome::Appended);
    assert_eq!(backend.call_count(Op::List), 1);
    assert_eq!(leader.pages(), follower.pages());

    service.next_page(&mut leader).await.expect("leader page 2");
    service.next_page(&mut follower).await.expect("follower page 2");
    assert_eq!(backend.call_count(Op::List), 3);
    assert_eq!(follower.item_count(), 25);
    assert!(!service.has_more(&follower));
}

#[tokio::test]
async fn delete_during_a_detail_fetch_keeps_the_record_gone() {
    let backend = FakeBackend::new();
    backend.seed(2);
    let (store, service) = briefs(&backend);
    let doomed = RecordId::from(1);
    let gate = backend.hold(Op::Get);

    let (held, removed) = tokio::join!(service.detail(&doomed), async {
        assert!(eventually(|| backend.call_count(Op::Get) == 1).await);
        let removed = service.remove(&doomed).await;
        gate.notify_one();
        removed
    });
    assert!(held.is_ok());
    removed.expect("delete");

    assert!(store.get(&QueryKey::detail("briefs", &doomed)).is_none());
    assert!(service.cached_detail(&doomed).is_none());
}
