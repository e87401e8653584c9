//! End-to-end lifecycle coverage over the in-memory backend.

use casdoc_core::{BuildOptions, CoreError, GetOptions};
use casdoc_testkit::prelude::*;
use serde_json::json;
use std::sync::Arc;

#[test]
fn client_end_to_end() {
    let backend = Arc::new(RecordingBackend::new());
    let manager = manager(backend.clone());
    let client = client_model(&manager);

    let mut created = client
        .create(sample_client("acme"), BuildOptions::new())
        .unwrap();
    let primary = created.rendered_key().unwrap();

    // Reference document: joined field names and values in the key, the
    // primary key string as the payload.
    assert_eq!(
        backend.store().raw("Client_name_acme").unwrap(),
        primary.as_bytes()
    );

    // Defaults and timestamps applied.
    assert_eq!(created.get("status"), Some(&json!("active")));
    assert!(created.get("created_at").is_some());
    assert_eq!(created.get("updated_at"), created.get("created_at"));

    let found = client
        .find_by_index("name", &["acme"])
        .unwrap()
        .expect("indexed client");
    assert_eq!(found.id(), created.id());
    assert_eq!(found.get("email"), Some(&json!("acme@example.com")));

    created.destroy().unwrap();
    assert!(!backend.store().contains(&primary));
    assert!(!backend.store().contains("Client_name_acme"));
    assert!(client.find_by_index("name", &["acme"]).unwrap().is_none());
}

#[test]
fn replace_inserts_fresh_before_primary_and_removes_stale_after() {
    let backend = Arc::new(RecordingBackend::new());
    let manager = manager(backend.clone());
    let client = client_model(&manager);

    let mut instance = client
        .create(sample_client("old"), BuildOptions::new())
        .unwrap();
    let primary = instance.rendered_key().unwrap();
    backend.clear();

    instance.set("name", json!("new")).unwrap();
    instance.replace().unwrap();

    let writes: Vec<_> = backend
        .ops()
        .into_iter()
        .filter(|(kind, _)| {
            matches!(kind, OpKind::Insert | OpKind::Replace | OpKind::Remove)
        })
        .collect();
    assert_eq!(
        writes,
        vec![
            (OpKind::Insert, "Client_name_new".to_string()),
            (OpKind::Replace, primary),
            (OpKind::Remove, "Client_name_old".to_string()),
        ]
    );
}

#[test]
fn optional_index_appears_and_disappears_with_its_value() {
    let backend = Arc::new(RecordingBackend::new());
    let manager = manager(backend.clone());
    let post = post_model(&manager);

    let mut instance = post
        .create(sample_post("hello"), BuildOptions::new())
        .unwrap();
    assert!(!backend.store().contains("Post_category_news"));

    instance.set("category", json!("news")).unwrap();
    instance.replace().unwrap();
    assert!(backend.store().contains("Post_category_news"));

    instance.set("category", json!(null)).unwrap();
    instance.replace().unwrap();
    assert!(!backend.store().contains("Post_category_news"));
    assert!(backend.store().contains("Post_slug_hello"));
}

#[test]
fn soft_delete_hides_but_keeps_the_document() {
    let backend = Arc::new(RecordingBackend::new());
    let manager = manager(backend.clone());
    let account = account_model(&manager);

    let mut instance = account
        .create(json!({"email": "a@b.c"}), BuildOptions::new())
        .unwrap();
    let id = instance.id().unwrap().to_string();
    let primary = instance.rendered_key().unwrap();
    assert!(instance.get("createdAt").is_some());

    instance.destroy().unwrap();
    assert!(instance.is_soft_deleted());
    assert!(instance.get("deletedAt").is_some());

    // Tombstone stays, index entry does not.
    assert!(backend.store().contains(&primary));
    assert!(!backend.store().contains("Account_email_a@b.c"));

    assert!(account.get_by_id(&id, &GetOptions::new()).unwrap().is_none());
    let hidden = account
        .get_by_id(&id, &GetOptions::new().with_deleted())
        .unwrap()
        .expect("tombstone");
    assert!(hidden.is_soft_deleted());
}

#[test]
fn by_reference_relation_roundtrips_as_pointer() {
    let backend = Arc::new(RecordingBackend::new());
    let manager = manager(backend.clone());
    let client = client_model(&manager);
    let post = post_model(&manager);

    let author = client
        .create(sample_client("writer"), BuildOptions::new())
        .unwrap();
    let author_key = author.rendered_key().unwrap();

    let mut data = sample_post("essay");
    data["author"] = json!(author_key);
    let created = post.create(data, BuildOptions::new()).unwrap();
    assert_eq!(created.get("author.id"), Some(&json!(author_key)));

    let reread = post
        .get_by_id_or_fail(created.id().unwrap(), &GetOptions::new())
        .unwrap();
    assert_eq!(reread.get("author.id"), Some(&json!(author_key)));
}

#[test]
fn get_multi_preserves_positions() {
    let backend = Arc::new(RecordingBackend::new());
    let manager = manager(backend.clone());
    let post = post_model(&manager);

    post.create(sample_post("a"), BuildOptions::new()).unwrap();
    post.create(sample_post("b"), BuildOptions::new()).unwrap();

    let got = post.get_multi(&["2", "7", "1"]).unwrap();
    assert_eq!(got.len(), 3);
    assert_eq!(got[0].as_ref().unwrap().get("slug"), Some(&json!("b")));
    assert!(got[1].is_none());
    assert_eq!(got[2].as_ref().unwrap().get("slug"), Some(&json!("a")));
}

#[test]
fn get_multi_aggregates_storage_failures() {
    let backend = Arc::new(FlakyBackend::new());
    let manager = manager(backend.clone());
    let post = post_model(&manager);

    post.create(sample_post("a"), BuildOptions::new()).unwrap();
    post.create(sample_post("b"), BuildOptions::new()).unwrap();
    backend.fail_key(OpKind::Get, "Post_1");

    let err = post.get_multi(&["1", "2"]).unwrap_err();
    match err {
        CoreError::StorageMulti { errors } => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].0, "Post_1");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn locking_read_blocks_other_writers() {
    let backend = Arc::new(RecordingBackend::new());
    let manager = manager(backend.clone());
    let client = client_model(&manager);

    let mut stale = client
        .create(sample_client("acme"), BuildOptions::new())
        .unwrap();
    let id = stale.id().unwrap().to_string();

    let mut locked = client
        .get_by_id_or_fail(
            &id,
            &GetOptions::new().lock(std::time::Duration::from_secs(30)),
        )
        .unwrap();

    // The pre-lock CAS cannot write while the lock is held.
    stale.set("email", json!("stale@example.com")).unwrap();
    assert!(stale.replace().is_err());

    // The lock holder's CAS doubles as the lock token.
    locked.set("email", json!("locked@example.com")).unwrap();
    locked.replace().unwrap();

    let reread = client.get_by_id_or_fail(&id, &GetOptions::new()).unwrap();
    assert_eq!(reread.get("email"), Some(&json!("locked@example.com")));
}

#[test]
fn unlock_releases_without_writing() {
    let backend = Arc::new(RecordingBackend::new());
    let manager = manager(backend.clone());
    let client = client_model(&manager);

    let created = client
        .create(sample_client("acme"), BuildOptions::new())
        .unwrap();
    let id = created.id().unwrap().to_string();

    let mut locked = client
        .get_by_id_or_fail(
            &id,
            &GetOptions::new().lock(std::time::Duration::from_secs(30)),
        )
        .unwrap();
    locked.unlock().unwrap();

    // A fresh read can now write normally.
    let mut other = client.get_by_id_or_fail(&id, &GetOptions::new()).unwrap();
    other.set("email", json!("free@example.com")).unwrap();
    other.replace().unwrap();
}

#[test]
fn stale_update_loses_to_concurrent_writer() {
    let backend = Arc::new(RecordingBackend::new());
    let manager = manager(backend.clone());
    let client = client_model(&manager);

    let mut ours = client
        .create(sample_client("acme"), BuildOptions::new())
        .unwrap();
    let id = ours.id().unwrap().to_string();

    // A concurrent writer changes the email under us.
    let mut theirs = client.get_by_id_or_fail(&id, &GetOptions::new()).unwrap();
    theirs.set("email", json!("support@example.com")).unwrap();
    theirs.replace().unwrap();

    // Our patch carries a stale CAS and must not clobber their write.
    let err = ours.update(json!({"name": "megacorp"})).unwrap_err();
    assert!(matches!(err, CoreError::DocumentStorage { .. }));
    assert_eq!(ours.get("name"), Some(&json!("acme")));

    let reread = client.get_by_id_or_fail(&id, &GetOptions::new()).unwrap();
    assert_eq!(reread.get("email"), Some(&json!("support@example.com")));
    assert_eq!(reread.get("name"), Some(&json!("acme")));
}
