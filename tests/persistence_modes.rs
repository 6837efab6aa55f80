use std::sync::Arc;

use serde_json::{json, Value};
use trove::{
    Client, Column, Criteria, FindOptions, Model, ModelOptions, Record, Schema, Store, StoreConfig, Strategy,
};

fn record(value: Value) -> Record {
    value.as_object().cloned().expect("object")
}

async fn people(store: &Store) -> Arc<Model> {
    store
        .model(
            "people",
            Schema::new([("name", Column::string().primary()), ("age", Column::number())]).expect("schema"),
            ModelOptions::default(),
        )
        .await
        .expect("model")
}

#[tokio::test]
async fn memory_mode_never_touches_disk() {
    let dir = tempfile::tempdir().expect("dir");
    let store = Store::open(StoreConfig::memory().directory(dir.path()))
        .await
        .expect("store");
    assert_eq!(store.strategy(), Strategy::Pooled);
    let people = people(&store).await;
    people.create(record(json!({"name": "Dale", "age": 30}))).await.expect("create");
    store.close().await.expect("close");
    assert_eq!(std::fs::read_dir(dir.path()).expect("read_dir").count(), 0);
}

#[tokio::test]
async fn pooled_mode_snapshots_after_writes() {
    let dir = tempfile::tempdir().expect("dir");
    let config = StoreConfig::file("people.db").directory(dir.path());
    let file = dir.path().join("people.db");
    {
        let store = Store::open(config.clone()).await.expect("store");
        assert_eq!(store.strategy(), Strategy::Pooled);
        let people = people(&store).await;
        assert!(file.exists(), "defining a model is a write");
        people.create(record(json!({"name": "Dale", "age": 30}))).await.expect("create");
        people
            .increment("age", Criteria::equals("name", "Dale"), 5)
            .await
            .expect("increment");

        // reads never write the snapshot back
        std::fs::remove_file(&file).expect("remove");
        people.find(None, FindOptions::default()).await.expect("find");
        people.count(None).await.expect("count");
        assert!(!file.exists());

        people.create(record(json!({"name": "Eve", "age": 22}))).await.expect("create");
        assert!(file.exists());
        store.close().await.expect("close");
    }

    let store = Store::open(config).await.expect("reopen");
    let people = people(&store).await;
    assert_eq!(people.count(None).await.expect("count"), 2);
    assert_eq!(
        people.get("age", Criteria::equals("name", "Dale")).await.expect("get"),
        Some(json!(35))
    );
}

#[tokio::test]
async fn nested_directories_are_created() {
    let dir = tempfile::tempdir().expect("dir");
    let config = StoreConfig::file("a/b/people.db").directory(dir.path());
    let store = Store::open(config).await.expect("store");
    people(&store).await;
    assert!(dir.path().join("a").join("b").join("people.db").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn native_mode_uses_the_file_directly() {
    let dir = tempfile::tempdir().expect("dir");
    let config = StoreConfig::file("native.db")
        .directory(dir.path())
        .client(Client::Native);
    {
        let store = Store::open(config.clone()).await.expect("store");
        assert_eq!(store.strategy(), Strategy::Direct);
        let people = people(&store).await;
        people.create(record(json!({"name": "Dale", "age": 30}))).await.expect("create");

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let people = Arc::clone(&people);
                tokio::spawn(async move { people.increment("age", Criteria::equals("name", "Dale"), 1).await })
            })
            .collect();
        for task in tasks {
            let updated = task.await.expect("join").expect("increment");
            assert_eq!(updated.len(), 1);
        }
        let leftovers = store
            .unit(trove::UnitKind::Read, |session| trove::capture::artifacts(session))
            .await
            .expect("artifacts");
        assert!(leftovers.is_empty());
        store.close().await.expect("close");
    }
    let store = Store::open(config).await.expect("reopen");
    let people = people(&store).await;
    assert_eq!(
        people.get("age", Criteria::equals("name", "Dale")).await.expect("get"),
        Some(json!(38))
    );
}

#[tokio::test]
async fn native_mode_in_memory_shares_one_connection() {
    let store = Store::open(StoreConfig::memory().client(Client::Native))
        .await
        .expect("store");
    assert_eq!(store.strategy(), Strategy::Direct);
    let people = people(&store).await;
    people.create(record(json!({"name": "Dale", "age": 30}))).await.expect("create");
    assert_eq!(people.count(None).await.expect("count"), 1);
}

#[test]
fn config_is_read_from_a_file() {
    let dir = tempfile::tempdir().expect("dir");
    let file = dir.path().join("trove.toml");
    std::fs::write(&file, "path = \"people.db\"\nclient = \"native\"\nbusy_timeout_ms = 250\n").expect("write");
    let config = StoreConfig::load(file.to_str().expect("utf-8")).expect("config");
    assert_eq!(config.path, "people.db");
    assert_eq!(config.client, Client::Native);
    assert_eq!(config.busy_timeout_ms, 250);
    assert!(config.directory.is_none());
}

#[test]
fn config_defaults_without_a_file() {
    let dir = tempfile::tempdir().expect("dir");
    let missing = dir.path().join("absent");
    let config = StoreConfig::load(missing.to_str().expect("utf-8")).expect("config");
    assert!(config.is_memory());
    assert_eq!(config.client, Client::Embedded);
    assert!(config.resolved_path().is_none());
}
