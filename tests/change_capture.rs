use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use trove::capture::{self, Armed, CaptureEvent};
use trove::{
    Column, Criteria, ExecuteOptions, ModelOptions, Record, Schema, Store, StoreConfig, TroveError, UnitKind,
};

fn record(value: Value) -> Record {
    value.as_object().cloned().expect("object")
}

async fn setup() -> (Store, Arc<trove::Model>) {
    let store = Store::open(StoreConfig::memory()).await.expect("store");
    let people = store
        .model(
            "people",
            Schema::new([
                ("name", Column::string().primary()),
                ("email", Column::string().unique()),
                ("age", Column::number()),
            ])
            .expect("schema"),
            ModelOptions::default(),
        )
        .await
        .expect("model");
    (store, people)
}

async fn artifacts(store: &Store) -> Vec<String> {
    store
        .unit(UnitKind::Read, |session| capture::artifacts(session))
        .await
        .expect("artifacts")
}

#[tokio::test]
async fn exactly_one_pair_exists_while_armed() {
    let (store, _people) = setup().await;
    let (during, after) = store
        .unit(UnitKind::Write, |session| {
            let columns = vec!["name".to_owned(), "email".to_owned(), "age".to_owned()];
            let mut armed = Armed::arm(session, "people", "people", CaptureEvent::Update, &columns)?;
            let during = capture::artifacts(armed.session())?;
            armed.disarm()?;
            let after = capture::artifacts(session)?;
            Ok((during, after))
        })
        .await
        .expect("unit");
    assert_eq!(
        during,
        vec!["trove_capture_people".to_owned(), "trove_capture_people_update".to_owned()]
    );
    assert!(after.is_empty());
}

#[tokio::test]
async fn dropping_an_armed_guard_tears_down() {
    let (store, _people) = setup().await;
    let after = store
        .unit(UnitKind::Write, |session| {
            let columns = vec!["name".to_owned()];
            {
                let _armed = Armed::arm(session, "people", "people", CaptureEvent::Delete, &columns)?;
            }
            capture::artifacts(session)
        })
        .await
        .expect("unit");
    assert!(after.is_empty());
}

#[tokio::test]
async fn nothing_is_left_behind_after_success() {
    let (store, people) = setup().await;
    people
        .create(record(json!({"name": "Dale", "email": "dale@example.com", "age": 30})))
        .await
        .expect("create");
    people
        .update(Criteria::equals("name", "Dale"), record(json!({"age": 31})))
        .await
        .expect("update");
    people.increment("age", Criteria::equals("name", "Dale"), 1).await.expect("increment");
    people.remove(Criteria::equals("name", "Dale")).await.expect("remove");
    assert!(artifacts(&store).await.is_empty());
}

#[tokio::test]
async fn nothing_is_left_behind_after_a_failed_statement() {
    let (store, people) = setup().await;
    people
        .create(record(json!({"name": "Ann", "email": "ann@example.com", "age": 41})))
        .await
        .expect("create");
    people
        .create(record(json!({"name": "Bob", "email": "bob@example.com", "age": 19})))
        .await
        .expect("create");
    let clash = people
        .update(Criteria::equals("name", "Bob"), record(json!({"email": "ann@example.com"})))
        .await;
    assert!(matches!(clash, Err(TroveError::Backend(_))));
    assert!(artifacts(&store).await.is_empty());
    // the failed unit rolled back as a whole
    let bob = people
        .find_one(Some(Criteria::equals("name", "Bob")))
        .await
        .expect("find")
        .expect("bob");
    assert_eq!(bob["email"], json!("bob@example.com"));
}

#[tokio::test]
async fn the_capture_protocol_runs_in_order() {
    let (store, people) = setup().await;
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    store.on_query(true, move |event| {
        let sink = Arc::clone(&sink);
        async move { sink.lock().expect("lock").push((event.internal, event.sql)) }
    });
    people
        .create(record(json!({"name": "Dale", "email": "d@example.com", "age": 30})))
        .await
        .expect("create");
    let log = log.lock().expect("lock").clone();
    let shapes: Vec<(bool, &str)> = log
        .iter()
        .map(|(internal, sql)| (*internal, sql.split_whitespace().take(3).last().unwrap_or("")))
        .collect();
    assert_eq!(
        shapes,
        vec![
            (true, "table"),
            (true, "trigger"),
            (false, "\"people\""),
            (true, "from"),
            (true, "if"),
            (true, "if"),
        ]
    );
    assert!(log[2].1.starts_with("insert into \"people\""));
    assert!(log[4].1.starts_with("drop trigger"));
    assert!(log[5].1.starts_with("drop table"));
}

#[tokio::test]
async fn setup_failure_skips_the_statement() {
    let (store, people) = setup().await;
    people
        .create(record(json!({"name": "Dale", "email": "d@example.com", "age": 30})))
        .await
        .expect("create");
    store
        .execute("drop table people", ExecuteOptions::default())
        .await
        .expect("drop");

    let statements = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&statements);
    people.on_query(false, move |event| {
        let sink = Arc::clone(&sink);
        async move { sink.lock().expect("lock").push(event.sql) }
    });
    match people.update(Criteria::equals("name", "Dale"), record(json!({"age": 31}))).await {
        Err(TroveError::CaptureSetup { model, .. }) => assert_eq!(model, "people"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(statements.lock().expect("lock").is_empty());
    assert!(artifacts(&store).await.is_empty());
}

#[tokio::test]
async fn deletes_capture_the_old_rows() {
    let (_store, people) = setup().await;
    for (name, age) in [("Ann", 41), ("Bob", 19), ("Cid", 33)] {
        people
            .create(record(json!({"name": name, "email": format!("{name}@example.com"), "age": age})))
            .await
            .expect("create");
    }
    let removed = people
        .remove(Criteria::compare("age", trove::Operator::Lt, 40))
        .await
        .expect("remove");
    let mut names: Vec<String> = removed
        .iter()
        .map(|r| r["name"].as_str().unwrap_or_default().to_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["Bob".to_owned(), "Cid".to_owned()]);
    assert_eq!(removed.iter().find(|r| r["name"] == json!("Bob")).expect("bob")["age"], json!(19));
}
