use std::sync::Arc;

use serde_json::{json, Value};
use trove::sql::Direction;
use trove::{
    Column, Criteria, ExecuteOptions, FindOptions, Model, ModelOptions, Operator, QueryResult, Record, Schema,
    Store, StoreConfig, TroveError,
};

fn record(value: Value) -> Record {
    value.as_object().cloned().expect("object")
}

fn people_schema() -> Schema {
    Schema::new([("name", Column::string().primary()), ("age", Column::number())]).expect("schema")
}

async fn people(store: &Store) -> Arc<Model> {
    store
        .model("people", people_schema(), ModelOptions::default())
        .await
        .expect("model")
}

async fn with_rows(rows: &[Value]) -> (Store, Arc<Model>) {
    let store = Store::open(StoreConfig::memory()).await.expect("store");
    let model = people(&store).await;
    for row in rows {
        model.create(record(row.clone())).await.expect("create");
    }
    (store, model)
}

#[tokio::test]
async fn create_returns_the_stored_row() {
    let (_store, people) = with_rows(&[]).await;
    let created = people
        .create(record(json!({"name": "Dale", "age": 30})))
        .await
        .expect("create");
    assert_eq!(created, Some(record(json!({"name": "Dale", "age": 30}))));
}

#[tokio::test]
async fn increment_adds_to_the_matching_row() {
    let (_store, people) = with_rows(&[json!({"name": "Dale", "age": 30})]).await;
    let updated = people
        .increment("age", Criteria::equals("name", "Dale"), 5)
        .await
        .expect("increment");
    assert_eq!(updated, vec![record(json!({"name": "Dale", "age": 35}))]);
    let found = people
        .find_one(Some(Criteria::equals("name", "Dale")))
        .await
        .expect("find");
    assert_eq!(found, Some(record(json!({"name": "Dale", "age": 35}))));
}

#[tokio::test]
async fn decrement_stops_at_zero_by_default() {
    let (_store, people) = with_rows(&[json!({"name": "Dale", "age": 35})]).await;
    let updated = people
        .decrement("age", Criteria::equals("name", "Dale"), 100, false)
        .await
        .expect("decrement");
    assert_eq!(updated, vec![record(json!({"name": "Dale", "age": 0}))]);
}

#[tokio::test]
async fn decrement_may_go_negative_when_allowed() {
    let (_store, people) = with_rows(&[json!({"name": "Dale", "age": 35})]).await;
    let updated = people
        .decrement("age", Criteria::equals("name", "Dale"), 100, true)
        .await
        .expect("decrement");
    assert_eq!(updated[0]["age"], json!(-65));
}

#[tokio::test]
async fn multi_clause_find_and_combines() {
    let criteria = Criteria::from_json(&json!([["age", ">", 20], {"name": "Dale"}])).expect("criteria");

    let (_store, people) = with_rows(&[json!({"name": "Dale", "age": 30})]).await;
    let found = people
        .find(Some(criteria.clone()), FindOptions::default())
        .await
        .expect("find");
    assert_eq!(found, vec![record(json!({"name": "Dale", "age": 30}))]);

    let (_store, people) = with_rows(&[json!({"name": "Dale", "age": 10})]).await;
    let found = people.find(Some(criteria), FindOptions::default()).await.expect("find");
    assert!(found.is_empty());
}

#[tokio::test]
async fn find_orders_and_pages() {
    let (_store, people) = with_rows(&[
        json!({"name": "Ann", "age": 41}),
        json!({"name": "Bob", "age": 19}),
        json!({"name": "Cid", "age": 33}),
        json!({"name": "Dale", "age": 30}),
    ])
    .await;
    let names = people
        .find_column(
            "name",
            None,
            FindOptions::default().order_by("age", Direction::Desc).limit(2).offset(1),
        )
        .await
        .expect("find");
    assert_eq!(names, vec![json!("Cid"), json!("Dale")]);

    let all = people
        .find(None, FindOptions::default().order_by("name", Direction::Asc))
        .await
        .expect("find");
    assert_eq!(all.len(), 4);
    assert_eq!(all[0]["name"], json!("Ann"));

    let random = people
        .find(None, FindOptions::default().random().limit(3))
        .await
        .expect("find");
    assert_eq!(random.len(), 3);
}

#[tokio::test]
async fn find_one_without_criteria_selects_nothing() {
    let (store, people) = with_rows(&[json!({"name": "Dale", "age": 30})]).await;
    let statements = Arc::new(std::sync::Mutex::new(0usize));
    let counter = Arc::clone(&statements);
    store.on_query(true, move |_| {
        let counter = Arc::clone(&counter);
        async move { *counter.lock().expect("lock") += 1 }
    });
    assert_eq!(people.find_one(None).await.expect("find"), None);
    assert_eq!(*statements.lock().expect("lock"), 0);
    // an empty object is a selection that matches everything
    let found = people
        .find_one(Some(Criteria::Object(Vec::new())))
        .await
        .expect("find");
    assert_eq!(found, Some(record(json!({"name": "Dale", "age": 30}))));
}

#[tokio::test]
async fn get_and_set_work_on_single_columns() {
    let (_store, people) = with_rows(&[json!({"name": "Dale", "age": 30})]).await;
    assert_eq!(
        people.get("age", Criteria::equals("name", "Dale")).await.expect("get"),
        Some(json!(30))
    );
    assert_eq!(people.get("age", Criteria::equals("name", "Nobody")).await.expect("get"), None);
    let updated = people
        .set("age", Criteria::equals("name", "Dale"), 31)
        .await
        .expect("set");
    assert_eq!(updated, vec![record(json!({"name": "Dale", "age": 31}))]);
}

#[tokio::test]
async fn update_returns_every_changed_row() {
    let (_store, people) = with_rows(&[
        json!({"name": "Ann", "age": 41}),
        json!({"name": "Bob", "age": 19}),
        json!({"name": "Cid", "age": 33}),
    ])
    .await;
    let updated = people
        .update(Criteria::compare("age", Operator::Gt, 30), record(json!({"age": 50})))
        .await
        .expect("update");
    let mut names: Vec<Value> = updated.iter().map(|r| r["name"].clone()).collect();
    names.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
    assert_eq!(names, vec![json!("Ann"), json!("Cid")]);
    assert!(updated.iter().all(|r| r["age"] == json!(50)));

    // nothing to apply, nothing happens
    let untouched = people
        .update(Criteria::equals("name", "Bob"), Record::new())
        .await
        .expect("update");
    assert!(untouched.is_empty());
}

#[tokio::test]
async fn remove_returns_removed_rows() {
    let (_store, people) = with_rows(&[
        json!({"name": "Ann", "age": 41}),
        json!({"name": "Bob", "age": 19}),
    ])
    .await;
    let removed = people.remove(Criteria::equals("name", "Bob")).await.expect("remove");
    assert_eq!(removed, vec![record(json!({"name": "Bob", "age": 19}))]);
    // empty criteria never mean "everything"
    assert!(people.remove(Criteria::Object(Vec::new())).await.expect("remove").is_empty());
    assert_eq!(people.count(None).await.expect("count"), 1);
    assert_eq!(people.clear().await.expect("clear"), 1);
    assert_eq!(people.count(None).await.expect("count"), 0);
}

#[tokio::test]
async fn aggregates() {
    let (_store, people) = with_rows(&[
        json!({"name": "Ann", "age": 41}),
        json!({"name": "Bob", "age": 19}),
        json!({"name": "Cid", "age": 41}),
    ])
    .await;
    assert_eq!(people.count(None).await.expect("count"), 3);
    assert_eq!(
        people
            .count(Some(Criteria::compare("age", Operator::Ge, 41)))
            .await
            .expect("count"),
        2
    );
    assert_eq!(people.count_distinct("age", None).await.expect("count"), 2);
    assert_eq!(people.min("age", None).await.expect("min"), Some(json!(19)));
    assert_eq!(people.max("age", None).await.expect("max"), Some(json!(41)));
    assert_eq!(
        people
            .max("age", Some(Criteria::equals("name", "Nobody")))
            .await
            .expect("max"),
        None
    );
}

#[tokio::test]
async fn find_or_create_and_update_or_create() {
    let (_store, people) = with_rows(&[]).await;
    let criteria = Criteria::from(record(json!({"name": "Dale"})));
    let created = people
        .find_or_create(criteria.clone(), record(json!({"age": 30})))
        .await
        .expect("find_or_create");
    assert_eq!(created, Some(record(json!({"name": "Dale", "age": 30}))));
    let found = people
        .find_or_create(criteria.clone(), record(json!({"age": 99})))
        .await
        .expect("find_or_create");
    assert_eq!(found, Some(record(json!({"name": "Dale", "age": 30}))));

    let updated = people
        .update_or_create(criteria, record(json!({"age": 31})))
        .await
        .expect("update_or_create");
    assert_eq!(updated, vec![record(json!({"name": "Dale", "age": 31}))]);
    let created = people
        .update_or_create(Criteria::from(record(json!({"name": "Eve"}))), record(json!({"age": 22})))
        .await
        .expect("update_or_create");
    assert_eq!(created, vec![record(json!({"name": "Eve", "age": 22}))]);
    assert_eq!(people.count(None).await.expect("count"), 2);
}

#[tokio::test]
async fn increments_keys_and_defaults() {
    let store = Store::open(StoreConfig::memory()).await.expect("store");
    let notes = store
        .model(
            "notes",
            Schema::new([
                ("id", Column::increments()),
                ("body", Column::string().not_nullable()),
                ("pinned", Column::boolean().default_to(false)),
                ("tags", Column::array().default_to(json!([]))),
            ])
            .expect("schema"),
            ModelOptions::default(),
        )
        .await
        .expect("model");
    let first = notes.create(record(json!({"body": "a"}))).await.expect("create");
    let second = notes.create(record(json!({"body": "b", "tags": ["x"]}))).await.expect("create");
    assert_eq!(
        first,
        Some(record(json!({"id": 1, "body": "a", "pinned": false, "tags": []})))
    );
    assert_eq!(
        second,
        Some(record(json!({"id": 2, "body": "b", "pinned": false, "tags": ["x"]})))
    );
    match notes.create(record(json!({"pinned": true}))).await {
        Err(TroveError::Nullability { column, .. }) => assert_eq!(column, "body"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn timestamps_are_maintained() {
    let store = Store::open(StoreConfig::memory()).await.expect("store");
    let posts = store
        .model(
            "posts",
            Schema::new([("title", Column::string())]).expect("schema"),
            ModelOptions::default().timestamps(),
        )
        .await
        .expect("model");
    assert!(posts.schema().contains("created_at"));
    let created = posts
        .create(record(json!({"title": "hello"})))
        .await
        .expect("create")
        .expect("row");
    let stamp = created["created_at"].as_str().expect("string").to_owned();
    assert!(stamp.ends_with('Z'));
    assert_eq!(created["updated_at"], created["created_at"]);

    let updated = posts
        .update(
            Criteria::equals("title", "hello"),
            record(json!({"title": "bye", "updated_at": "2100-01-01T00:00:00.000Z"})),
        )
        .await
        .expect("update");
    assert_eq!(updated[0]["created_at"], json!(stamp));
    assert_eq!(updated[0]["updated_at"], json!("2100-01-01T00:00:00.000Z"));
}

#[tokio::test]
async fn models_are_created_once_per_name() {
    let store = Store::open(StoreConfig::memory()).await.expect("store");
    let first = people(&store).await;
    let other = Schema::new([("something", Column::json())]).expect("schema");
    let second = store.model("people", other, ModelOptions::default()).await.expect("model");
    assert!(Arc::ptr_eq(&first, &second));
    assert!(second.schema().contains("age"));
    assert!(store.has_model("people"));
    assert!(store.get_model("people").is_some());

    assert_eq!(store.tables().await.expect("tables"), vec!["people".to_owned()]);
    assert!(store.drop_model("people").await.expect("drop"));
    assert!(!store.has_model("people"));
    assert!(store.tables().await.expect("tables").is_empty());
    assert!(!store.drop_model("people").await.expect("drop"));
}

#[tokio::test]
async fn bad_definitions_are_schema_errors() {
    let store = Store::open(StoreConfig::memory()).await.expect("store");
    let result = store.model("bad name", people_schema(), ModelOptions::default()).await;
    assert!(matches!(result, Err(TroveError::Schema(_))));
    let result = store
        .model("people", people_schema(), ModelOptions::default().primary(["missing"]))
        .await;
    assert!(matches!(result, Err(TroveError::Schema(_))));
    assert!(!store.has_model("people"));

    assert!(matches!(Schema::new(Vec::<(&str, Column)>::new()), Err(TroveError::Schema(_))));
    assert!(matches!(
        Schema::new([("a", Column::number().nullable().not_nullable())]),
        Err(TroveError::Schema(_))
    ));
    assert!(matches!(
        Schema::new([("a", Column::increments()), ("b", Column::increments())]),
        Err(TroveError::Schema(_))
    ));
    assert!(matches!(
        Schema::new([("a", Column::increments()), ("b", Column::string().primary())]),
        Err(TroveError::Schema(_))
    ));
    assert!(matches!(
        Schema::new([("a", Column::string()), ("a", Column::number())]),
        Err(TroveError::Schema(_))
    ));
    assert!(matches!(
        Schema::from_json(&json!({"size": "float"})),
        Err(TroveError::Schema(_))
    ));
    let parsed = Schema::from_json(&json!({"name": {"unique": true}, "age": "number"})).expect("schema");
    assert_eq!(parsed.names(), vec!["name".to_owned(), "age".to_owned()]);
    assert_eq!(parsed.column("name").expect("column").kind(), trove::ColumnKind::String);
}

#[tokio::test]
async fn composite_keys_and_indexes() {
    let store = Store::open(StoreConfig::memory()).await.expect("store");
    let visits = store
        .model(
            "visits",
            Schema::new([
                ("person", Column::string().index("visits_by_place")),
                ("place", Column::string().index("visits_by_place")),
                ("at", Column::date()),
            ])
            .expect("schema"),
            ModelOptions::default().primary(["person", "place"]),
        )
        .await
        .expect("model");
    visits
        .create(record(json!({"person": "Dale", "place": "Oslo", "at": 0})))
        .await
        .expect("create");
    let duplicate = visits
        .create(record(json!({"person": "Dale", "place": "Oslo", "at": 1})))
        .await;
    assert!(matches!(duplicate, Err(TroveError::Backend(_))));

    let index = store
        .execute(
            "select name from sqlite_master where type = 'index' and name = 'visits_by_place'",
            ExecuteOptions::default(),
        )
        .await
        .expect("execute");
    assert_eq!(index, QueryResult::Present(true));
}

#[tokio::test]
async fn unknown_columns_fail_in_the_backend() {
    let (_store, people) = with_rows(&[json!({"name": "Dale", "age": 30})]).await;
    let result = people
        .find(Some(Criteria::equals("nickname", "D")), FindOptions::default())
        .await;
    assert!(matches!(result, Err(TroveError::Backend(_))));
    let result = people.create(record(json!({"name": "Eve", "nickname": "E"}))).await;
    assert!(matches!(result, Err(TroveError::Backend(_))));
}

#[tokio::test]
async fn misspelled_columns_remove_nothing() {
    let (_store, people) = with_rows(&[
        json!({"name": "Ann", "age": 41}),
        json!({"name": "Bob", "age": 19}),
        json!({"name": "Cid", "age": 33}),
    ])
    .await;
    let removed = people.remove(Criteria::compare("nmae", Operator::Ne, "Bob")).await;
    assert!(matches!(removed, Err(TroveError::Backend(_))));
    let found = people.find(Some(Criteria::equals("nmae", "Bob")), FindOptions::default()).await;
    assert!(matches!(found, Err(TroveError::Backend(_))));
    assert_eq!(people.count(None).await.expect("count"), 3);
}

#[tokio::test]
async fn invalid_dates_are_refused_before_writing() {
    let store = Store::open(StoreConfig::memory()).await.expect("store");
    let visits = store
        .model(
            "visits",
            Schema::new([("person", Column::string()), ("at", Column::date())]).expect("schema"),
            ModelOptions::default(),
        )
        .await
        .expect("model");
    let result = visits
        .create(record(json!({"person": "Dale", "at": 9_000_000_000_000_000i64})))
        .await;
    assert!(matches!(result, Err(TroveError::Type { column, .. }) if column == "at"));
    assert_eq!(visits.count(None).await.expect("count"), 0);
    assert!(visits.find(None, FindOptions::default()).await.expect("find").is_empty());
}

#[tokio::test]
async fn whole_reals_stay_reals() {
    let (_store, people) = with_rows(&[]).await;
    let created = people
        .create(record(json!({"name": "Dale", "age": 30.0})))
        .await
        .expect("create");
    assert_eq!(created, Some(record(json!({"name": "Dale", "age": 30.0}))));
    people.create(record(json!({"name": "Eve", "age": 22}))).await.expect("create");
    let found = people.find(None, FindOptions::default().order_by("name", Direction::Asc)).await.expect("find");
    assert_eq!(
        found,
        vec![
            record(json!({"name": "Dale", "age": 30.0})),
            record(json!({"name": "Eve", "age": 22})),
        ]
    );
    // integers and reals still compare numerically
    assert_eq!(people.count(Some(Criteria::equals("age", 30))).await.expect("count"), 1);
}

#[tokio::test]
async fn a_failed_drop_keeps_the_model() {
    let (store, _people) = with_rows(&[json!({"name": "Dale", "age": 30})]).await;
    store.execute("drop table people", ExecuteOptions::default()).await.expect("drop");
    store
        .execute("create view people as select 'Dale' as name", ExecuteOptions::default())
        .await
        .expect("view");
    let dropped = store.drop_model("people").await;
    assert!(matches!(dropped, Err(TroveError::Backend(_))));
    assert!(store.has_model("people"));
}

#[tokio::test]
async fn statements_without_a_response_still_run() {
    let (store, _people) = with_rows(&[json!({"name": "Dale", "age": 30})]).await;
    let selected = store.execute("select 1", ExecuteOptions::default()).await.expect("execute");
    assert_eq!(selected, QueryResult::Affected(0));
    let selected = store
        .execute("select age from people", ExecuteOptions::default())
        .await
        .expect("execute");
    assert_eq!(selected, QueryResult::Affected(0));
    let returned = store
        .execute("update people set age = age + 1 returning age", ExecuteOptions::default())
        .await
        .expect("execute");
    assert_eq!(returned, QueryResult::Affected(1));
}

#[tokio::test]
async fn raw_statements_and_introspection() {
    let (store, _people) = with_rows(&[json!({"name": "Dale", "age": 30})]).await;
    let present = store
        .execute(trove::sql::has_table("people"), ExecuteOptions::default())
        .await
        .expect("execute");
    assert_eq!(present, QueryResult::Present(true));
    let absent = store
        .execute("pragma table_info(\"nobody\")", ExecuteOptions::default())
        .await
        .expect("execute");
    assert_eq!(absent, QueryResult::Present(false));

    let affected = store
        .execute("update people set age = age + 1", ExecuteOptions::default())
        .await
        .expect("execute");
    assert_eq!(affected, QueryResult::Affected(1));
    match store
        .execute("select age from people", ExecuteOptions::rows())
        .await
        .expect("execute")
    {
        QueryResult::Rows(rows) => assert_eq!(rows[0][0].1.as_i64(), Some(31)),
        other => panic!("unexpected {other:?}"),
    }
    let broken = store.execute("select * from nowhere", ExecuteOptions::rows()).await;
    assert!(matches!(broken, Err(TroveError::Backend(_))));
}
