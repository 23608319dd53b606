use tidal_orm::{
    Error,
    entity::{Entity, PrimaryKey},
    persistence::{FetchOptions, Filter, Persist},
    registry,
    value::Value,
};
use tidal_orm_tests::{CountingConnection, OrderItem, User, setup};

#[tokio::test]
async fn test_create_and_find() {
    let connection = setup().await;
    let users = User::using(&connection);

    let john = users
        .create([("name", "John"), ("email", "john@x.com")])
        .await
        .unwrap();

    let id = john.get::<i64>("id").unwrap();
    assert!(id > 0);
    assert!(john.exists());
    assert!(!john.is_dirty());

    let found = users.find(id).await.unwrap().unwrap();
    assert_eq!(found, john);
    assert_eq!(found.get::<String>("email").as_deref(), Some("john@x.com"));
    assert!(found.exists());
    assert!(!found.is_dirty());
    assert!(found.connection().is_some());

    assert!(users.find(id + 1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_validation_blocks_insert() {
    let connection = setup().await;

    let mut user = registry::create::<User>().unwrap();
    user.attach_connection(connection.clone());
    user.fill([("name", Value::from("  ")), ("age", Value::from(-1))]);

    let Err(Error::Validation(messages)) = user.save().await else {
        panic!("expected a validation error");
    };
    assert_eq!(messages.len(), 2);
    assert!(!user.exists());

    assert_eq!(User::using(&connection).count(Filter::All).await.unwrap(), 0);
}

#[tokio::test]
async fn test_save_unmodified_writes_nothing() {
    let connection = setup().await;
    User::using(&connection)
        .create([("name", "John")])
        .await
        .unwrap();

    let (counting, statements) = CountingConnection::wrap(connection);
    let mut user = User::using(&counting)
        .fetch_one(FetchOptions::new())
        .await
        .unwrap()
        .unwrap();
    statements.lock().unwrap().clear();

    assert!(user.save().await.unwrap());
    assert!(user.save().await.unwrap());
    assert!(statements.lock().unwrap().is_empty());

    user.set_attribute("email", "john@x.com");
    assert!(user.save().await.unwrap());
    assert_eq!(
        statements.lock().unwrap().as_slice(),
        ["UPDATE \"users\" SET \"email\" = ? WHERE \"id\" = ?"]
    );
}

#[tokio::test]
async fn test_save_clean_rehydrated_entity_needs_no_connection() {
    setup().await;

    let mut user =
        registry::from_json::<User>(&serde_json::json!({ "id": 1, "name": "John" })).unwrap();
    assert!(user.exists());
    assert!(!user.is_dirty());
    assert!(user.connection().is_none());

    assert!(user.save().await.unwrap());

    user.set_attribute("name", "Jane");
    assert!(matches!(user.save().await, Err(Error::NoConnection)));
}

#[tokio::test]
async fn test_update_refresh_delete() {
    let connection = setup().await;
    let users = User::using(&connection);

    let mut user = users.create([("name", "John")]).await.unwrap();
    user.fill([("name", Value::from("Johnny")), ("age", Value::from(31))]);
    assert!(user.is_dirty());
    assert_eq!(user.changes().len(), 2);

    assert!(user.save().await.unwrap());
    assert!(!user.is_dirty());

    // Another handle changes the row behind our back.
    let id = user.get::<i64>("id").unwrap();
    users
        .update_where([("age", 32)], Filter::eq("id", id))
        .await
        .unwrap();

    assert!(user.refresh().await.unwrap());
    assert_eq!(user.get::<i64>("age"), Some(32));
    assert!(!user.is_dirty());

    assert!(user.delete().await.unwrap());
    assert!(!user.exists());
    assert!(users.find(id).await.unwrap().is_none());
    assert!(!user.refresh().await.unwrap());
}

#[tokio::test]
async fn test_changing_the_key_updates_the_loaded_row() {
    let connection = setup().await;
    let users = User::using(&connection);

    let mut user = users.create([("name", "John")]).await.unwrap();
    let id = user.get::<i64>("id").unwrap();

    user.set_attribute("id", id + 100);
    assert!(user.save().await.unwrap());

    assert!(users.find(id).await.unwrap().is_none());
    assert!(users.find(id + 100).await.unwrap().is_some());
}

#[tokio::test]
async fn test_composite_key_entities() {
    let connection = setup().await;
    let items = OrderItem::using(&connection);

    let mut item = items
        .create([("order_id", 1), ("product_id", 2), ("quantity", 5)])
        .await
        .unwrap();
    assert_eq!(
        item.primary_key(),
        Some(PrimaryKey::composite([("order_id", 1), ("product_id", 2)]))
    );

    assert!(matches!(items.find(1).await, Err(Error::Argument(_))));

    let found = items
        .find(PrimaryKey::composite([("order_id", 1), ("product_id", 2)]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found, item);

    item.set_attribute("quantity", 7);
    assert!(item.save().await.unwrap());
    assert_eq!(
        items
            .fetch_one(FetchOptions::new().filter(Filter::eq("order_id", 1)))
            .await
            .unwrap()
            .unwrap()
            .get::<i64>("quantity"),
        Some(7)
    );

    assert!(item.delete().await.unwrap());
    assert!(!items.any(Filter::All).await.unwrap());
}

#[tokio::test]
async fn test_finder_helpers() {
    let connection = setup().await;
    let users = User::using(&connection);

    for (name, age) in [("Ann", 17), ("Bob", 25), ("Cid", 40)] {
        users
            .create([("name", Value::from(name)), ("age", Value::from(age))])
            .await
            .unwrap();
    }

    let adults = users.where_raw("age >= ?", [18]).await.unwrap();
    assert_eq!(adults.len(), 2);

    let bobs = users.where_eq("name", "Bob").await.unwrap();
    assert_eq!(bobs.len(), 1);

    let page = users
        .fetch_all(FetchOptions::new().order_by("age DESC").limit(1).offset(1))
        .await
        .unwrap();
    assert_eq!(page[0].get::<String>("name").as_deref(), Some("Bob"));

    assert_eq!(users.count(Filter::raw("age < ?", [30])).await.unwrap(), 2);
    assert_eq!(users.delete_where(Filter::eq("name", "Ann")).await.unwrap(), 1);
    assert_eq!(users.count(Filter::All).await.unwrap(), 2);
}

#[tokio::test]
async fn test_copy_with_is_independent() {
    let connection = setup().await;
    let users = User::using(&connection);

    let user = users
        .create([("name", "John"), ("email", "john@x.com")])
        .await
        .unwrap();

    let mut copy = user
        .copy_with([("email", "copy@x.com")])
        .unwrap();
    assert!(copy.exists());
    assert!(copy.is_dirty());
    assert_eq!(user.get::<String>("email").as_deref(), Some("john@x.com"));

    copy.save().await.unwrap();
    let reloaded = users
        .find(user.primary_key().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.get::<String>("email").as_deref(), Some("copy@x.com"));
}

#[tokio::test]
async fn test_json_round_trip() {
    let connection = setup().await;

    let user = User::using(&connection)
        .create([
            ("name", Value::from("John")),
            ("age", Value::from(30)),
            ("email", Value::Null),
        ])
        .await
        .unwrap();

    let restored = registry::from_json::<User>(&user.to_json()).unwrap();
    assert_eq!(restored, user);
    assert_eq!(restored.get_attribute("email"), Some(&Value::Null));
    assert!(restored.exists());
    assert!(!restored.is_dirty());
}
