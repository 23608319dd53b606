use tidal_orm::{
    Error,
    connection::ConnectionRef,
    entity::Entity,
    persistence::{FetchOptions, Filter},
    value::Value,
};
use tidal_orm_tests::{Post, User, setup};

async fn seed(connection: &ConnectionRef) {
    let users = User::using(connection);

    for (name, age, active) in [
        ("Dora", 30, true),
        ("Ann", 17, true),
        ("Bob", 25, false),
        ("Cid", 40, true),
        ("Eve", 19, true),
    ] {
        users
            .create([
                ("name", Value::from(name)),
                ("age", Value::from(age)),
                ("active", Value::from(active)),
            ])
            .await
            .unwrap();
    }
}

fn names(users: &[User]) -> Vec<String> {
    users
        .iter()
        .filter_map(|e| e.get::<String>("name"))
        .collect()
}

#[tokio::test]
async fn test_filter_order_limit() {
    let connection = setup().await;
    seed(&connection).await;

    for (name, age) in [("Fay", 21), ("Gus", 22), ("Hal", 23), ("Ivy", 50), ("Jon", 60)] {
        User::using(&connection)
            .create([
                ("name", Value::from(name)),
                ("age", Value::from(age)),
                ("active", Value::from(true)),
            ])
            .await
            .unwrap();
    }

    let query = || {
        User::query_on(&connection)
            .filter("age", ">", 18)
            .filter("active", "=", true)
            .order_by("name")
            .limit(5)
    };

    let statement = query().to_statement().unwrap();
    assert_eq!(statement.parameters, vec![Value::Int(18), Value::Bool(true)]);

    let users = query().get().await.unwrap();
    assert_eq!(names(&users), ["Cid", "Dora", "Eve", "Fay", "Gus"]);
    assert!(users.iter().all(|e| e.get::<bool>("active") == Some(true)));

    let rest = query().offset(5).get().await.unwrap();
    assert_eq!(names(&rest), ["Hal", "Ivy", "Jon"]);
}

#[tokio::test]
async fn test_paging_does_not_affect_count() {
    let connection = setup().await;
    seed(&connection).await;

    let page = User::query_on(&connection)
        .order_by("name")
        .limit(2)
        .offset(1);
    assert_eq!(names(&page.get().await.unwrap()), ["Bob", "Cid"]);
    assert_eq!(page.count().await.unwrap(), 5);
    assert!(page.exists().await.unwrap());

    let skipped = User::query_on(&connection)
        .order_by("name")
        .offset(3)
        .get()
        .await
        .unwrap();
    assert_eq!(names(&skipped), ["Dora", "Eve"]);

    let fetched = User::using(&connection)
        .fetch_all(FetchOptions::new().order_by("name DESC").offset(4))
        .await
        .unwrap();
    assert_eq!(names(&fetched), ["Ann"]);
}

#[tokio::test]
async fn test_where_family() {
    let connection = setup().await;
    seed(&connection).await;

    let query = || User::query_on(&connection).order_by("name");

    let picked = query().filter_in("name", ["Ann", "Eve", "Zed"]).get().await.unwrap();
    assert_eq!(names(&picked), ["Ann", "Eve"]);

    let none = query().filter_in("name", Vec::<String>::new()).get().await.unwrap();
    assert!(none.is_empty());

    let rest = query().filter_not_in("name", ["Ann", "Bob"]).get().await.unwrap();
    assert_eq!(names(&rest), ["Cid", "Dora", "Eve"]);

    let between = query().filter_between("age", 19, 30).get().await.unwrap();
    assert_eq!(names(&between), ["Bob", "Dora", "Eve"]);

    let outside = query().filter_not_between("age", 19, 30).get().await.unwrap();
    assert_eq!(names(&outside), ["Ann", "Cid"]);

    let like = query().filter_like("name", "%o%").get().await.unwrap();
    assert_eq!(names(&like), ["Bob", "Dora"]);

    let either = query()
        .filter("age", "<", 18)
        .or_filter("age", ">=", 40)
        .get()
        .await
        .unwrap();
    assert_eq!(names(&either), ["Ann", "Cid"]);

    let raw = query()
        .filter_raw("age % ? = 0", [10])
        .get()
        .await
        .unwrap();
    assert_eq!(names(&raw), ["Cid", "Dora"]);
}

#[tokio::test]
async fn test_null_checks() {
    let connection = setup().await;
    seed(&connection).await;

    User::query_on(&connection)
        .filter_eq("name", "Bob")
        .update([("email", "bob@x.com")])
        .await
        .unwrap();

    let with_email = User::query_on(&connection)
        .filter_not_null("email")
        .get()
        .await
        .unwrap();
    assert_eq!(names(&with_email), ["Bob"]);

    let without_email = User::query_on(&connection)
        .filter_null("email")
        .count()
        .await
        .unwrap();
    assert_eq!(without_email, 4);
}

#[tokio::test]
async fn test_aggregates() {
    let connection = setup().await;
    seed(&connection).await;

    let adults = User::query_on(&connection)
        .select(["name"])
        .filter("age", ">=", 18);

    assert_eq!(adults.count().await.unwrap(), 4);
    assert_eq!(adults.count_column("age").await.unwrap(), 4);
    assert!(adults.exists().await.unwrap());
    assert!(
        !User::query_on(&connection)
            .filter("age", ">", 100)
            .exists()
            .await
            .unwrap()
    );

    let mut plucked = adults.order_by("name").pluck("name").await.unwrap();
    assert_eq!(plucked.remove(0), Value::from("Bob"));
    assert_eq!(plucked.len(), 3);

    let grouped = User::query_on(&connection)
        .select(["active"])
        .distinct()
        .group_by(["active"])
        .having("COUNT(*)", ">", 1)
        .rows()
        .await
        .unwrap();
    assert_eq!(grouped.len(), 1);
    assert_eq!(
        grouped[0].get("active").and_then(|e| e.to::<bool>()),
        Some(true)
    );
}

#[tokio::test]
async fn test_update_and_delete() {
    let connection = setup().await;
    seed(&connection).await;

    let minors = User::query_on(&connection).filter("age", "<", 18);
    assert_eq!(minors.update([("active", false)]).await.unwrap(), 1);
    assert!(matches!(
        minors.update(Vec::<(String, Value)>::new()).await,
        Err(Error::Argument(_))
    ));

    let inactive = User::query_on(&connection)
        .filter_eq("active", false)
        .delete()
        .await
        .unwrap();
    assert_eq!(inactive, 2);
    assert_eq!(User::using(&connection).count(Filter::All).await.unwrap(), 3);
}

#[tokio::test]
async fn test_joins() {
    let connection = setup().await;
    seed(&connection).await;

    let dora = User::using(&connection)
        .where_eq("name", "Dora")
        .await
        .unwrap()
        .remove(0);
    let dora_id = dora.get::<i64>("id").unwrap();

    for (title, position) in [("first", 1), ("second", 2)] {
        Post::using(&connection)
            .create([
                ("user_id", Value::from(dora_id)),
                ("title", Value::from(title)),
                ("position", Value::from(position)),
            ])
            .await
            .unwrap();
    }

    let authors = User::query_on(&connection)
        .select(["users.*"])
        .distinct()
        .join("posts", "posts.user_id", "=", "users.id")
        .get()
        .await
        .unwrap();
    assert_eq!(authors, vec![dora]);

    let everyone = User::query_on(&connection)
        .left_join("posts", "posts.user_id", "=", "users.id")
        .select(["users.name", "posts.title"])
        .filter_null("posts.id")
        .rows()
        .await
        .unwrap();
    assert_eq!(everyone.len(), 4);
}

#[tokio::test]
async fn test_terminal_errors() {
    let connection = setup().await;

    let missing = User::query_on(&connection)
        .filter_eq("name", "nobody")
        .first_or_fail()
        .await;
    assert!(matches!(missing, Err(Error::NotFound(_))));

    let invalid = User::query_on(&connection)
        .filter("age", "=~", 1)
        .get()
        .await;
    assert!(matches!(invalid, Err(Error::Argument(_))));

    let broken = User::query_on(&connection)
        .table("no_such_table")
        .rows()
        .await;
    let Err(Error::Query { sql, .. }) = broken else {
        panic!("expected a query error");
    };
    assert_eq!(sql, "SELECT * FROM \"no_such_table\"");
}
