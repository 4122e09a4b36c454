use std::net::SocketAddr;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

use tablebook::booking::{BookingConfig, ReservationService};
use tablebook::clock::FixedClock;
use tablebook::engine::Engine;
use tablebook::wire::{self, Service};

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Service>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("tablebook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("tablebook.wal")).unwrap());
    let now = NaiveDateTime::parse_from_str("2024-06-01 12:00", "%Y-%m-%d %H:%M").unwrap();
    let service = Arc::new(ReservationService::new(
        engine,
        Arc::new(FixedClock::new(now)),
        BookingConfig::default(),
    ));

    let svc = service.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let svc = svc.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, svc, "tablebook".to_string(), None).await;
            });
        }
    });

    (addr, service)
}

async fn connect(addr: SocketAddr) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("test")
        .user("host")
        .password("tablebook");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

/// Text values of `col` from every data row.
fn column(messages: &[SimpleQueryMessage], col: &str) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => row.get(col).map(str::to_string),
            _ => None,
        })
        .collect()
}

fn sqlstate(err: &tokio_postgres::Error) -> String {
    err.as_db_error()
        .map(|db| db.code().code().to_string())
        .unwrap_or_default()
}

async fn onboard(client: &Client) {
    client
        .batch_execute(
            "INSERT INTO locations (cafe_id, id, name) VALUES (1, 1, 'Main hall');
             INSERT INTO occasions (cafe_id, id, name) VALUES (1, 1, 'Just dinner');
             INSERT INTO tables (cafe_id, id, capacity, location_id) VALUES (1, 1, 2, 1);
             INSERT INTO tables (cafe_id, id, capacity, location_id) VALUES (1, 2, 4, 1);",
        )
        .await
        .unwrap();
}

const AVAILABLE_AT_19: &str = "SELECT * FROM available_tables WHERE cafe_id = 1 AND party_size = 2 \
     AND location_id = 1 AND book_date = '2024-06-01' AND book_time = '19:00'";

fn booking_sql(table_id: i64, time: &str, mobile: &str) -> String {
    format!(
        "INSERT INTO reservations (cafe_id, table_id, party_size, book_date, book_time, name, mobile, email, user_id) \
         VALUES (1, {table_id}, 2, '2024-06-01', '{time}', 'Aida', '{mobile}', 'aida@example.com', 7)"
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn slots_cover_the_default_day() {
    let (addr, _service) = start_test_server().await;
    let client = connect(addr).await;

    let rows = client.simple_query("SELECT * FROM slots").await.unwrap();
    let slots = column(&rows, "book_time");
    assert_eq!(slots.len(), 55);
    assert_eq!(slots.first().map(String::as_str), Some("11:00"));
    assert_eq!(slots.last().map(String::as_str), Some("00:30"));
}

#[tokio::test]
async fn book_conflict_and_free() {
    let (addr, _service) = start_test_server().await;
    let client = connect(addr).await;
    onboard(&client).await;

    let rows = client.simple_query(AVAILABLE_AT_19).await.unwrap();
    assert_eq!(column(&rows, "id"), vec!["1", "2"]);

    let rows = client.simple_query(&booking_sql(1, "19:00", "87011234567")).await.unwrap();
    let ids = column(&rows, "id");
    assert_eq!(ids.len(), 1);
    assert!(Ulid::from_string(&ids[0]).is_ok());

    let rows = client.simple_query(AVAILABLE_AT_19).await.unwrap();
    assert_eq!(column(&rows, "id"), vec!["2"]);

    // 20:29 still overlaps the 19:00 sitting
    let err = client
        .simple_query(&booking_sql(1, "20:29", "87011234567"))
        .await
        .err()
        .expect("statement should fail");
    assert_eq!(sqlstate(&err), "23P01");

    let rows = client
        .simple_query(
            "SELECT * FROM reservations WHERE user_id = 7",
        )
        .await
        .unwrap();
    assert_eq!(column(&rows, "book_time"), vec!["19:00"]);
    assert_eq!(column(&rows, "starts_in_minutes"), vec!["420"]);

    let freed = client
        .execute(
            "DELETE FROM reservations WHERE cafe_id = 1 AND table_id = 1 \
             AND book_date = '2024-06-01' AND book_time = '19:30'",
            &[],
        )
        .await
        .unwrap();
    assert_eq!(freed, 1);

    let rows = client.simple_query(AVAILABLE_AT_19).await.unwrap();
    assert_eq!(column(&rows, "id"), vec!["1", "2"]);
}

#[tokio::test]
async fn invalid_contact_details_are_rejected() {
    let (addr, service) = start_test_server().await;
    let client = connect(addr).await;
    onboard(&client).await;

    let err = client
        .simple_query(&booking_sql(1, "19:00", "123"))
        .await
        .err()
        .expect("statement should fail");
    assert_eq!(sqlstate(&err), "23514");
    assert!(service.repo().user_reservations(7).await.is_empty());
}

#[tokio::test]
async fn walk_in_and_lookups() {
    let (addr, _service) = start_test_server().await;
    let client = connect(addr).await;
    onboard(&client).await;

    let rows = client.simple_query("SELECT * FROM locations WHERE cafe_id = 1").await.unwrap();
    assert_eq!(column(&rows, "name"), vec!["Main hall"]);

    let rows = tokio_test::assert_ok!(
        client
            .simple_query(
                "INSERT INTO walk_ins (cafe_id, table_id, book_date, book_time) \
                 VALUES (1, 2, '2024-06-01', '13:00')",
            )
            .await
    );
    assert_eq!(column(&rows, "id").len(), 1);

    let rows = client
        .simple_query(
            "SELECT * FROM busy_tables WHERE cafe_id = 1 AND party_size = 2 \
             AND location_id = 1 AND book_date = '2024-06-01' AND book_time = '14:00'",
        )
        .await
        .unwrap();
    assert_eq!(column(&rows, "id"), vec!["2"]);
}

#[tokio::test]
async fn unknown_cafe_and_duplicates() {
    let (addr, _service) = start_test_server().await;
    let client = connect(addr).await;
    onboard(&client).await;

    let rows = client
        .simple_query(
            "SELECT * FROM available_tables WHERE cafe_id = 99 AND party_size = 2 \
             AND location_id = 1 AND book_date = '2024-06-01' AND book_time = '19:00'",
        )
        .await
        .unwrap();
    assert!(column(&rows, "id").is_empty());

    let err = client
        .batch_execute("INSERT INTO tables (cafe_id, id, capacity, location_id) VALUES (1, 1, 2, 1)")
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "23505");

    let err = client
        .simple_query("SELECT * FROM nowhere")
        .await
        .err()
        .expect("statement should fail");
    assert_eq!(sqlstate(&err), "42601");
}

#[tokio::test]
async fn bound_parameters_are_inlined_once() {
    let (addr, _service) = start_test_server().await;
    let client = connect(addr).await;
    onboard(&client).await;

    let rows = client
        .query(
            "INSERT INTO reservations (cafe_id, table_id, party_size, book_date, book_time, \
             name, mobile, email, user_id, description) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            &[
                &"1",
                &"2",
                &"2",
                &"2024-06-01",
                &"19:00",
                &"O'Neil",
                &"87011234567",
                &"oneil@example.com",
                &"9",
                &"coupon $1 off",
            ],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let id: String = rows[0].get("id");
    assert!(Ulid::from_string(&id).is_ok());

    let rows = client
        .simple_query("SELECT * FROM reservations WHERE user_id = 9")
        .await
        .unwrap();
    assert_eq!(column(&rows, "description"), vec!["coupon $1 off"]);
}

#[tokio::test]
async fn oversized_party_is_rejected() {
    let (addr, _service) = start_test_server().await;
    let client = connect(addr).await;
    onboard(&client).await;

    let err = client
        .simple_query(
            "INSERT INTO reservations (cafe_id, table_id, party_size, book_date, book_time, name, mobile, email) \
             VALUES (1, 1, 4, '2024-06-01', '19:00', 'Aida', '87011234567', 'aida@example.com')",
        )
        .await
        .err()
        .expect("statement should fail");
    assert_eq!(sqlstate(&err), "23514");
}
