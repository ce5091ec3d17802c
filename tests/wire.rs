use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use centerbook::config::EngineConfig;
use centerbook::engine::Engine;
use centerbook::wire;

// ── Test infrastructure ──────────────────────────────────────

const DATE: &str = "2030-03-04";

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let engine = Arc::new(Engine::in_memory(EngineConfig::default()));

    let engine2 = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, "centerbook".to_string()).await;
            });
        }
    });

    (addr, engine)
}

async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("centerbook")
        .user("centerbook")
        .password("centerbook");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

fn data_rows(messages: Vec<SimpleQueryMessage>) -> Vec<SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

/// A center with one 45 minute service and one 9 hour service.
async fn seed(client: &tokio_postgres::Client) -> (Ulid, Ulid, Ulid) {
    let center = Ulid::new();
    let check = Ulid::new();
    let full_day = Ulid::new();
    let statements = [
        format!("INSERT INTO centers (id, name, location) VALUES ('{center}', 'North', '1 Harbour Rd')"),
        format!(
            "INSERT INTO services (id, name, category, duration_minutes, price_cents) \
             VALUES ('{check}', 'Check', 'service', 45, 9900)"
        ),
        format!(
            "INSERT INTO services (id, name, category, duration_minutes, price_cents) \
             VALUES ('{full_day}', 'Full build', 'modification', 540, 250000)"
        ),
    ];
    for sql in &statements {
        client.batch_execute(sql).await.unwrap();
    }
    (center, check, full_day)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn catalog_round_trip() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let (center, check, _) = seed(&client).await;

    let centers = data_rows(client.simple_query("SELECT * FROM centers").await.unwrap());
    assert_eq!(centers.len(), 1);
    assert_eq!(centers[0].get("id"), Some(center.to_string().as_str()));
    assert_eq!(centers[0].get("location"), Some("1 Harbour Rd"));

    let services = data_rows(client.simple_query("SELECT * FROM services").await.unwrap());
    assert_eq!(services.len(), 2);
    let row = services
        .iter()
        .find(|r| r.get("id") == Some(check.to_string().as_str()))
        .unwrap();
    assert_eq!(row.get("category"), Some("service"));
    assert_eq!(row.get("duration_minutes"), Some("45"));
}

#[tokio::test]
async fn book_then_list() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;
    let (center, check, _) = seed(&client).await;

    let booking = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, center_id, service_id, date, start_time, end_time, customer_name)
             VALUES ('{booking}', '{center}', '{check}', '{DATE}', '10:00', '10:45', 'Ada')"
        ))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!(
                "SELECT * FROM bookings WHERE center_id = '{center}' AND date = '{DATE}'"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(booking.to_string().as_str()));
    assert_eq!(rows[0].get("start_time"), Some("10:00:00"));
    assert_eq!(rows[0].get("end_time"), Some("10:45:00"));
    assert_eq!(rows[0].get("status"), Some("booked"));

    assert_eq!(engine.get_booking(booking).unwrap().customer_name, "Ada");
}

#[tokio::test]
async fn availability_lists_slots() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let (center, check, _) = seed(&client).await;

    let rows = data_rows(
        client
            .simple_query(&format!(
                "SELECT * FROM availability WHERE center_id = '{center}' AND date = '{DATE}' AND service_id = '{check}'"
            ))
            .await
            .unwrap(),
    );
    // Empty day: 12 offers exist, the shortlist keeps 10.
    assert_eq!(rows.len(), 10);
    assert!(rows.iter().all(|r| r.get("available") == Some("t")));
    assert_eq!(rows[0].get("start_time"), Some("09:00:00"));
    assert_eq!(rows[0].get("end_time"), Some("09:45:00"));
    assert_eq!(rows[1].get("start_time"), Some("09:45:00"));
}

#[tokio::test]
async fn full_day_reports_alternatives() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let (center, check, full_day) = seed(&client).await;

    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, center_id, service_id, date, start_time, end_time, customer_name)
             VALUES ('{}', '{center}', '{full_day}', '{DATE}', '09:00', '18:00', 'Fleet')",
            Ulid::new()
        ))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!(
                "SELECT * FROM availability WHERE center_id = '{center}' AND date = '{DATE}' AND service_id = '{check}'"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 3);
    for row in &rows {
        assert_eq!(row.get("available"), Some("f"));
        assert_eq!(row.get("message"), Some("No slots available on this date."));
        assert_eq!(row.get("slot_count"), Some("12"));
        assert_ne!(row.get("date"), Some(DATE));
    }
}

#[tokio::test]
async fn rejection_carries_sqlstate() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let (center, check, _) = seed(&client).await;

    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, center_id, service_id, date, start_time, end_time, customer_name)
             VALUES ('{}', '{center}', '{check}', '{DATE}', '10:00', '10:45', 'Ada')",
            Ulid::new()
        ))
        .await
        .unwrap();

    // Five minutes after the first one ends.
    let err = client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, center_id, service_id, date, start_time, end_time, customer_name)
             VALUES ('{}', '{center}', '{check}', '{DATE}', '10:50', '11:35', 'Grace')",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    let db = err.as_db_error().unwrap();
    assert_eq!(db.code().code(), "23P01");
    assert!(db.message().contains("5 min"), "{}", db.message());

    let err = client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, center_id, service_id, date, start_time, end_time, customer_name)
             VALUES ('{}', '{}', '{check}', '{DATE}', '12:00', '12:45', 'Linus')",
            Ulid::new(),
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(err.as_db_error().unwrap().code().code(), "P0002");
}

#[tokio::test]
async fn unknown_table_is_syntax_error() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;

    let err = client.simple_query("SELECT * FROM resources").await.unwrap_err();
    assert_eq!(err.as_db_error().unwrap().code().code(), "42601");
}

#[tokio::test]
async fn delete_cancels_booking() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;
    let (center, check, _) = seed(&client).await;

    let booking = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, center_id, service_id, date, start_time, end_time, customer_name, status)
             VALUES ('{booking}', '{center}', '{check}', '{DATE}', '10:00', '10:45', 'Ada', 'pending')"
        ))
        .await
        .unwrap();
    let pending = data_rows(client.simple_query("SELECT * FROM pending_bookings").await.unwrap());
    assert_eq!(pending.len(), 1);

    client
        .batch_execute(&format!("DELETE FROM bookings WHERE id = '{booking}'"))
        .await
        .unwrap();
    assert_eq!(
        engine.get_booking(booking).unwrap().status,
        centerbook::model::BookingStatus::Cancelled
    );
    assert!(data_rows(client.simple_query("SELECT * FROM pending_bookings").await.unwrap()).is_empty());
}

#[tokio::test]
async fn extended_protocol_binds_params() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let (center, check, _) = seed(&client).await;

    let booking = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, center_id, service_id, date, start_time, end_time, customer_name)
             VALUES ('{booking}', '{center}', '{check}', '{DATE}', '14:00', '14:45', 'Ada')"
        ))
        .await
        .unwrap();

    let center_param = center.to_string();
    let rows = client
        .query(
            "SELECT * FROM bookings WHERE center_id = $1 AND date = $2",
            &[&center_param.as_str(), &DATE],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let id: &str = rows[0].get("id");
    assert_eq!(id, booking.to_string());
    let name: &str = rows[0].get("customer_name");
    assert_eq!(name, "Ada");
}
