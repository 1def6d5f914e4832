use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::Row;

/// Parses a timestamp column stored either as INTEGER milliseconds or as a TEXT datetime.
///
/// SQLite type affinity lets both shapes end up in the same column, so the INTEGER
/// form is tried first and TEXT (RFC3339 or `YYYY-MM-DD HH:MM:SS[.f]`) second.
pub(crate) fn parse_timestamp<'r, R>(
    row: &'r R,
    column_name: &'r str,
) -> Result<DateTime<Utc>, sqlx::Error>
where
    R: Row,
    &'r str: sqlx::ColumnIndex<R>,
    i64: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    String: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
{
    if let Ok(timestamp_ms) = row.try_get::<i64, _>(column_name) {
        return DateTime::from_timestamp_millis(timestamp_ms)
            .ok_or_else(|| create_column_decode_error(column_name, "Invalid timestamp value"));
    }

    if let Ok(datetime_str) = row.try_get::<String, _>(column_name) {
        return parse_datetime_string(&datetime_str, column_name);
    }

    Err(create_column_decode_error(
        column_name,
        "Could not parse as INTEGER or DATETIME",
    ))
}

/// Decodes a TEXT column holding a JSON document.
pub(crate) fn parse_json_column<'r, R, T>(row: &'r R, column_name: &'r str) -> Result<T, sqlx::Error>
where
    R: Row,
    T: DeserializeOwned,
    &'r str: sqlx::ColumnIndex<R>,
    String: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
{
    let raw: String = row.try_get(column_name)?;
    serde_json::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: column_name.to_string(),
        source: Box::new(e),
    })
}

fn parse_datetime_string(
    datetime_str: &str,
    column_name: &str,
) -> Result<DateTime<Utc>, sqlx::Error> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
        return Ok(dt.with_timezone(&Utc));
    }

    let formats = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];
    for format in &formats {
        if let Ok(naive_dt) = NaiveDateTime::parse_from_str(datetime_str, format) {
            return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive_dt, Utc));
        }
    }

    Err(create_column_decode_error(
        column_name,
        &format!("Could not parse datetime string: '{}'", datetime_str),
    ))
}

/// Helper function to create consistent ColumnDecode errors.
pub(crate) fn create_column_decode_error(column_name: &str, message: &str) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column_name.to_string(),
        source: Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            message.to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        sqlx::query(
            "CREATE TABLE test_values (
                id INTEGER PRIMARY KEY,
                int_timestamp INTEGER,
                text_timestamp TEXT,
                json_value TEXT
            )",
        )
        .execute(&pool)
        .await
        .unwrap();

        pool
    }

    async fn fetch_row(pool: &SqlitePool) -> SqliteRow {
        sqlx::query("SELECT * FROM test_values WHERE id = 1")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_parse_timestamp_integer() {
        let pool = setup_test_db().await;
        let now_ms = Utc::now().timestamp_millis();

        sqlx::query("INSERT INTO test_values (id, int_timestamp) VALUES (1, ?)")
            .bind(now_ms)
            .execute(&pool)
            .await
            .unwrap();

        let row = fetch_row(&pool).await;
        let parsed = parse_timestamp(&row, "int_timestamp").unwrap();
        assert_eq!(parsed.timestamp_millis(), now_ms);
    }

    #[tokio::test]
    async fn test_parse_timestamp_text() {
        let pool = setup_test_db().await;

        sqlx::query("INSERT INTO test_values (id, text_timestamp) VALUES (1, ?)")
            .bind("2025-08-16 11:34:29")
            .execute(&pool)
            .await
            .unwrap();

        let row = fetch_row(&pool).await;
        let parsed = parse_timestamp(&row, "text_timestamp").unwrap();
        assert_eq!(parsed.year(), 2025);
        assert_eq!(parsed.month(), 8);
        assert_eq!(parsed.day(), 16);
        assert_eq!(parsed.hour(), 11);
        assert_eq!(parsed.second(), 29);
    }

    #[tokio::test]
    async fn test_parse_timestamp_garbage_text() {
        let pool = setup_test_db().await;

        sqlx::query("INSERT INTO test_values (id, text_timestamp) VALUES (1, ?)")
            .bind("yesterday-ish")
            .execute(&pool)
            .await
            .unwrap();

        let row = fetch_row(&pool).await;
        assert!(parse_timestamp(&row, "text_timestamp").is_err());
    }

    #[tokio::test]
    async fn test_parse_json_column() {
        let pool = setup_test_db().await;

        sqlx::query("INSERT INTO test_values (id, json_value) VALUES (1, ?)")
            .bind(r#"["a","b"]"#)
            .execute(&pool)
            .await
            .unwrap();

        let row = fetch_row(&pool).await;
        let parsed: Vec<String> = parse_json_column(&row, "json_value").unwrap();
        assert_eq!(parsed, vec!["a".to_string(), "b".to_string()]);

        let invalid: Result<Vec<u32>, _> = parse_json_column(&row, "json_value");
        assert!(matches!(invalid, Err(sqlx::Error::ColumnDecode { .. })));
    }
}
