//! Schema for onboarding records and conversation logs.
//!
//! Versions are recorded in `_migrations`; a start-up only applies the
//! entries newer than the highest recorded version.

use libsql::Connection;

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Ordered by version. Append only.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "onboarding_records",
        sql: r#"
            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL UNIQUE,
                username TEXT NOT NULL UNIQUE,
                full_name TEXT,
                user_description TEXT,
                sailing_experience INTEGER,
                risk_level TEXT NOT NULL DEFAULT '[]',
                skills TEXT NOT NULL DEFAULT '[]',
                sailing_preferences TEXT,
                certifications TEXT,
                phone TEXT,
                roles TEXT NOT NULL DEFAULT '[]',
                preferred_departure_location TEXT,
                preferred_arrival_location TEXT,
                availability_start_date TEXT,
                availability_end_date TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS boats (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL,
                boat_type TEXT,
                make_model TEXT,
                capacity INTEGER,
                home_port TEXT,
                country_flag TEXT,
                loa_m REAL,
                year_built INTEGER,
                characteristics TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_boats_owner ON boats(owner_id);

            CREATE TABLE IF NOT EXISTS journeys (
                id TEXT PRIMARY KEY,
                boat_id TEXT NOT NULL REFERENCES boats(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                start_date TEXT,
                end_date TEXT,
                description TEXT,
                risk_level TEXT NOT NULL DEFAULT '[]',
                skills TEXT NOT NULL DEFAULT '[]',
                min_experience_level INTEGER,
                cost_model TEXT NOT NULL DEFAULT 'not_defined',
                state TEXT NOT NULL DEFAULT 'in_planning',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_journeys_boat ON journeys(boat_id);
            CREATE INDEX IF NOT EXISTS idx_journeys_state ON journeys(state);

            CREATE TABLE IF NOT EXISTS legs (
                id TEXT PRIMARY KEY,
                journey_id TEXT NOT NULL REFERENCES journeys(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                start_date TEXT,
                end_date TEXT,
                crew_needed INTEGER,
                waypoints TEXT NOT NULL DEFAULT '[]'
            );
            CREATE INDEX IF NOT EXISTS idx_legs_journey ON legs(journey_id);
        "#,
    },
    Migration {
        version: 2,
        name: "conversations",
        sql: r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                flow TEXT NOT NULL,
                user_id TEXT,
                started_at TEXT NOT NULL DEFAULT (datetime('now')),
                last_activity TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations(user_id);

            CREATE TABLE IF NOT EXISTS conversation_messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversation_messages_conversation
                ON conversation_messages(conversation_id);
        "#,
    },
];

const VERSION_TABLE: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
)";

fn migration_err(context: &str, e: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::Migration(format!("{context}: {e}"))
}

/// Bring the schema up to the latest version.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(VERSION_TABLE, ())
        .await
        .map_err(|e| migration_err("creating _migrations", e))?;

    let applied = applied_version(conn).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > applied).collect();
    if pending.is_empty() {
        tracing::debug!(version = applied, "Schema up to date");
        return Ok(());
    }

    for migration in pending {
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        let label = format!("V{} {}", migration.version, migration.name);
        conn.execute_batch(migration.sql)
            .await
            .map_err(|e| migration_err(&label, e))?;
        conn.execute(
            "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
            libsql::params![migration.version, migration.name],
        )
        .await
        .map_err(|e| migration_err(&format!("recording {label}"), e))?;
    }
    Ok(())
}

async fn applied_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| migration_err("reading schema version", e))?;
    let Some(row) = rows
        .next()
        .await
        .map_err(|e| migration_err("reading schema version", e))?
    else {
        return Ok(0);
    };
    row.get::<i64>(0)
        .map_err(|e| migration_err("decoding schema version", e))
}
