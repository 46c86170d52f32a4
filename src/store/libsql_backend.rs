//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Vector-valued fields
//! (risk levels, skills, roles, locations, waypoints) are stored as JSON text.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::onboarding::model::{
    Boat, BoatCategory, CostModel, ExperienceLevel, Journey, JourneyListing, JourneyState, Leg,
    Profile, RiskLevel, Waypoint,
};
use crate::store::migrations;
use crate::store::traits::{ConversationMessage, Database, JourneySearch};

/// libSQL database backend.
///
/// One connection, handed out behind an async mutex. Every operation holds
/// the lock until it finishes, so a journey transaction never absorbs
/// writes from a concurrent turn.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Mutex<Connection>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn: Mutex::new(conn),
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn: Mutex::new(conn),
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Take exclusive use of the connection.
    async fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_date(s: Option<String>) -> Option<NaiveDate> {
    s.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

/// Decode a JSON column, falling back to the type's default on bad data.
fn from_json<T: DeserializeOwned + Default>(column: &str, raw: Option<String>) -> T {
    match raw {
        Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            debug!(column, error = %e, "Unreadable JSON column, using default");
            T::default()
        }),
        None => T::default(),
    }
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

fn opt_real(v: Option<f64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Real(v),
        None => libsql::Value::Null,
    }
}

fn opt_date(d: Option<NaiveDate>) -> libsql::Value {
    opt_text_owned(d.map(|d| d.format("%Y-%m-%d").to_string()))
}

fn opt_json<T: Serialize>(v: Option<&T>) -> Result<libsql::Value, DatabaseError> {
    Ok(opt_text_owned(v.map(to_json).transpose()?))
}

fn boat_category_from_label(label: &str) -> Option<BoatCategory> {
    BoatCategory::ALL.into_iter().find(|c| c.label() == label)
}

fn cost_model_from_str(s: &str) -> CostModel {
    CostModel::ALL
        .into_iter()
        .find(|c| c.as_str() == s)
        .unwrap_or(CostModel::NotDefined)
}

fn experience_from_column(v: Option<i64>) -> Option<ExperienceLevel> {
    v.and_then(ExperienceLevel::from_level)
}

// ── Row mapping ─────────────────────────────────────────────────────

const PROFILE_COLUMNS: &str = "id, user_id, username, full_name, user_description, \
    sailing_experience, risk_level, skills, sailing_preferences, certifications, phone, roles, \
    preferred_departure_location, preferred_arrival_location, availability_start_date, \
    availability_end_date, created_at, updated_at";

const BOAT_COLUMNS: &str = "id, owner_id, name, boat_type, make_model, capacity, home_port, \
    country_flag, loa_m, year_built, characteristics, created_at, updated_at";

const JOURNEY_COLUMNS: &str = "j.id, j.boat_id, j.name, j.start_date, j.end_date, j.description, \
    j.risk_level, j.skills, j.min_experience_level, j.cost_model, j.state, j.created_at";

fn row_to_profile(row: &libsql::Row) -> Result<Profile, libsql::Error> {
    let id: String = row.get(0)?;
    let created: String = row.get(16)?;
    let updated: String = row.get(17)?;
    Ok(Profile {
        id: parse_uuid(&id),
        user_id: row.get(1)?,
        username: row.get(2)?,
        full_name: row.get(3).ok(),
        user_description: row.get(4).ok(),
        sailing_experience: experience_from_column(row.get(5).ok()),
        risk_level: from_json("profiles.risk_level", row.get(6).ok()),
        skills: from_json("profiles.skills", row.get(7).ok()),
        sailing_preferences: row.get(8).ok(),
        certifications: row.get(9).ok(),
        phone: row.get(10).ok(),
        roles: from_json("profiles.roles", row.get(11).ok()),
        preferred_departure_location: from_json("profiles.departure", row.get(12).ok()),
        preferred_arrival_location: from_json("profiles.arrival", row.get(13).ok()),
        availability_start_date: parse_date(row.get(14).ok()),
        availability_end_date: parse_date(row.get(15).ok()),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_boat(row: &libsql::Row) -> Result<Boat, libsql::Error> {
    let id: String = row.get(0)?;
    let boat_type: Option<String> = row.get(3).ok();
    let created: String = row.get(11)?;
    let updated: String = row.get(12)?;
    Ok(Boat {
        id: parse_uuid(&id),
        owner_id: row.get(1)?,
        name: row.get(2)?,
        boat_type: boat_type.as_deref().and_then(boat_category_from_label),
        make_model: row.get(4).ok(),
        capacity: row.get(5).ok(),
        home_port: row.get(6).ok(),
        country_flag: row.get(7).ok(),
        loa_m: row.get(8).ok(),
        year_built: row.get(9).ok(),
        characteristics: row.get(10).ok(),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_journey(row: &libsql::Row) -> Result<Journey, libsql::Error> {
    let id: String = row.get(0)?;
    let boat_id: String = row.get(1)?;
    let cost_model: String = row.get(9)?;
    let state: String = row.get(10)?;
    let created: String = row.get(11)?;
    Ok(Journey {
        id: parse_uuid(&id),
        boat_id: parse_uuid(&boat_id),
        name: row.get(2)?,
        start_date: parse_date(row.get(3).ok()),
        end_date: parse_date(row.get(4).ok()),
        description: row.get(5).ok(),
        risk_level: from_json("journeys.risk_level", row.get(6).ok()),
        skills: from_json("journeys.skills", row.get(7).ok()),
        min_experience_level: experience_from_column(row.get(8).ok()),
        cost_model: cost_model_from_str(&cost_model),
        state: JourneyState::parse(&state),
        created_at: parse_datetime(&created),
    })
}

fn row_to_leg(row: &libsql::Row) -> Result<Leg, libsql::Error> {
    let id: String = row.get(0)?;
    let journey_id: String = row.get(1)?;
    let waypoints: Vec<Waypoint> = from_json("legs.waypoints", row.get(6).ok());
    Ok(Leg {
        id: parse_uuid(&id),
        journey_id: parse_uuid(&journey_id),
        name: row.get(2)?,
        start_date: parse_date(row.get(3).ok()),
        end_date: parse_date(row.get(4).ok()),
        crew_needed: row.get(5).ok(),
        waypoints,
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(&*self.conn().await).await
    }

    // ── Profiles ────────────────────────────────────────────────────

    async fn get_profile_by_user(&self, user_id: &str) -> Result<Option<Profile>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id = ?1"),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_profile_by_user: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_profile(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_profile_by_user row: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_profile_by_user: {e}"))),
        }
    }

    async fn username_exists(&self, username: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM profiles WHERE username = ?1",
                params![username],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("username_exists: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) > 0),
            Ok(None) => Ok(false),
            Err(e) => Err(DatabaseError::Query(format!("username_exists: {e}"))),
        }
    }

    async fn insert_profile(&self, profile: &Profile) -> Result<(), DatabaseError> {
        self.conn()
            .await
            .execute(
                &format!(
                    "INSERT INTO profiles ({PROFILE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
                ),
                params![
                    profile.id.to_string(),
                    profile.user_id.as_str(),
                    profile.username.as_str(),
                    opt_text(profile.full_name.as_deref()),
                    opt_text(profile.user_description.as_deref()),
                    opt_int(profile.sailing_experience.map(|l| i64::from(l.level()))),
                    to_json(&profile.risk_level)?,
                    to_json(&profile.skills)?,
                    opt_text(profile.sailing_preferences.as_deref()),
                    opt_text(profile.certifications.as_deref()),
                    opt_text(profile.phone.as_deref()),
                    to_json(&profile.roles)?,
                    opt_json(profile.preferred_departure_location.as_ref())?,
                    opt_json(profile.preferred_arrival_location.as_ref())?,
                    opt_date(profile.availability_start_date),
                    opt_date(profile.availability_end_date),
                    profile.created_at.to_rfc3339(),
                    profile.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("UNIQUE") {
                    DatabaseError::Constraint(format!("insert_profile: {msg}"))
                } else {
                    DatabaseError::Query(format!("insert_profile: {msg}"))
                }
            })?;

        debug!(user_id = %profile.user_id, username = %profile.username, "Profile inserted");
        Ok(())
    }

    async fn update_profile(&self, profile: &Profile) -> Result<(), DatabaseError> {
        let conn = self.conn().await;
        let affected = conn
            .execute(
                "UPDATE profiles SET full_name = ?2, user_description = ?3,
                    sailing_experience = ?4, risk_level = ?5, skills = ?6,
                    sailing_preferences = ?7, certifications = ?8, phone = ?9, roles = ?10,
                    preferred_departure_location = ?11, preferred_arrival_location = ?12,
                    availability_start_date = ?13, availability_end_date = ?14, updated_at = ?15
                 WHERE id = ?1",
                params![
                    profile.id.to_string(),
                    opt_text(profile.full_name.as_deref()),
                    opt_text(profile.user_description.as_deref()),
                    opt_int(profile.sailing_experience.map(|l| i64::from(l.level()))),
                    to_json(&profile.risk_level)?,
                    to_json(&profile.skills)?,
                    opt_text(profile.sailing_preferences.as_deref()),
                    opt_text(profile.certifications.as_deref()),
                    opt_text(profile.phone.as_deref()),
                    to_json(&profile.roles)?,
                    opt_json(profile.preferred_departure_location.as_ref())?,
                    opt_json(profile.preferred_arrival_location.as_ref())?,
                    opt_date(profile.availability_start_date),
                    opt_date(profile.availability_end_date),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_profile: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "profile".to_string(),
                id: profile.id.to_string(),
            });
        }
        Ok(())
    }

    // ── Boats ───────────────────────────────────────────────────────

    async fn list_boats_by_owner(&self, owner_id: &str) -> Result<Vec<Boat>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {BOAT_COLUMNS} FROM boats WHERE owner_id = ?1 ORDER BY created_at ASC"
                ),
                params![owner_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_boats_by_owner: {e}")))?;

        let mut boats = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_boat(&row) {
                Ok(boat) => boats.push(boat),
                Err(e) => tracing::warn!("Skipping malformed boat row: {e}"),
            }
        }
        Ok(boats)
    }

    async fn get_boat(&self, id: Uuid) -> Result<Option<Boat>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                &format!("SELECT {BOAT_COLUMNS} FROM boats WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_boat: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_boat(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_boat row: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_boat: {e}"))),
        }
    }

    async fn insert_boat(&self, boat: &Boat) -> Result<(), DatabaseError> {
        self.conn()
            .await
            .execute(
                &format!(
                    "INSERT INTO boats ({BOAT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    boat.id.to_string(),
                    boat.owner_id.as_str(),
                    boat.name.as_str(),
                    opt_text(boat.boat_type.map(|c| c.label())),
                    opt_text(boat.make_model.as_deref()),
                    opt_int(boat.capacity),
                    opt_text(boat.home_port.as_deref()),
                    opt_text(boat.country_flag.as_deref()),
                    opt_real(boat.loa_m),
                    opt_int(boat.year_built),
                    opt_text(boat.characteristics.as_deref()),
                    boat.created_at.to_rfc3339(),
                    boat.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_boat: {e}")))?;

        debug!(boat_id = %boat.id, owner_id = %boat.owner_id, "Boat inserted");
        Ok(())
    }

    async fn update_boat(&self, boat: &Boat) -> Result<(), DatabaseError> {
        let conn = self.conn().await;
        let affected = conn
            .execute(
                "UPDATE boats SET name = ?2, boat_type = ?3, make_model = ?4, capacity = ?5,
                    home_port = ?6, country_flag = ?7, loa_m = ?8, year_built = ?9,
                    characteristics = ?10, updated_at = ?11
                 WHERE id = ?1",
                params![
                    boat.id.to_string(),
                    boat.name.as_str(),
                    opt_text(boat.boat_type.map(|c| c.label())),
                    opt_text(boat.make_model.as_deref()),
                    opt_int(boat.capacity),
                    opt_text(boat.home_port.as_deref()),
                    opt_text(boat.country_flag.as_deref()),
                    opt_real(boat.loa_m),
                    opt_int(boat.year_built),
                    opt_text(boat.characteristics.as_deref()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_boat: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "boat".to_string(),
                id: boat.id.to_string(),
            });
        }
        Ok(())
    }

    // ── Journeys ────────────────────────────────────────────────────

    async fn insert_journey_with_legs(
        &self,
        journey: &Journey,
        legs: &[Leg],
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("begin journey transaction: {e}")))?;

        let result = async {
            tx.execute(
                "INSERT INTO journeys (id, boat_id, name, start_date, end_date, description,
                    risk_level, skills, min_experience_level, cost_model, state, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    journey.id.to_string(),
                    journey.boat_id.to_string(),
                    journey.name.as_str(),
                    opt_date(journey.start_date),
                    opt_date(journey.end_date),
                    opt_text(journey.description.as_deref()),
                    to_json(&journey.risk_level)?,
                    to_json(&journey.skills)?,
                    opt_int(journey.min_experience_level.map(|l| i64::from(l.level()))),
                    journey.cost_model.as_str(),
                    journey.state.as_str(),
                    journey.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert journey: {e}")))?;

            for (position, leg) in legs.iter().enumerate() {
                tx.execute(
                    "INSERT INTO legs (id, journey_id, position, name, start_date, end_date,
                        crew_needed, waypoints)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        leg.id.to_string(),
                        journey.id.to_string(),
                        position as i64,
                        leg.name.as_str(),
                        opt_date(leg.start_date),
                        opt_date(leg.end_date),
                        opt_int(leg.crew_needed),
                        to_json(&leg.waypoints)?,
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("insert leg {position}: {e}")))?;
            }
            Ok::<(), DatabaseError>(())
        }
        .await;

        match result {
            Ok(()) => {
                tx.commit()
                    .await
                    .map_err(|e| DatabaseError::Query(format!("commit journey: {e}")))?;
                debug!(journey_id = %journey.id, legs = legs.len(), "Journey inserted");
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!("Journey rollback failed: {rollback}");
                }
                Err(e)
            }
        }
    }

    async fn update_journey(&self, journey: &Journey) -> Result<(), DatabaseError> {
        let conn = self.conn().await;
        let affected = conn
            .execute(
                "UPDATE journeys SET start_date = ?2, end_date = ?3, description = ?4,
                    risk_level = ?5, skills = ?6, min_experience_level = ?7, cost_model = ?8
                 WHERE id = ?1",
                params![
                    journey.id.to_string(),
                    opt_date(journey.start_date),
                    opt_date(journey.end_date),
                    opt_text(journey.description.as_deref()),
                    to_json(&journey.risk_level)?,
                    to_json(&journey.skills)?,
                    opt_int(journey.min_experience_level.map(|l| i64::from(l.level()))),
                    journey.cost_model.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_journey: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "journey".to_string(),
                id: journey.id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_journeys_by_owner(&self, owner_id: &str) -> Result<Vec<Journey>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {JOURNEY_COLUMNS} FROM journeys j
                     JOIN boats b ON b.id = j.boat_id
                     WHERE b.owner_id = ?1
                     ORDER BY j.created_at DESC"
                ),
                params![owner_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_journeys_by_owner: {e}")))?;

        let mut journeys = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_journey(&row) {
                Ok(journey) => journeys.push(journey),
                Err(e) => tracing::warn!("Skipping malformed journey row: {e}"),
            }
        }
        Ok(journeys)
    }

    async fn list_legs(&self, journey_id: Uuid) -> Result<Vec<Leg>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                "SELECT id, journey_id, name, start_date, end_date, crew_needed, waypoints
                 FROM legs WHERE journey_id = ?1 ORDER BY position ASC",
                params![journey_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_legs: {e}")))?;

        let mut legs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_leg(&row) {
                Ok(leg) => legs.push(leg),
                Err(e) => tracing::warn!("Skipping malformed leg row: {e}"),
            }
        }
        Ok(legs)
    }

    async fn search_journeys(
        &self,
        search: &JourneySearch,
    ) -> Result<Vec<JourneyListing>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {JOURNEY_COLUMNS}, b.name FROM journeys j
                     JOIN boats b ON b.id = j.boat_id
                     WHERE j.state = 'published'
                       AND (?1 IS NULL OR j.start_date IS NULL OR j.start_date >= ?1)
                       AND (?2 IS NULL OR j.min_experience_level IS NULL
                            OR j.min_experience_level <= ?2)
                     ORDER BY j.start_date ASC"
                ),
                params![
                    opt_date(search.start_after),
                    opt_int(search.max_experience.map(|l| i64::from(l.level()))),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("search_journeys: {e}")))?;

        let mut candidates: Vec<(Journey, String)> = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let boat_name: String = row.get(12).unwrap_or_default();
            match row_to_journey(&row) {
                Ok(journey) => candidates.push((journey, boat_name)),
                Err(e) => tracing::warn!("Skipping malformed journey row: {e}"),
            }
        }
        // list_legs below takes the lock again.
        drop(rows);
        drop(conn);

        let limit = if search.limit == 0 { 20 } else { search.limit };
        let mut listings = Vec::new();
        for (journey, boat_name) in candidates {
            if listings.len() >= limit {
                break;
            }
            if !search.risk_levels.is_empty()
                && !journey
                    .risk_level
                    .iter()
                    .any(|r: &RiskLevel| search.risk_levels.contains(r))
            {
                continue;
            }
            if let Some(region) = search.region {
                let legs = self.list_legs(journey.id).await?;
                let inside = legs
                    .iter()
                    .flat_map(|leg| leg.waypoints.iter())
                    .any(|wp| region.contains(wp.lat, wp.lng));
                if !inside {
                    continue;
                }
            }
            listings.push(JourneyListing {
                journey_id: journey.id,
                journey_name: journey.name,
                boat_name,
                start_date: journey.start_date,
                end_date: journey.end_date,
                risk_level: journey.risk_level,
                min_experience_level: journey.min_experience_level,
            });
        }
        Ok(listings)
    }

    // ── Conversations ───────────────────────────────────────────────

    async fn ensure_conversation(
        &self,
        session_id: Uuid,
        flow: &str,
        user_id: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .await
            .execute(
                "INSERT INTO conversations (id, flow, user_id)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (id) DO UPDATE SET last_activity = ?4,
                    user_id = COALESCE(conversations.user_id, excluded.user_id)",
                params![session_id.to_string(), flow, opt_text(user_id), now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("ensure_conversation: {e}")))?;

        Ok(())
    }

    async fn add_conversation_message(
        &self,
        session_id: Uuid,
        role: &str,
        content: &str,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await;
        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO conversation_messages (id, conversation_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id.to_string(), session_id.to_string(), role, content, now.clone()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("add_conversation_message: {e}")))?;

        if let Err(e) = conn
            .execute(
                "UPDATE conversations SET last_activity = ?2 WHERE id = ?1",
                params![session_id.to_string(), now],
            )
            .await
        {
            tracing::warn!(%session_id, "Failed to touch conversation activity: {e}");
        }

        Ok(())
    }

    async fn list_conversation_messages(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<ConversationMessage>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                "SELECT id, role, content, created_at FROM conversation_messages
                 WHERE conversation_id = ?1 ORDER BY created_at ASC, rowid ASC",
                params![session_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_conversation_messages: {e}")))?;

        let mut messages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id_str: String = row.get(0).unwrap_or_default();
            let role: String = row.get(1).unwrap_or_default();
            let content: String = row.get(2).unwrap_or_default();
            let created_str: String = row.get(3).unwrap_or_default();
            messages.push(ConversationMessage {
                id: parse_uuid(&id_str),
                role,
                content,
                created_at: parse_datetime(&created_str),
            });
        }
        Ok(messages)
    }
}
