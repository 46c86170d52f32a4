//! Unified `Database` trait: single async interface for all persistence.
//!
//! Row-level reads by id/owner, single-row inserts and updates, one atomic
//! multi-row write for a journey with its legs, and the public journey search
//! join. The onboarding engine never sees SQL.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::onboarding::model::{
    Boat, BoundingBox, ExperienceLevel, Journey, JourneyListing, Leg, Profile, RiskLevel,
};

/// A conversation message from the database.
#[derive(Debug, Clone)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Filters for the public journey search.
#[derive(Debug, Clone, Default)]
pub struct JourneySearch {
    /// Match journeys sharing at least one of these levels. Empty = any.
    pub risk_levels: Vec<RiskLevel>,
    /// Exclude journeys that require more experience than this.
    pub max_experience: Option<ExperienceLevel>,
    /// Exclude journeys starting before this date.
    pub start_after: Option<NaiveDate>,
    /// Keep journeys with at least one waypoint inside this box.
    pub region: Option<BoundingBox>,
    pub limit: usize,
}

/// Backend-agnostic database trait covering onboarding records and
/// conversations.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Profiles ────────────────────────────────────────────────────

    /// Get the profile owned by an identity.
    async fn get_profile_by_user(&self, user_id: &str) -> Result<Option<Profile>, DatabaseError>;

    /// Check whether a public handle is taken.
    async fn username_exists(&self, username: &str) -> Result<bool, DatabaseError>;

    /// Insert a new profile.
    async fn insert_profile(&self, profile: &Profile) -> Result<(), DatabaseError>;

    /// Overwrite every mutable column of an existing profile.
    async fn update_profile(&self, profile: &Profile) -> Result<(), DatabaseError>;

    // ── Boats ───────────────────────────────────────────────────────

    /// All boats owned by an identity, oldest first.
    async fn list_boats_by_owner(&self, owner_id: &str) -> Result<Vec<Boat>, DatabaseError>;

    /// Get a boat by ID.
    async fn get_boat(&self, id: Uuid) -> Result<Option<Boat>, DatabaseError>;

    /// Insert a new boat.
    async fn insert_boat(&self, boat: &Boat) -> Result<(), DatabaseError>;

    /// Overwrite every mutable column of an existing boat.
    async fn update_boat(&self, boat: &Boat) -> Result<(), DatabaseError>;

    // ── Journeys ────────────────────────────────────────────────────

    /// Insert a journey and all of its legs atomically.
    async fn insert_journey_with_legs(
        &self,
        journey: &Journey,
        legs: &[Leg],
    ) -> Result<(), DatabaseError>;

    /// Overwrite the descriptive columns of an existing journey. Legs are
    /// left alone.
    async fn update_journey(&self, journey: &Journey) -> Result<(), DatabaseError>;

    /// All journeys on boats owned by an identity, newest first.
    async fn list_journeys_by_owner(&self, owner_id: &str) -> Result<Vec<Journey>, DatabaseError>;

    /// Legs of a journey in order.
    async fn list_legs(&self, journey_id: Uuid) -> Result<Vec<Leg>, DatabaseError>;

    /// Published journeys joined with their boat, filtered.
    async fn search_journeys(
        &self,
        search: &JourneySearch,
    ) -> Result<Vec<JourneyListing>, DatabaseError>;

    // ── Conversations ───────────────────────────────────────────────

    /// Ensure a conversation exists, creating it if needed.
    async fn ensure_conversation(
        &self,
        session_id: Uuid,
        flow: &str,
        user_id: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Add a message to a conversation.
    async fn add_conversation_message(
        &self,
        session_id: Uuid,
        role: &str,
        content: &str,
    ) -> Result<(), DatabaseError>;

    /// List messages in a conversation.
    async fn list_conversation_messages(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<ConversationMessage>, DatabaseError>;
}
