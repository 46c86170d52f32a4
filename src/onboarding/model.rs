//! Persisted onboarding records: profiles, boats, journeys, legs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which onboarding conversation is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    /// Crew prospects, possibly not yet signed up.
    Prospect,
    /// Authenticated boat owners.
    Owner,
}

impl Flow {
    /// Role assigned to a profile created from this flow.
    pub fn default_role(&self) -> UserRole {
        match self {
            Self::Prospect => UserRole::Crew,
            Self::Owner => UserRole::Owner,
        }
    }
}

impl std::fmt::Display for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prospect => write!(f, "prospect"),
            Self::Owner => write!(f, "owner"),
        }
    }
}

impl std::str::FromStr for Flow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prospect" | "crew" => Ok(Self::Prospect),
            "owner" | "skipper" => Ok(Self::Owner),
            other => Err(format!("unknown onboarding flow '{other}'")),
        }
    }
}

/// Role held by a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Owner,
    Crew,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Crew => "crew",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" | "skipper" => Some(Self::Owner),
            "crew" => Some(Self::Crew),
            _ => None,
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comfort zone for a journey or a crew member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "Coastal sailing")]
    CoastalSailing,
    #[serde(rename = "Offshore sailing")]
    OffshoreSailing,
    #[serde(rename = "Extreme sailing")]
    ExtremeSailing,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 3] = [
        RiskLevel::CoastalSailing,
        RiskLevel::OffshoreSailing,
        RiskLevel::ExtremeSailing,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::CoastalSailing => "Coastal sailing",
            Self::OffshoreSailing => "Offshore sailing",
            Self::ExtremeSailing => "Extreme sailing",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::CoastalSailing => "Day hops and short passages within reach of shelter",
            Self::OffshoreSailing => "Multi-day passages out of sight of land, night watches",
            Self::ExtremeSailing => "High latitudes, ocean crossings in heavy weather",
        }
    }

    /// Match a label case-insensitively, accepting the bare first word.
    pub fn from_label(s: &str) -> Option<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|level| {
            let label = level.label().to_ascii_lowercase();
            lowered == label || label.split(' ').next() == Some(lowered.as_str())
        })
    }
}

/// Sailing experience scale, 1 through 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ExperienceLevel {
    Beginner = 1,
    CompetentCrew = 2,
    CoastalSkipper = 3,
    OffshoreSkipper = 4,
}

impl ExperienceLevel {
    pub const ALL: [ExperienceLevel; 4] = [
        ExperienceLevel::Beginner,
        ExperienceLevel::CompetentCrew,
        ExperienceLevel::CoastalSkipper,
        ExperienceLevel::OffshoreSkipper,
    ];

    pub fn from_level(level: i64) -> Option<Self> {
        match level {
            1 => Some(Self::Beginner),
            2 => Some(Self::CompetentCrew),
            3 => Some(Self::CoastalSkipper),
            4 => Some(Self::OffshoreSkipper),
            _ => None,
        }
    }

    pub fn level(&self) -> u8 {
        *self as u8
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Beginner => "Beginner",
            Self::CompetentCrew => "Competent Crew",
            Self::CoastalSkipper => "Coastal Skipper",
            Self::OffshoreSkipper => "Offshore Skipper",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Beginner => "New to sailing or a handful of day sails as a passenger",
            Self::CompetentCrew => "Can steer, trim and keep a watch under supervision",
            Self::CoastalSkipper => "Can skipper coastal passages by day and night",
            Self::OffshoreSkipper => "Experienced ocean passage maker",
        }
    }
}

impl From<ExperienceLevel> for u8 {
    fn from(level: ExperienceLevel) -> Self {
        level.level()
    }
}

impl TryFrom<u8> for ExperienceLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_level(i64::from(value)).ok_or_else(|| format!("experience level {value} out of range"))
    }
}

/// Closed vocabulary of skill identifiers.
pub const SKILL_VOCABULARY: &[(&str, &str)] = &[
    ("safety_and_mob", "Safety procedures and man-overboard recovery"),
    ("heavy_weather", "Sailing in heavy weather"),
    ("night_sailing", "Night sailing and watch keeping in the dark"),
    ("watch_keeping", "Standing a watch"),
    ("navigation", "Chart work and electronic navigation"),
    ("sailing_experience", "General boat handling"),
    ("certifications", "Formal sailing qualifications"),
    ("physical_fitness", "Physical fitness for life aboard"),
    ("seasickness_management", "Coping with seasickness"),
    ("first_aid", "First aid and medical training"),
    ("technical_skills", "Engine, rigging and electrical repairs"),
    ("cooking", "Cooking at sea"),
    ("survival_skills", "Sea survival training"),
];

/// One skill claimed by a crew member or required by a journey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillEntry {
    /// Identifier from [`SKILL_VOCABULARY`].
    pub name: String,
    /// Free-text detail supplied by the user.
    #[serde(default)]
    pub description: String,
}

/// Boat category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoatCategory {
    #[serde(rename = "Daysailers")]
    Daysailer,
    #[serde(rename = "Coastal cruisers")]
    CoastalCruiser,
    #[serde(rename = "Traditional offshore cruisers")]
    TraditionalOffshoreCruiser,
    #[serde(rename = "Performance cruisers")]
    PerformanceCruiser,
    #[serde(rename = "Multihulls")]
    Multihull,
    #[serde(rename = "Expedition sailboats")]
    ExpeditionSailboat,
}

impl BoatCategory {
    pub const ALL: [BoatCategory; 6] = [
        BoatCategory::Daysailer,
        BoatCategory::CoastalCruiser,
        BoatCategory::TraditionalOffshoreCruiser,
        BoatCategory::PerformanceCruiser,
        BoatCategory::Multihull,
        BoatCategory::ExpeditionSailboat,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Daysailer => "Daysailers",
            Self::CoastalCruiser => "Coastal cruisers",
            Self::TraditionalOffshoreCruiser => "Traditional offshore cruisers",
            Self::PerformanceCruiser => "Performance cruisers",
            Self::Multihull => "Multihulls",
            Self::ExpeditionSailboat => "Expedition sailboats",
        }
    }
}

/// Geographic bounding box in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lng >= self.min_lng && lng <= self.max_lng
    }
}

/// A named place, optionally with a coordinate and a cruising-region box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

/// A user's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    /// Identity id supplied by the auth layer.
    pub user_id: String,
    /// Unique public handle, generated on first insert.
    pub username: String,
    pub full_name: Option<String>,
    pub user_description: Option<String>,
    pub sailing_experience: Option<ExperienceLevel>,
    pub risk_level: Vec<RiskLevel>,
    pub skills: Vec<SkillEntry>,
    pub sailing_preferences: Option<String>,
    pub certifications: Option<String>,
    pub phone: Option<String>,
    pub roles: Vec<UserRole>,
    pub preferred_departure_location: Option<Location>,
    pub preferred_arrival_location: Option<Location>,
    pub availability_start_date: Option<NaiveDate>,
    pub availability_end_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// A fresh, otherwise-empty profile.
    pub fn new(user_id: &str, username: &str, role: UserRole) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            username: username.to_string(),
            full_name: None,
            user_description: None,
            sailing_experience: None,
            risk_level: Vec::new(),
            skills: Vec::new(),
            sailing_preferences: None,
            certifications: None,
            phone: None,
            roles: vec![role],
            preferred_departure_location: None,
            preferred_arrival_location: None,
            availability_start_date: None,
            availability_end_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_role(&self, role: UserRole) -> bool {
        self.roles.contains(&role)
    }

    /// One-line summary for prompt state snapshots.
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("@{}", self.username)];
        if let Some(ref name) = self.full_name {
            parts.push(name.clone());
        }
        if let Some(level) = self.sailing_experience {
            parts.push(format!("experience {} ({})", level.level(), level.label()));
        }
        if !self.risk_level.is_empty() {
            let levels: Vec<&str> = self.risk_level.iter().map(|r| r.label()).collect();
            parts.push(format!("comfort: {}", levels.join(", ")));
        }
        if !self.skills.is_empty() {
            let skills: Vec<&str> = self.skills.iter().map(|s| s.name.as_str()).collect();
            parts.push(format!("skills: {}", skills.join(", ")));
        }
        let roles: Vec<&str> = self.roles.iter().map(|r| r.as_str()).collect();
        parts.push(format!("roles: {}", roles.join(", ")));
        parts.join("; ")
    }
}

/// A boat registered by an owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boat {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub boat_type: Option<BoatCategory>,
    pub make_model: Option<String>,
    pub capacity: Option<i64>,
    pub home_port: Option<String>,
    pub country_flag: Option<String>,
    pub loa_m: Option<f64>,
    pub year_built: Option<i64>,
    pub characteristics: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Boat {
    pub fn new(owner_id: &str, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            boat_type: None,
            make_model: None,
            capacity: None,
            home_port: None,
            country_flag: None,
            loa_m: None,
            year_built: None,
            characteristics: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn summary(&self) -> String {
        let mut parts = vec![format!("\"{}\" (id {})", self.name, self.id)];
        if let Some(ref mm) = self.make_model {
            parts.push(mm.clone());
        }
        if let Some(ref port) = self.home_port {
            parts.push(format!("home port {port}"));
        }
        if let Some(capacity) = self.capacity {
            parts.push(format!("sleeps {capacity}"));
        }
        parts.join(", ")
    }
}

/// Publication state of a journey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JourneyState {
    InPlanning,
    Published,
    Archived,
}

impl JourneyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InPlanning => "in_planning",
            Self::Published => "published",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "published" => Self::Published,
            "archived" => Self::Archived,
            _ => Self::InPlanning,
        }
    }
}

/// How costs are shared on a journey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostModel {
    SharedContribution,
    OwnerCoversAll,
    CrewPaysFee,
    Delivery,
    NotDefined,
}

impl CostModel {
    pub const ALL: [CostModel; 5] = [
        CostModel::SharedContribution,
        CostModel::OwnerCoversAll,
        CostModel::CrewPaysFee,
        CostModel::Delivery,
        CostModel::NotDefined,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SharedContribution => "shared_contribution",
            Self::OwnerCoversAll => "owner_covers_all",
            Self::CrewPaysFee => "crew_pays_fee",
            Self::Delivery => "delivery",
            Self::NotDefined => "not_defined",
        }
    }
}

/// A waypoint on a leg, ordered by `index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub index: i64,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

/// One leg of a journey. Every journey has at least one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub id: Uuid,
    pub journey_id: Uuid,
    pub name: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub crew_needed: Option<i64>,
    pub waypoints: Vec<Waypoint>,
}

/// A planned trip on a boat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journey {
    pub id: Uuid,
    pub boat_id: Uuid,
    pub name: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub risk_level: Vec<RiskLevel>,
    pub skills: Vec<SkillEntry>,
    pub min_experience_level: Option<ExperienceLevel>,
    pub cost_model: CostModel,
    pub state: JourneyState,
    pub created_at: DateTime<Utc>,
}

impl Journey {
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("\"{}\"", self.name)];
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            parts.push(format!("{start} to {end}"));
        }
        parts.push(self.state.as_str().to_string());
        parts.join(", ")
    }
}

/// A published journey as seen by prospects (journey joined with its boat).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneyListing {
    pub journey_id: Uuid,
    pub journey_name: String,
    pub boat_name: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub risk_level: Vec<RiskLevel>,
    pub min_experience_level: Option<ExperienceLevel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_parse_and_default_role() {
        assert_eq!("prospect".parse::<Flow>().unwrap(), Flow::Prospect);
        assert_eq!("owner".parse::<Flow>().unwrap(), Flow::Owner);
        assert!("admin".parse::<Flow>().is_err());
        assert_eq!(Flow::Prospect.default_role(), UserRole::Crew);
        assert_eq!(Flow::Owner.default_role(), UserRole::Owner);
    }

    #[test]
    fn risk_level_serde_uses_labels() {
        let json = serde_json::to_string(&RiskLevel::OffshoreSailing).unwrap();
        assert_eq!(json, "\"Offshore sailing\"");
        assert_eq!(RiskLevel::from_label("coastal"), Some(RiskLevel::CoastalSailing));
        assert_eq!(RiskLevel::from_label("EXTREME SAILING"), Some(RiskLevel::ExtremeSailing));
        assert_eq!(RiskLevel::from_label("racing"), None);
    }

    #[test]
    fn experience_level_serializes_as_number() {
        let json = serde_json::to_string(&ExperienceLevel::CoastalSkipper).unwrap();
        assert_eq!(json, "3");
        let parsed: ExperienceLevel = serde_json::from_str("2").unwrap();
        assert_eq!(parsed, ExperienceLevel::CompetentCrew);
        assert!(serde_json::from_str::<ExperienceLevel>("9").is_err());
    }

    #[test]
    fn profile_summary_mentions_handle_and_roles() {
        let mut profile = Profile::new("user-1", "sea_otter_42", UserRole::Crew);
        profile.full_name = Some("Alice Harbour".into());
        profile.sailing_experience = Some(ExperienceLevel::Beginner);
        let summary = profile.summary();
        assert!(summary.contains("@sea_otter_42"));
        assert!(summary.contains("Alice Harbour"));
        assert!(summary.contains("Beginner"));
        assert!(summary.contains("roles: crew"));
    }

    #[test]
    fn bbox_contains() {
        let bbox = BoundingBox {
            min_lng: -6.0,
            min_lat: 30.0,
            max_lng: 36.0,
            max_lat: 46.0,
        };
        assert!(bbox.contains(38.0, 15.0));
        assert!(!bbox.contains(50.0, 15.0));
    }
}
