//! Argument normalizers: loosely-typed model arguments to canonical types.
//!
//! Every function here is total: arbitrary `serde_json::Value` input (wrong
//! type, empty string, JSON encoded inside a string several times over)
//! yields a defined value and never panics. `None` means "field not usable,
//! do not write it".

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use super::model::{
    BoatCategory, BoundingBox, CostModel, ExperienceLevel, Location, RiskLevel, SKILL_VOCABULARY,
    SkillEntry,
};

/// How many layers of JSON-in-a-string are peeled before giving up.
pub const MAX_DECODE_DEPTH: usize = 4;

/// Level used when nothing better can be inferred.
pub const DEFAULT_EXPERIENCE: ExperienceLevel = ExperienceLevel::Beginner;

static DATE_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d{4}-\d{2}-\d{2})").unwrap());

static LEADING_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(-?\d+(?:\.\d+)?)").unwrap());

static STANDALONE_DIGIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([1-4])\b\s*([a-z]*)").unwrap());

/// Words after a digit that mark it as a count rather than a level.
const COUNT_UNITS: &[&str] = &[
    "year", "years", "yr", "yrs", "month", "months", "week", "weeks", "day", "days", "time",
    "times", "mile", "miles", "nm", "boat", "boats", "trip", "trips", "sail", "sails", "season",
    "seasons", "passage", "passages", "crossing", "crossings", "hour", "hours",
];

/// Keyword table for experience text. Longer phrases are matched first and
/// consume their span so "yachtmaster offshore" never also counts as
/// "yachtmaster".
const EXPERIENCE_KEYWORDS: &[(&str, ExperienceLevel)] = &[
    ("offshore skipper", ExperienceLevel::OffshoreSkipper),
    ("yachtmaster offshore", ExperienceLevel::OffshoreSkipper),
    ("yachtmaster ocean", ExperienceLevel::OffshoreSkipper),
    ("crossed the atlantic", ExperienceLevel::OffshoreSkipper),
    ("crossed the pacific", ExperienceLevel::OffshoreSkipper),
    ("ocean crossing", ExperienceLevel::OffshoreSkipper),
    ("circumnavigat", ExperienceLevel::OffshoreSkipper),
    ("bluewater", ExperienceLevel::OffshoreSkipper),
    ("blue water", ExperienceLevel::OffshoreSkipper),
    ("coastal skipper", ExperienceLevel::CoastalSkipper),
    ("yachtmaster", ExperienceLevel::CoastalSkipper),
    ("day skipper", ExperienceLevel::CoastalSkipper),
    ("skippered", ExperienceLevel::CoastalSkipper),
    ("my own boat", ExperienceLevel::CoastalSkipper),
    ("chartered", ExperienceLevel::CoastalSkipper),
    ("competent crew", ExperienceLevel::CompetentCrew),
    ("several seasons", ExperienceLevel::CompetentCrew),
    ("regular crew", ExperienceLevel::CompetentCrew),
    ("night watch", ExperienceLevel::CompetentCrew),
    ("intermediate", ExperienceLevel::CompetentCrew),
    ("raced", ExperienceLevel::CompetentCrew),
    ("racing", ExperienceLevel::CompetentCrew),
    ("never sailed", ExperienceLevel::Beginner),
    ("no experience", ExperienceLevel::Beginner),
    ("just starting", ExperienceLevel::Beginner),
    ("first time", ExperienceLevel::Beginner),
    ("day sail", ExperienceLevel::Beginner),
    ("few sails", ExperienceLevel::Beginner),
    ("beginner", ExperienceLevel::Beginner),
    ("novice", ExperienceLevel::Beginner),
    ("newbie", ExperienceLevel::Beginner),
    ("dinghies", ExperienceLevel::Beginner),
    ("dinghy", ExperienceLevel::Beginner),
    ("learning", ExperienceLevel::Beginner),
];

/// Free-form skill names accepted as spellings of a vocabulary identifier.
const SKILL_ALIASES: &[(&str, &str)] = &[
    ("mob", "safety_and_mob"),
    ("man_overboard", "safety_and_mob"),
    ("safety", "safety_and_mob"),
    ("heavy_weather_sailing", "heavy_weather"),
    ("night_watches", "night_sailing"),
    ("night_watch", "night_sailing"),
    ("watchkeeping", "watch_keeping"),
    ("nav", "navigation"),
    ("chart_work", "navigation"),
    ("boat_handling", "sailing_experience"),
    ("fitness", "physical_fitness"),
    ("seasickness", "seasickness_management"),
    ("medical", "first_aid"),
    ("mechanical", "technical_skills"),
    ("engine", "technical_skills"),
    ("galley", "cooking"),
    ("sea_survival", "survival_skills"),
];

// ── Shared helpers ──────────────────────────────────────────────────

/// Peel JSON that arrived encoded inside a string, up to [`MAX_DECODE_DEPTH`].
pub fn decode_nested(value: &Value) -> Value {
    let mut current = value.clone();
    for _ in 0..MAX_DECODE_DEPTH {
        let decoded = match &current {
            Value::String(s) => {
                let trimmed = s.trim();
                let looks_encoded = trimmed.starts_with('{')
                    || trimmed.starts_with('[')
                    || (trimmed.starts_with('"') && trimmed.len() >= 2);
                if !looks_encoded {
                    break;
                }
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(v) => v,
                    Err(_) => break,
                }
            }
            _ => break,
        };
        current = decoded;
    }
    current
}

/// Collect every string leaf, splitting comma-joined strings.
fn flatten_strings(value: &Value, depth: usize, out: &mut Vec<String>) {
    if depth > MAX_DECODE_DEPTH {
        return;
    }
    match decode_nested(value) {
        Value::Array(items) => {
            for item in &items {
                flatten_strings(item, depth + 1, out);
            }
        }
        Value::String(s) => {
            out.extend(
                s.split(',')
                    .map(|part| part.trim().trim_matches('"').trim())
                    .filter(|part| !part.is_empty())
                    .map(str::to_string),
            );
        }
        _ => {}
    }
}

/// Trimmed non-empty string. Numbers are stringified.
pub fn normalize_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Array or comma-joined string of non-empty strings.
pub fn normalize_string_list(value: &Value) -> Option<Vec<String>> {
    let mut out = Vec::new();
    flatten_strings(value, 0, &mut out);
    if out.is_empty() { None } else { Some(out) }
}

/// Finite float from a number or a string with a leading number ("12.5m").
pub fn normalize_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => LEADING_NUMBER_RE
            .captures(s)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok()),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

/// Integer within `[min, max]`; anything outside is dropped.
pub fn normalize_integer(value: &Value, min: i64, max: i64) -> Option<i64> {
    let n = normalize_f64(value)?.round();
    if n < min as f64 || n > max as f64 {
        return None;
    }
    Some(n as i64)
}

// ── Enum arrays ─────────────────────────────────────────────────────

/// Risk levels from an array, a comma-joined string, or an encoded string.
///
/// Unknown entries are dropped; duplicates collapse. `None` when nothing
/// valid survives.
pub fn normalize_risk_levels(value: &Value) -> Option<Vec<RiskLevel>> {
    let mut raw = Vec::new();
    flatten_strings(value, 0, &mut raw);

    let mut seen = HashSet::new();
    let levels: Vec<RiskLevel> = raw
        .iter()
        .filter_map(|s| RiskLevel::from_label(s))
        .filter(|level| seen.insert(*level))
        .collect();

    if levels.is_empty() { None } else { Some(levels) }
}

/// Boat category from a label or a descriptive keyword.
pub fn normalize_boat_category(value: &Value) -> Option<BoatCategory> {
    let s = normalize_string(&decode_nested(value))?.to_ascii_lowercase();
    if let Some(exact) = BoatCategory::ALL
        .into_iter()
        .find(|c| c.label().eq_ignore_ascii_case(&s))
    {
        return Some(exact);
    }
    let keyword_table: &[(&str, BoatCategory)] = &[
        ("catamaran", BoatCategory::Multihull),
        ("trimaran", BoatCategory::Multihull),
        ("multihull", BoatCategory::Multihull),
        ("expedition", BoatCategory::ExpeditionSailboat),
        ("performance", BoatCategory::PerformanceCruiser),
        ("racer", BoatCategory::PerformanceCruiser),
        ("traditional", BoatCategory::TraditionalOffshoreCruiser),
        ("bluewater", BoatCategory::TraditionalOffshoreCruiser),
        ("offshore", BoatCategory::TraditionalOffshoreCruiser),
        ("coastal", BoatCategory::CoastalCruiser),
        ("cruiser", BoatCategory::CoastalCruiser),
        ("daysail", BoatCategory::Daysailer),
        ("day sail", BoatCategory::Daysailer),
    ];
    keyword_table
        .iter()
        .find(|(keyword, _)| s.contains(keyword))
        .map(|(_, category)| *category)
}

/// Cost model from its snake_case name or a loose phrase.
pub fn normalize_cost_model(value: &Value) -> Option<CostModel> {
    let s = normalize_string(&decode_nested(value))?
        .to_ascii_lowercase()
        .replace([' ', '-'], "_");
    if let Some(exact) = CostModel::ALL.into_iter().find(|c| c.as_str() == s) {
        return Some(exact);
    }
    if s.contains("share") || s.contains("split") {
        Some(CostModel::SharedContribution)
    } else if s.contains("free") || s.contains("owner") {
        Some(CostModel::OwnerCoversAll)
    } else if s.contains("fee") || s.contains("pay") {
        Some(CostModel::CrewPaysFee)
    } else if s.contains("delivery") {
        Some(CostModel::Delivery)
    } else {
        None
    }
}

// ── Experience level ────────────────────────────────────────────────

/// Why an experience level was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceBasis {
    /// An in-range number was supplied.
    Numeric,
    /// A number was supplied but fell outside 1..=4.
    OutOfRange,
    /// An explicit level digit was found in free text.
    Digit,
    /// A known phrase was found in free text.
    Keyword,
    /// Nothing recognisable; [`DEFAULT_EXPERIENCE`] used.
    Fallback,
}

/// A normalized experience level with its rationale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExperienceAssessment {
    pub level: ExperienceLevel,
    pub basis: ExperienceBasis,
    pub rationale: String,
}

impl ExperienceAssessment {
    fn new(level: ExperienceLevel, basis: ExperienceBasis, rationale: impl Into<String>) -> Self {
        Self {
            level,
            basis,
            rationale: rationale.into(),
        }
    }
}

/// Experience level (1–4) from a number or free text.
///
/// Returns `None` only when no value was supplied at all (null, empty string).
pub fn normalize_experience_level(value: &Value) -> Option<ExperienceAssessment> {
    match decode_nested(value) {
        Value::Null => None,
        Value::Number(n) => Some(experience_from_number(n.as_f64())),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            if let Ok(n) = trimmed.parse::<f64>() {
                return Some(experience_from_number(Some(n)));
            }
            Some(experience_from_text(trimmed))
        }
        other => {
            tracing::warn!(value = %other, "Unusable experience value, using default level");
            Some(ExperienceAssessment::new(
                DEFAULT_EXPERIENCE,
                ExperienceBasis::Fallback,
                "value was neither a number nor text",
            ))
        }
    }
}

fn experience_from_number(n: Option<f64>) -> ExperienceAssessment {
    let rounded = n.filter(|f| f.is_finite()).map(f64::round);
    match rounded.and_then(|r| ExperienceLevel::from_level(r as i64)) {
        Some(level) => ExperienceAssessment::new(
            level,
            ExperienceBasis::Numeric,
            format!("numeric level {}", level.level()),
        ),
        None => {
            tracing::warn!(
                value = ?n,
                default = DEFAULT_EXPERIENCE.level(),
                "Experience level out of range, using default"
            );
            ExperienceAssessment::new(
                DEFAULT_EXPERIENCE,
                ExperienceBasis::OutOfRange,
                format!("{n:?} is outside 1-4"),
            )
        }
    }
}

fn experience_from_text(text: &str) -> ExperienceAssessment {
    let lowered = text.to_ascii_lowercase();

    for caps in STANDALONE_DIGIT_RE.captures_iter(&lowered) {
        let following = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        if COUNT_UNITS.contains(&following) {
            continue;
        }
        if let Some(level) = caps
            .get(1)
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .and_then(ExperienceLevel::from_level)
        {
            return ExperienceAssessment::new(
                level,
                ExperienceBasis::Digit,
                format!("explicit level {} in text", level.level()),
            );
        }
    }

    let mut remaining = lowered;
    let mut keywords: Vec<&(&str, ExperienceLevel)> = EXPERIENCE_KEYWORDS.iter().collect();
    keywords.sort_by_key(|(phrase, _)| std::cmp::Reverse(phrase.len()));

    let mut matched: Vec<(&str, ExperienceLevel)> = Vec::new();
    for &(phrase, level) in keywords {
        if remaining.contains(phrase) {
            matched.push((phrase, level));
            remaining = remaining.replace(phrase, &" ".repeat(phrase.len()));
        }
    }

    // Conflicting phrases resolve to the most conservative level.
    if let Some((phrase, level)) = matched.iter().min_by_key(|(_, level)| *level) {
        return ExperienceAssessment::new(
            *level,
            ExperienceBasis::Keyword,
            format!("matched \"{phrase}\""),
        );
    }

    tracing::debug!(text = %text, "No experience keyword matched, using default");
    ExperienceAssessment::new(
        DEFAULT_EXPERIENCE,
        ExperienceBasis::Fallback,
        "no level or known phrase in text",
    )
}

// ── Skills ──────────────────────────────────────────────────────────

/// Canonical vocabulary identifier for a free-form skill name.
pub fn canonical_skill_name(raw: &str) -> Option<&'static str> {
    let key: String = raw
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let key = key.trim_matches('_');

    if let Some((name, _)) = SKILL_VOCABULARY.iter().find(|(name, _)| *name == key) {
        return Some(*name);
    }
    SKILL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .and_then(|(_, target)| SKILL_VOCABULARY.iter().find(|(name, _)| name == target))
        .map(|(name, _)| *name)
}

/// Structured skill list from strings, encoded strings, or records.
///
/// Entries whose identifier is not in the vocabulary are dropped.
pub fn normalize_skills(value: &Value) -> Vec<SkillEntry> {
    let mut entries: Vec<SkillEntry> = Vec::new();
    collect_skills(value, 0, &mut entries);

    let mut merged: Vec<SkillEntry> = Vec::new();
    for entry in entries {
        match merged.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => {
                if existing.description.is_empty() {
                    existing.description = entry.description;
                }
            }
            None => merged.push(entry),
        }
    }
    merged
}

fn collect_skills(value: &Value, depth: usize, out: &mut Vec<SkillEntry>) {
    if depth > MAX_DECODE_DEPTH {
        return;
    }
    match decode_nested(value) {
        Value::Array(items) => {
            for item in &items {
                collect_skills(item, depth + 1, out);
            }
        }
        Value::Object(map) => {
            let name = map
                .get("name")
                .or_else(|| map.get("skill"))
                .and_then(normalize_string);
            let description = map
                .get("description")
                .or_else(|| map.get("details"))
                .and_then(normalize_string)
                .unwrap_or_default();
            if let Some(name) = name {
                push_skill(&name, description, out);
            }
        }
        Value::String(s) => {
            for part in s.split(',') {
                let (name, description) = match part.split_once(':') {
                    Some((n, d)) => (n, d.trim().to_string()),
                    None => (part, String::new()),
                };
                if !name.trim().is_empty() {
                    push_skill(name, description, out);
                }
            }
        }
        _ => {}
    }
}

fn push_skill(raw_name: &str, description: String, out: &mut Vec<SkillEntry>) {
    match canonical_skill_name(raw_name) {
        Some(name) => out.push(SkillEntry {
            name: name.to_string(),
            description,
        }),
        None => tracing::debug!(skill = %raw_name, "Dropping skill outside vocabulary"),
    }
}

// ── Geography ───────────────────────────────────────────────────────

/// A well-known cruising region with a fixed bounding box.
#[derive(Debug, Clone, Copy)]
pub struct NamedRegion {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub bbox: BoundingBox,
}

const fn bbox(min_lng: f64, min_lat: f64, max_lng: f64, max_lat: f64) -> BoundingBox {
    BoundingBox {
        min_lng,
        min_lat,
        max_lng,
        max_lat,
    }
}

/// Regions the enrichment path can resolve by name.
pub const NAMED_REGIONS: &[NamedRegion] = &[
    NamedRegion {
        name: "Mediterranean",
        aliases: &["mediterranean sea", "the med", "med"],
        bbox: bbox(-5.6, 30.0, 36.2, 46.0),
    },
    NamedRegion {
        name: "Caribbean",
        aliases: &["caribbean sea", "the caribbean", "west indies"],
        bbox: bbox(-88.0, 9.0, -59.0, 23.5),
    },
    NamedRegion {
        name: "Canary Islands",
        aliases: &["canaries", "islas canarias"],
        bbox: bbox(-18.2, 27.6, -13.3, 29.5),
    },
    NamedRegion {
        name: "Balearic Islands",
        aliases: &["balearics", "mallorca", "majorca"],
        bbox: bbox(1.1, 38.6, 4.4, 40.1),
    },
    NamedRegion {
        name: "Aegean Sea",
        aliases: &["aegean", "greek islands", "cyclades"],
        bbox: bbox(22.5, 35.0, 28.3, 41.0),
    },
    NamedRegion {
        name: "Adriatic Sea",
        aliases: &["adriatic", "croatia coast", "dalmatian coast"],
        bbox: bbox(12.2, 39.8, 19.7, 45.8),
    },
    NamedRegion {
        name: "Baltic Sea",
        aliases: &["baltic"],
        bbox: bbox(9.4, 53.9, 30.3, 65.9),
    },
    NamedRegion {
        name: "North Sea",
        aliases: &["german bight"],
        bbox: bbox(-4.5, 51.0, 9.0, 61.0),
    },
    NamedRegion {
        name: "Azores",
        aliases: &["acores", "azores islands"],
        bbox: bbox(-31.5, 36.8, -24.8, 39.8),
    },
    NamedRegion {
        name: "Bahamas",
        aliases: &["the bahamas"],
        bbox: bbox(-79.6, 20.9, -72.7, 27.3),
    },
    NamedRegion {
        name: "Solent",
        aliases: &["the solent", "isle of wight"],
        bbox: bbox(-1.8, 50.55, -0.9, 50.9),
    },
];

/// Look up a named region by exact name or alias, case-insensitively.
pub fn find_region(name: &str) -> Option<&'static NamedRegion> {
    let key = name.trim().to_ascii_lowercase();
    if key.is_empty() {
        return None;
    }
    NAMED_REGIONS.iter().find(|region| {
        region.name.eq_ignore_ascii_case(&key) || region.aliases.iter().any(|a| *a == key)
    })
}

fn first_f64(map: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| map.get(*k).and_then(normalize_f64))
}

/// Bounding box from an object or an encoded string with four numeric bounds.
///
/// Any absent or invalid bound yields `None`; missing coordinates are never
/// filled in.
pub fn normalize_bbox(value: &Value) -> Option<BoundingBox> {
    match decode_nested(value) {
        Value::Object(map) => {
            let min_lng = first_f64(&map, &["min_lng", "minLng", "west"])?;
            let min_lat = first_f64(&map, &["min_lat", "minLat", "south"])?;
            let max_lng = first_f64(&map, &["max_lng", "maxLng", "east"])?;
            let max_lat = first_f64(&map, &["max_lat", "maxLat", "north"])?;
            validated_bbox(min_lng, min_lat, max_lng, max_lat)
        }
        Value::Array(items) if items.len() == 4 => {
            let nums: Vec<f64> = items.iter().filter_map(normalize_f64).collect();
            if nums.len() != 4 {
                return None;
            }
            validated_bbox(nums[0], nums[1], nums[2], nums[3])
        }
        _ => None,
    }
}

fn validated_bbox(min_lng: f64, min_lat: f64, max_lng: f64, max_lat: f64) -> Option<BoundingBox> {
    let lat_ok = |v: f64| (-90.0..=90.0).contains(&v);
    let lng_ok = |v: f64| (-180.0..=180.0).contains(&v);
    if !(lat_ok(min_lat) && lat_ok(max_lat) && lng_ok(min_lng) && lng_ok(max_lng)) {
        return None;
    }
    if min_lat > max_lat {
        return None;
    }
    Some(bbox(min_lng, min_lat, max_lng, max_lat))
}

/// Location from a name string or a `{name, lat, lng, bbox}` record.
///
/// A named location without an explicit box is enriched from
/// [`NAMED_REGIONS`].
pub fn normalize_location(value: &Value) -> Option<Location> {
    let mut location = match decode_nested(value) {
        Value::String(s) => Location {
            name: normalize_string(&Value::String(s))?,
            lat: None,
            lng: None,
            bbox: None,
        },
        Value::Object(map) => {
            let name = map
                .get("name")
                .or_else(|| map.get("location"))
                .and_then(normalize_string)?;
            let lat = first_f64(&map, &["lat", "latitude"]).filter(|v| (-90.0..=90.0).contains(v));
            let lng =
                first_f64(&map, &["lng", "lon", "longitude"]).filter(|v| (-180.0..=180.0).contains(v));
            let (lat, lng) = match (lat, lng) {
                (Some(lat), Some(lng)) => (Some(lat), Some(lng)),
                _ => (None, None),
            };
            let bbox = map
                .get("bbox")
                .and_then(normalize_bbox)
                .or_else(|| normalize_bbox(&Value::Object(map.clone())));
            Location {
                name,
                lat,
                lng,
                bbox,
            }
        }
        _ => return None,
    };

    if location.bbox.is_none()
        && let Some(region) = find_region(&location.name)
    {
        location.bbox = Some(region.bbox);
    }
    Some(location)
}

// ── Dates ───────────────────────────────────────────────────────────

/// Calendar date from a string starting with `YYYY-MM-DD`.
///
/// Anything else (other formats, impossible dates, non-strings) is `None`.
pub fn normalize_date(value: &Value) -> Option<NaiveDate> {
    let Value::String(s) = value else {
        return None;
    };
    let prefix = DATE_PREFIX_RE.captures(s)?.get(1)?.as_str();
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn malformed_inputs() -> Vec<Value> {
        vec![
            Value::Null,
            json!(""),
            json!("   "),
            json!(true),
            json!(42),
            json!(-3.5),
            json!({}),
            json!([]),
            json!([null, {}, [[]]]),
            json!("{not json"),
            json!("\"\\\"[\\\\\\\"deep\\\\\\\"]\\\"\""),
            json!({"nested": {"deeper": ["x"]}}),
            json!(f64::MAX),
        ]
    }

    #[test]
    fn every_normalizer_is_total() {
        for input in malformed_inputs() {
            let _ = normalize_string(&input);
            let _ = normalize_string_list(&input);
            let _ = normalize_f64(&input);
            let _ = normalize_integer(&input, 1, 10);
            let _ = normalize_risk_levels(&input);
            let _ = normalize_boat_category(&input);
            let _ = normalize_cost_model(&input);
            let _ = normalize_experience_level(&input);
            let _ = normalize_skills(&input);
            let _ = normalize_bbox(&input);
            let _ = normalize_location(&input);
            let _ = normalize_date(&input);
        }
    }

    #[test]
    fn decode_nested_peels_multiple_layers() {
        let inner = json!(["Coastal sailing"]).to_string();
        let once = Value::String(inner);
        let twice = Value::String(once.to_string());
        assert_eq!(decode_nested(&twice), json!(["Coastal sailing"]));
    }

    #[test]
    fn risk_levels_accept_array_csv_and_encoded() {
        let expected = Some(vec![RiskLevel::CoastalSailing, RiskLevel::OffshoreSailing]);
        assert_eq!(
            normalize_risk_levels(&json!(["Coastal sailing", "Offshore sailing"])),
            expected
        );
        assert_eq!(
            normalize_risk_levels(&json!("Coastal sailing, offshore sailing")),
            expected
        );
        assert_eq!(
            normalize_risk_levels(&json!("[\"Coastal sailing\",\"Offshore sailing\"]")),
            expected
        );
    }

    #[test]
    fn risk_levels_filter_and_dedupe() {
        assert_eq!(
            normalize_risk_levels(&json!(["racing", "coastal", "Coastal sailing"])),
            Some(vec![RiskLevel::CoastalSailing])
        );
        assert_eq!(normalize_risk_levels(&json!(["racing", "cruising"])), None);
        assert_eq!(normalize_risk_levels(&json!([[["Extreme sailing"]]])), Some(vec![RiskLevel::ExtremeSailing]));
    }

    #[test]
    fn experience_numeric_in_range() {
        let a = normalize_experience_level(&json!(3)).unwrap();
        assert_eq!(a.level, ExperienceLevel::CoastalSkipper);
        assert_eq!(a.basis, ExperienceBasis::Numeric);

        let a = normalize_experience_level(&json!("2")).unwrap();
        assert_eq!(a.level, ExperienceLevel::CompetentCrew);
        assert_eq!(a.basis, ExperienceBasis::Numeric);
    }

    #[test]
    fn experience_out_of_range_defaults_to_beginner() {
        for raw in [json!(0), json!(7), json!(-1), json!("12")] {
            let a = normalize_experience_level(&raw).unwrap();
            assert_eq!(a.level, ExperienceLevel::Beginner, "input {raw}");
            assert_eq!(a.basis, ExperienceBasis::OutOfRange, "input {raw}");
        }
    }

    #[test]
    fn experience_few_day_sails_is_beginner_by_keyword() {
        let a = normalize_experience_level(&json!("I've done a few day sails")).unwrap();
        assert_eq!(a.level, ExperienceLevel::Beginner);
        assert_eq!(a.basis, ExperienceBasis::Keyword);
    }

    #[test]
    fn experience_explicit_digit_wins_over_keywords() {
        let a = normalize_experience_level(&json!("I'd say level 3, coastal skipper")).unwrap();
        assert_eq!(a.level, ExperienceLevel::CoastalSkipper);
        assert_eq!(a.basis, ExperienceBasis::Digit);
    }

    #[test]
    fn experience_counts_are_not_levels() {
        let a = normalize_experience_level(&json!("2 years of racing dinghies")).unwrap();
        assert_ne!(a.basis, ExperienceBasis::Digit);
        assert_eq!(a.basis, ExperienceBasis::Keyword);
        // "racing" (2) and "dinghy" (1) conflict; the conservative level wins.
        assert_eq!(a.level, ExperienceLevel::Beginner);
    }

    #[test]
    fn experience_longer_phrase_consumes_shorter() {
        let a = normalize_experience_level(&json!("I hold a Yachtmaster Offshore ticket")).unwrap();
        assert_eq!(a.level, ExperienceLevel::OffshoreSkipper);
    }

    #[test]
    fn experience_unrecognised_text_falls_back_with_rationale() {
        let a = normalize_experience_level(&json!("I like boats")).unwrap();
        assert_eq!(a.level, DEFAULT_EXPERIENCE);
        assert_eq!(a.basis, ExperienceBasis::Fallback);
        assert!(!a.rationale.is_empty());
    }

    #[test]
    fn experience_absent_is_none() {
        assert!(normalize_experience_level(&Value::Null).is_none());
        assert!(normalize_experience_level(&json!("  ")).is_none());
    }

    #[test]
    fn skills_mixed_inputs_filtered_to_vocabulary() {
        let input = json!([
            "navigation",
            "{\"name\":\"first aid\",\"description\":\"STCW basic\"}",
            {"name": "Night Sailing", "description": "20 night watches"},
            {"name": "juggling"},
            "heavy-weather: force 8 in Biscay",
        ]);
        let skills = normalize_skills(&input);
        let names: Vec<&str> = skills.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["navigation", "first_aid", "night_sailing", "heavy_weather"]
        );
        assert_eq!(skills[1].description, "STCW basic");
        assert_eq!(skills[3].description, "force 8 in Biscay");
    }

    #[test]
    fn skills_aliases_and_dedup() {
        let skills = normalize_skills(&json!("mob, safety, navigation, nav"));
        let names: Vec<&str> = skills.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["safety_and_mob", "navigation"]);
    }

    #[test]
    fn bbox_requires_all_four_bounds() {
        assert!(normalize_bbox(&json!({"min_lng": 1.0, "min_lat": 2.0, "max_lng": 3.0})).is_none());
        assert!(normalize_bbox(&json!({"min_lng": 1.0, "min_lat": 2.0, "max_lng": 3.0, "max_lat": "x"})).is_none());
        assert!(normalize_bbox(&json!({"min_lng": 1.0, "min_lat": 50.0, "max_lng": 3.0, "max_lat": 40.0})).is_none());
    }

    #[test]
    fn bbox_accepts_encoded_string_and_aliases() {
        let encoded = json!("{\"west\": -5.6, \"south\": 30.0, \"east\": 36.2, \"north\": 46.0}");
        let bbox = normalize_bbox(&encoded).unwrap();
        assert_eq!(bbox.min_lng, -5.6);
        assert_eq!(bbox.max_lat, 46.0);
    }

    #[test]
    fn bbox_roundtrip_preserves_bounds() {
        let original = json!({
            "min_lng": -18.1612345678,
            "min_lat": 27.637,
            "max_lng": -13.3312,
            "max_lat": 29.4161
        });
        let bbox = normalize_bbox(&original).unwrap();
        let reserialized = serde_json::to_value(bbox).unwrap();
        let again = normalize_bbox(&reserialized).unwrap();
        assert_eq!(bbox, again);
        assert_eq!(reserialized["min_lng"], original["min_lng"]);
        assert_eq!(reserialized["min_lat"], original["min_lat"]);
        assert_eq!(reserialized["max_lng"], original["max_lng"]);
        assert_eq!(reserialized["max_lat"], original["max_lat"]);
    }

    #[test]
    fn location_enriched_from_named_region() {
        let loc = normalize_location(&json!("Canaries")).unwrap();
        assert_eq!(loc.name, "Canaries");
        assert_eq!(loc.bbox, Some(find_region("Canary Islands").unwrap().bbox));

        let loc = normalize_location(&json!({"name": "the med"})).unwrap();
        assert!(loc.bbox.is_some());
    }

    #[test]
    fn location_without_region_match_keeps_no_box() {
        let loc = normalize_location(&json!({"name": "Falmouth", "lat": 50.15, "lng": -5.07})).unwrap();
        assert_eq!(loc.lat, Some(50.15));
        assert!(loc.bbox.is_none());
    }

    #[test]
    fn location_half_coordinate_dropped() {
        let loc = normalize_location(&json!({"name": "Falmouth", "lat": 50.15})).unwrap();
        assert!(loc.lat.is_none());
        assert!(loc.lng.is_none());
    }

    #[test]
    fn dates_accept_only_leading_iso_prefix() {
        assert_eq!(
            normalize_date(&json!("2025-06-01")),
            NaiveDate::from_ymd_opt(2025, 6, 1)
        );
        assert_eq!(
            normalize_date(&json!("2025-06-01T10:00:00Z")),
            NaiveDate::from_ymd_opt(2025, 6, 1)
        );
        assert!(normalize_date(&json!("June 1st 2025")).is_none());
        assert!(normalize_date(&json!("01/06/2025")).is_none());
        assert!(normalize_date(&json!("2025-13-45")).is_none());
        assert!(normalize_date(&json!(20250601)).is_none());
    }

    #[test]
    fn integers_bounded() {
        assert_eq!(normalize_integer(&json!("6 berths"), 1, 50), Some(6));
        assert_eq!(normalize_integer(&json!(0), 1, 50), None);
        assert_eq!(normalize_integer(&json!(4.6), 1, 50), Some(5));
    }

    #[test]
    fn boat_category_keywords() {
        assert_eq!(normalize_boat_category(&json!("Catamaran")), Some(BoatCategory::Multihull));
        assert_eq!(
            normalize_boat_category(&json!("Coastal cruisers")),
            Some(BoatCategory::CoastalCruiser)
        );
        assert_eq!(normalize_boat_category(&json!("submarine")), None);
    }

    #[test]
    fn cost_model_phrases() {
        assert_eq!(normalize_cost_model(&json!("shared contribution")), Some(CostModel::SharedContribution));
        assert_eq!(normalize_cost_model(&json!("split food costs")), Some(CostModel::SharedContribution));
        assert_eq!(normalize_cost_model(&json!("???")), None);
    }
}
