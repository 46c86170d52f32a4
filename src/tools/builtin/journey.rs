//! Journey tools: `create_journey` (journey plus legs in one atomic write),
//! `list_journeys`, and the public `search_journeys`.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::onboarding::model::{
    Boat, CostModel, Journey, JourneyState, Leg, UserRole, Waypoint,
};
use crate::onboarding::normalize::{
    decode_nested, find_region, normalize_bbox, normalize_cost_model, normalize_date,
    normalize_experience_level, normalize_f64, normalize_integer, normalize_risk_levels,
    normalize_skills, normalize_string,
};
use crate::store::JourneySearch;
use crate::tools::builtin::boat::resolve_owned_boat;
use crate::tools::builtin::{as_object, field, merge};
use crate::tools::tool::{
    Tool, ToolAccess, ToolCategory, ToolContext, ToolError, ToolOutput, require_str,
};

const MAX_SEARCH_RESULTS: i64 = 20;

fn check_range(label: &str, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<(), ToolError> {
    if let (Some(start), Some(end)) = (start, end)
        && end < start
    {
        return Err(ToolError::Validation(format!(
            "{label} end_date {end} is before start_date {start}"
        )));
    }
    Ok(())
}

/// Waypoints with both coordinates. Entries missing either are dropped.
fn parse_waypoints(raw: Option<&Value>) -> Vec<Waypoint> {
    let Some(Value::Array(items)) = raw.map(decode_nested) else {
        return Vec::new();
    };
    items
        .iter()
        .map(decode_nested)
        .filter_map(|wp| {
            let lat = field(&wp, &["lat", "latitude"])
                .and_then(normalize_f64)
                .filter(|v| (-90.0..=90.0).contains(v))?;
            let lng = field(&wp, &["lng", "lon", "longitude"])
                .and_then(normalize_f64)
                .filter(|v| (-180.0..=180.0).contains(v))?;
            let name = field(&wp, &["name"]).and_then(normalize_string)?;
            Some((name, lat, lng))
        })
        .enumerate()
        .map(|(index, (name, lat, lng))| Waypoint {
            index: index as i64,
            name,
            lat,
            lng,
        })
        .collect()
}

fn parse_legs(journey: &Journey, raw: Option<&Value>) -> Result<Vec<Leg>, ToolError> {
    let items = match raw.map(decode_nested) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };

    let mut legs = Vec::with_capacity(items.len().max(1));
    for (i, item) in items.iter().enumerate() {
        let item = decode_nested(item);
        if !item.is_object() {
            continue;
        }
        let start_date = field(&item, &["start_date"]).and_then(normalize_date);
        let end_date = field(&item, &["end_date"]).and_then(normalize_date);
        check_range(&format!("leg {}", i + 1), start_date, end_date)?;
        legs.push(Leg {
            id: Uuid::new_v4(),
            journey_id: journey.id,
            name: field(&item, &["name"])
                .and_then(normalize_string)
                .unwrap_or_else(|| format!("Leg {}", i + 1)),
            start_date,
            end_date,
            crew_needed: field(&item, &["crew_needed", "crew"])
                .and_then(|v| normalize_integer(v, 1, 50)),
            waypoints: parse_waypoints(field(&item, &["waypoints"])),
        });
    }

    // Every journey has at least one leg.
    if legs.is_empty() {
        legs.push(Leg {
            id: Uuid::new_v4(),
            journey_id: journey.id,
            name: journey.name.clone(),
            start_date: journey.start_date,
            end_date: journey.end_date,
            crew_needed: None,
            waypoints: Vec::new(),
        });
    }
    Ok(legs)
}

/// The boat a new journey belongs to: explicit id, a name match, or the
/// owner's only boat.
async fn target_boat(ctx: &ToolContext, owner_id: &str, params: &Value) -> Result<Boat, ToolError> {
    if params.get("boat_id").is_some_and(|v| !v.is_null()) {
        return resolve_owned_boat(ctx, owner_id, params).await;
    }
    let boats = ctx.db.list_boats_by_owner(owner_id).await?;
    if let Some(name) = field(params, &["boat_name", "boat"]).and_then(normalize_string) {
        return boats
            .into_iter()
            .find(|b| b.name.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| ToolError::NotFound(format!("no boat named '{name}'")));
    }
    match boats.len() {
        0 => Err(ToolError::NotFound("no boat registered; create_boat first".to_string())),
        1 => Ok(boats.into_iter().next().ok_or_else(|| {
            ToolError::NotFound("no boat registered".to_string())
        })?),
        _ => Err(ToolError::Validation(
            "boat_id is required when the owner has several boats (see list_boats)".to_string(),
        )),
    }
}

/// Replace `slot` with a non-empty list that differs from it.
fn merge_list<T: PartialEq>(slot: &mut Vec<T>, new: Option<Vec<T>>) -> bool {
    match new {
        Some(list) if !list.is_empty() && *slot != list => {
            *slot = list;
            true
        }
        _ => false,
    }
}

/// Apply the descriptive journey fields present in `params`. Returns the
/// ones that changed. The resulting date range must be ordered.
fn apply_journey_fields(journey: &mut Journey, params: &Value) -> Result<Vec<String>, ToolError> {
    let mut written = Vec::new();
    let mut mark = |changed: bool, name: &str| {
        if changed {
            written.push(name.to_string());
        }
    };

    mark(
        merge(
            &mut journey.start_date,
            field(params, &["start_date"]).and_then(normalize_date),
        ),
        "start_date",
    );
    mark(
        merge(
            &mut journey.end_date,
            field(params, &["end_date"]).and_then(normalize_date),
        ),
        "end_date",
    );
    mark(
        merge(
            &mut journey.description,
            field(params, &["description"]).and_then(normalize_string),
        ),
        "description",
    );
    mark(
        merge_list(
            &mut journey.risk_level,
            field(params, &["risk_level", "risk_levels"]).and_then(normalize_risk_levels),
        ),
        "risk_level",
    );
    mark(
        merge_list(&mut journey.skills, field(params, &["skills"]).map(normalize_skills)),
        "skills",
    );
    mark(
        merge(
            &mut journey.min_experience_level,
            field(params, &["min_experience_level", "experience_level"])
                .and_then(normalize_experience_level)
                .map(|a| a.level),
        ),
        "min_experience_level",
    );
    let cost_model = field(params, &["cost_model"])
        .and_then(normalize_cost_model)
        .filter(|c| *c != CostModel::NotDefined && *c != journey.cost_model);
    if let Some(cost_model) = cost_model {
        journey.cost_model = cost_model;
        mark(true, "cost_model");
    }

    check_range("journey", journey.start_date, journey.end_date)?;
    Ok(written)
}

fn journey_json(journey: &Journey, legs: &[Leg]) -> Value {
    json!({
        "journey_id": journey.id.to_string(),
        "boat_id": journey.boat_id.to_string(),
        "name": journey.name,
        "start_date": journey.start_date,
        "end_date": journey.end_date,
        "state": journey.state.as_str(),
        "legs": legs.len(),
        "waypoints": legs.iter().map(|l| l.waypoints.len()).sum::<usize>(),
    })
}

// ── create_journey ──────────────────────────────────────────────────

pub struct CreateJourneyTool;

#[async_trait]
impl Tool for CreateJourneyTool {
    fn name(&self) -> &str {
        "create_journey"
    }

    fn description(&self) -> &str {
        "Create a journey on one of the owner's boats, with its legs and waypoints. \
         The journey and all legs are saved together. Waypoints need real coordinates."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "boat_id": {"type": "string", "description": "Id from list_boats"},
                "name": {"type": "string"},
                "start_date": {"type": "string", "format": "date"},
                "end_date": {"type": "string", "format": "date"},
                "description": {"type": "string"},
                "risk_level": {"type": "array", "items": {"type": "string"}},
                "skills": {"type": "array", "items": {"type": "string"}},
                "min_experience_level": {"type": "integer", "minimum": 1, "maximum": 4},
                "cost_model": {
                    "type": "string",
                    "enum": ["shared_contribution", "owner_covers_all", "crew_pays_fee", "delivery", "not_defined"]
                },
                "legs": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "start_date": {"type": "string", "format": "date"},
                            "end_date": {"type": "string", "format": "date"},
                            "crew_needed": {"type": "integer"},
                            "waypoints": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "name": {"type": "string"},
                                        "lat": {"type": "number"},
                                        "lng": {"type": "number"}
                                    }
                                }
                            }
                        }
                    }
                }
            },
            "required": ["name"]
        })
    }

    fn access(&self) -> ToolAccess {
        ToolAccess::RoleRestricted(UserRole::Owner)
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Mutate
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let owner_id = ctx.require_identity(self.name())?;
        let params = as_object(params);
        let name = require_str(&params, "name")?.to_string();
        let boat = target_boat(ctx, owner_id, &params).await?;

        let existing = ctx.db.list_journeys_by_owner(owner_id).await?;
        if let Some(found) = existing
            .iter()
            .find(|j| j.boat_id == boat.id && j.name.eq_ignore_ascii_case(&name))
        {
            let mut journey = found.clone();
            let written = apply_journey_fields(&mut journey, &params)?;
            let updated = !written.is_empty();
            if updated {
                ctx.db.update_journey(&journey).await?;
            }
            tracing::info!(journey_id = %journey.id, updated, fields = ?written, "Journey already existed");
            let legs = ctx.db.list_legs(journey.id).await?;
            let mut result = journey_json(&journey, &legs);
            result["already_exists"] = json!(true);
            result["updated"] = json!(updated);
            return Ok(ToolOutput::success(result, start.elapsed()).with_written_fields(written));
        }

        let mut journey = Journey {
            id: Uuid::new_v4(),
            boat_id: boat.id,
            name,
            start_date: None,
            end_date: None,
            description: None,
            risk_level: Vec::new(),
            skills: Vec::new(),
            min_experience_level: None,
            cost_model: CostModel::NotDefined,
            state: JourneyState::InPlanning,
            created_at: Utc::now(),
        };
        let mut written: Vec<String> = vec!["name".into(), "boat_id".into(), "legs".into()];
        written.extend(apply_journey_fields(&mut journey, &params)?);
        let legs = parse_legs(&journey, field(&params, &["legs"]))?;

        ctx.db.insert_journey_with_legs(&journey, &legs).await?;

        tracing::info!(
            journey_id = %journey.id,
            boat_id = %boat.id,
            legs = legs.len(),
            "Journey created"
        );
        let mut result = journey_json(&journey, &legs);
        result["created"] = json!(true);
        result["already_exists"] = json!(false);
        Ok(ToolOutput::success(result, start.elapsed()).with_written_fields(written))
    }
}

// ── list_journeys ───────────────────────────────────────────────────

pub struct ListJourneysTool;

#[async_trait]
impl Tool for ListJourneysTool {
    fn name(&self) -> &str {
        "list_journeys"
    }

    fn description(&self) -> &str {
        "List journeys on the owner's boats."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn access(&self) -> ToolAccess {
        ToolAccess::IdentityRequired
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let owner_id = ctx.require_identity(self.name())?;
        let journeys = ctx.db.list_journeys_by_owner(owner_id).await?;
        let mut list = Vec::with_capacity(journeys.len());
        for journey in &journeys {
            let legs = ctx.db.list_legs(journey.id).await?;
            list.push(journey_json(journey, &legs));
        }
        Ok(ToolOutput::success(
            json!({"journeys": list, "count": list.len()}),
            start.elapsed(),
        ))
    }
}

// ── search_journeys ─────────────────────────────────────────────────

pub struct SearchJourneysTool;

#[async_trait]
impl Tool for SearchJourneysTool {
    fn name(&self) -> &str {
        "search_journeys"
    }

    fn description(&self) -> &str {
        "Search published journeys that match what the user is looking for. \
         Use it to show real examples; never describe journeys you did not get from here."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "risk_level": {"type": "array", "items": {"type": "string"}},
                "experience_level": {"type": "integer", "minimum": 1, "maximum": 4},
                "start_after": {"type": "string", "format": "date"},
                "region": {"type": "string", "description": "Cruising area, e.g. Caribbean"},
                "limit": {"type": "integer", "maximum": MAX_SEARCH_RESULTS}
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let params = as_object(params);

        let region_value = field(&params, &["region", "location", "bbox"]);
        let region = region_value.and_then(normalize_bbox).or_else(|| {
            region_value
                .and_then(normalize_string)
                .and_then(|name| find_region(&name))
                .map(|r| r.bbox)
        });

        let search = JourneySearch {
            risk_levels: field(&params, &["risk_level", "risk_levels"])
                .and_then(normalize_risk_levels)
                .unwrap_or_default(),
            max_experience: field(&params, &["experience_level", "sailing_experience"])
                .and_then(normalize_experience_level)
                .map(|a| a.level),
            start_after: field(&params, &["start_after", "from_date"]).and_then(normalize_date),
            region,
            limit: field(&params, &["limit"])
                .and_then(|v| normalize_integer(v, 1, MAX_SEARCH_RESULTS))
                .unwrap_or(10) as usize,
        };

        let listings = ctx.db.search_journeys(&search).await?;
        Ok(ToolOutput::success(
            json!({"journeys": listings, "count": listings.len()}),
            start.elapsed(),
        ))
    }
}
