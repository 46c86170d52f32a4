//! Profile tools: `create_profile` (insert-or-update by existence check) and
//! `update_user_profile`.

use std::time::Instant;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{Value, json};

use crate::onboarding::model::{Profile, UserRole};
use crate::onboarding::normalize::{
    ExperienceAssessment, normalize_date, normalize_experience_level, normalize_location,
    normalize_risk_levels, normalize_skills, normalize_string,
};
use crate::store::Database;
use crate::tools::builtin::{as_object, field, merge};
use crate::tools::tool::{Tool, ToolAccess, ToolCategory, ToolContext, ToolError, ToolOutput};

const HANDLE_ATTEMPTS: usize = 5;

/// Apply every recognised profile field in `params`. Returns the names of
/// the fields that changed and the experience assessment, if one was made.
fn apply_profile_fields(
    profile: &mut Profile,
    params: &Value,
) -> (Vec<String>, Option<ExperienceAssessment>) {
    let mut written = Vec::new();
    let mut mark = |changed: bool, name: &str| {
        if changed {
            written.push(name.to_string());
        }
    };

    let text = |keys: &[&str]| field(params, keys).and_then(normalize_string);

    mark(
        merge(&mut profile.full_name, text(&["full_name", "name"])),
        "full_name",
    );
    mark(
        merge(
            &mut profile.user_description,
            text(&["user_description", "bio", "about"]),
        ),
        "user_description",
    );
    mark(
        merge(
            &mut profile.sailing_preferences,
            text(&["sailing_preferences", "preferences"]),
        ),
        "sailing_preferences",
    );
    mark(
        merge(&mut profile.certifications, text(&["certifications", "qualifications"])),
        "certifications",
    );
    mark(merge(&mut profile.phone, text(&["phone", "phone_number"])), "phone");

    let assessment = field(params, &["sailing_experience", "experience_level", "experience"])
        .and_then(normalize_experience_level);
    if let Some(ref a) = assessment {
        mark(
            merge(&mut profile.sailing_experience, Some(a.level)),
            "sailing_experience",
        );
    }

    if let Some(levels) =
        field(params, &["risk_level", "risk_levels", "comfort_zone"]).and_then(normalize_risk_levels)
        && levels != profile.risk_level
    {
        profile.risk_level = levels;
        mark(true, "risk_level");
    }

    if let Some(raw) = field(params, &["skills"]) {
        let skills = normalize_skills(raw);
        if !skills.is_empty() && skills != profile.skills {
            profile.skills = skills;
            mark(true, "skills");
        }
    }

    mark(
        merge(
            &mut profile.preferred_departure_location,
            field(params, &["preferred_departure_location", "departure_location"])
                .and_then(normalize_location),
        ),
        "preferred_departure_location",
    );
    mark(
        merge(
            &mut profile.preferred_arrival_location,
            field(params, &["preferred_arrival_location", "arrival_location"])
                .and_then(normalize_location),
        ),
        "preferred_arrival_location",
    );
    mark(
        merge(
            &mut profile.availability_start_date,
            field(params, &["availability_start_date", "available_from"]).and_then(normalize_date),
        ),
        "availability_start_date",
    );
    mark(
        merge(
            &mut profile.availability_end_date,
            field(params, &["availability_end_date", "available_until"]).and_then(normalize_date),
        ),
        "availability_end_date",
    );

    (written, assessment)
}

/// Slug for a handle: lowercase ASCII letters and digits joined by `_`.
fn handle_base(full_name: Option<&str>) -> String {
    let slug: String = full_name
        .unwrap_or("sailor")
        .to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    let slug: String = slug.chars().take(20).collect();
    if slug.is_empty() { "sailor".to_string() } else { slug }
}

fn handle_suffix() -> u32 {
    rand::thread_rng().gen_range(1000..10000)
}

/// Generate a handle not yet taken in the store.
async fn unique_handle(db: &dyn Database, full_name: Option<&str>) -> Result<String, ToolError> {
    let base = handle_base(full_name);
    for _ in 0..HANDLE_ATTEMPTS {
        let candidate = format!("{base}_{}", handle_suffix());
        if !db.username_exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    let fallback = uuid::Uuid::new_v4().simple().to_string();
    Ok(format!("{base}_{}", &fallback[..8]))
}

fn experience_json(assessment: &Option<ExperienceAssessment>) -> Value {
    match assessment {
        Some(a) => json!({
            "level": a.level.level(),
            "basis": a.basis,
            "rationale": a.rationale,
        }),
        None => Value::Null,
    }
}

fn profile_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "full_name": {"type": "string"},
            "user_description": {"type": "string", "description": "Short bio in the user's words"},
            "sailing_experience": {"type": "integer", "minimum": 1, "maximum": 4},
            "risk_level": {
                "type": "array",
                "items": {"type": "string", "enum": ["Coastal sailing", "Offshore sailing", "Extreme sailing"]}
            },
            "skills": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {"name": {"type": "string"}, "description": {"type": "string"}}
                }
            },
            "sailing_preferences": {"type": "string"},
            "certifications": {"type": "string"},
            "phone": {"type": "string"},
            "preferred_departure_location": {"type": "object", "properties": {"name": {"type": "string"}}},
            "preferred_arrival_location": {"type": "object", "properties": {"name": {"type": "string"}}},
            "availability_start_date": {"type": "string", "format": "date"},
            "availability_end_date": {"type": "string", "format": "date"}
        }
    })
}

// ── create_profile ──────────────────────────────────────────────────

/// Creates the caller's profile, or updates it when one already exists.
pub struct CreateProfileTool;

#[async_trait]
impl Tool for CreateProfileTool {
    fn name(&self) -> &str {
        "create_profile"
    }

    fn description(&self) -> &str {
        "Create the user's profile from what they told you. If a profile already exists \
         it is updated instead. Only include fields the user actually stated."
    }

    fn parameters_schema(&self) -> Value {
        profile_schema()
    }

    fn access(&self) -> ToolAccess {
        ToolAccess::IdentityRequired
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Mutate
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let user_id = ctx.require_identity(self.name())?;
        let params = as_object(params);
        let role = ctx.flow.default_role();

        if let Some(mut existing) = ctx.db.get_profile_by_user(user_id).await? {
            let (mut written, assessment) = apply_profile_fields(&mut existing, &params);
            if !existing.has_role(role) {
                existing.roles.push(role);
                written.push("roles".to_string());
            }
            let updated = !written.is_empty();
            if updated {
                ctx.db.update_profile(&existing).await?;
            }
            tracing::info!(user_id, updated, fields = ?written, "Profile already existed");
            return Ok(ToolOutput::success(
                json!({
                    "profile_id": existing.id.to_string(),
                    "username": existing.username,
                    "already_exists": true,
                    "updated": updated,
                    "experience": experience_json(&assessment),
                }),
                start.elapsed(),
            )
            .with_written_fields(written));
        }

        let mut profile = Profile::new(user_id, "", role);
        let (mut written, assessment) = apply_profile_fields(&mut profile, &params);
        if written.is_empty() {
            return Err(ToolError::Validation(
                "no valid profile fields supplied; include at least full_name".to_string(),
            ));
        }
        profile.username = unique_handle(ctx.db.as_ref(), profile.full_name.as_deref()).await?;
        ctx.db.insert_profile(&profile).await?;
        written.extend(["username".to_string(), "roles".to_string()]);

        tracing::info!(user_id, username = %profile.username, role = %role, "Profile created");
        Ok(ToolOutput::success(
            json!({
                "profile_id": profile.id.to_string(),
                "username": profile.username,
                "role": role,
                "created": true,
                "already_exists": false,
                "experience": experience_json(&assessment),
            }),
            start.elapsed(),
        )
        .with_written_fields(written))
    }
}

// ── update_user_profile ─────────────────────────────────────────────

pub struct UpdateUserProfileTool;

#[async_trait]
impl Tool for UpdateUserProfileTool {
    fn name(&self) -> &str {
        "update_user_profile"
    }

    fn description(&self) -> &str {
        "Update fields on the user's existing profile. Send only the fields that change."
    }

    fn parameters_schema(&self) -> Value {
        profile_schema()
    }

    fn access(&self) -> ToolAccess {
        ToolAccess::IdentityRequired
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Mutate
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let user_id = ctx.require_identity(self.name())?;
        let params = as_object(params);

        let mut profile = ctx.db.get_profile_by_user(user_id).await?.ok_or_else(|| {
            ToolError::NotFound("no profile for this user; create_profile first".to_string())
        })?;

        let (written, assessment) = apply_profile_fields(&mut profile, &params);
        if written.is_empty() {
            return Err(ToolError::Validation(
                "no valid fields to update".to_string(),
            ));
        }
        ctx.db.update_profile(&profile).await?;

        tracing::info!(user_id, fields = ?written, "Profile updated");
        Ok(ToolOutput::success(
            json!({
                "profile_id": profile.id.to_string(),
                "updated": true,
                "experience": experience_json(&assessment),
            }),
            start.elapsed(),
        )
        .with_written_fields(written))
    }
}
