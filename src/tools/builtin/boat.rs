//! Boat tools: idempotent `create_boat`, owner-checked `update_boat`, and
//! `list_boats`.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::onboarding::model::{Boat, UserRole};
use crate::onboarding::normalize::{
    normalize_boat_category, normalize_f64, normalize_integer, normalize_string,
};
use crate::tools::builtin::{as_object, field, merge};
use crate::tools::tool::{
    Tool, ToolAccess, ToolCategory, ToolContext, ToolError, ToolOutput, require_str,
};

/// Apply every recognised boat field except `name`. Returns changed fields.
fn apply_boat_fields(boat: &mut Boat, params: &Value) -> Vec<String> {
    let mut written = Vec::new();
    let mut mark = |changed: bool, name: &str| {
        if changed {
            written.push(name.to_string());
        }
    };
    let text = |keys: &[&str]| field(params, keys).and_then(normalize_string);
    let max_year = i64::from(Utc::now().year()) + 1;

    mark(
        merge(
            &mut boat.boat_type,
            field(params, &["boat_type", "category", "type"]).and_then(normalize_boat_category),
        ),
        "boat_type",
    );
    mark(
        merge(&mut boat.make_model, text(&["make_model", "make_and_model", "model"])),
        "make_model",
    );
    mark(
        merge(
            &mut boat.capacity,
            field(params, &["capacity", "berths", "crew_capacity"])
                .and_then(|v| normalize_integer(v, 1, 100)),
        ),
        "capacity",
    );
    mark(merge(&mut boat.home_port, text(&["home_port", "port"])), "home_port");
    mark(
        merge(&mut boat.country_flag, text(&["country_flag", "flag"])),
        "country_flag",
    );
    mark(
        merge(
            &mut boat.loa_m,
            field(params, &["loa_m", "length", "loa"])
                .and_then(normalize_f64)
                .filter(|m| *m > 1.0 && *m < 150.0),
        ),
        "loa_m",
    );
    mark(
        merge(
            &mut boat.year_built,
            field(params, &["year_built", "year"]).and_then(|v| normalize_integer(v, 1800, max_year)),
        ),
        "year_built",
    );
    mark(
        merge(
            &mut boat.characteristics,
            text(&["characteristics", "description"]),
        ),
        "characteristics",
    );
    written
}

fn same_text(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// An existing boat equivalent to the one being created: same name, or
/// same make/model.
fn find_equivalent<'a>(
    boats: &'a [Boat],
    name: &str,
    make_model: Option<&str>,
) -> Option<&'a Boat> {
    boats
        .iter()
        .find(|b| same_text(&b.name, name))
        .or_else(|| {
            let mm = make_model?;
            boats
                .iter()
                .find(|b| b.make_model.as_deref().is_some_and(|m| same_text(m, mm)))
        })
}

fn boat_json(boat: &Boat) -> Value {
    json!({
        "id": boat.id.to_string(),
        "name": boat.name,
        "boat_type": boat.boat_type,
        "make_model": boat.make_model,
        "capacity": boat.capacity,
        "home_port": boat.home_port,
        "country_flag": boat.country_flag,
        "loa_m": boat.loa_m,
        "year_built": boat.year_built,
    })
}

fn boat_schema(require_id: bool) -> Value {
    let mut schema = json!({
        "type": "object",
        "properties": {
            "name": {"type": "string", "description": "Boat name"},
            "boat_type": {
                "type": "string",
                "enum": ["Daysailers", "Coastal cruisers", "Traditional offshore cruisers",
                         "Performance cruisers", "Multihulls", "Expedition sailboats"]
            },
            "make_model": {"type": "string", "description": "e.g. Hallberg-Rassy 42"},
            "capacity": {"type": "integer", "description": "Berths"},
            "home_port": {"type": "string"},
            "country_flag": {"type": "string"},
            "loa_m": {"type": "number", "description": "Length overall in metres"},
            "year_built": {"type": "integer"},
            "characteristics": {"type": "string"}
        },
        "required": ["name"]
    });
    if require_id {
        schema["properties"]["boat_id"] = json!({"type": "string", "description": "Id from list_boats"});
        schema["required"] = json!(["boat_id"]);
    }
    schema
}

// ── create_boat ─────────────────────────────────────────────────────

/// Registers a boat. Repeating the call for an equivalent boat merges the
/// new fields instead of inserting a duplicate.
pub struct CreateBoatTool;

#[async_trait]
impl Tool for CreateBoatTool {
    fn name(&self) -> &str {
        "create_boat"
    }

    fn description(&self) -> &str {
        "Register the owner's boat. If the boat already exists (same name or make/model) \
         the new details are merged into it instead."
    }

    fn parameters_schema(&self) -> Value {
        boat_schema(false)
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

        let existing = ctx.db.list_boats_by_owner(owner_id).await?;
        let make_model = field(&params, &["make_model", "make_and_model", "model"])
            .and_then(normalize_string);

        if let Some(found) = find_equivalent(&existing, &name, make_model.as_deref()) {
            let mut boat = found.clone();
            let mut merge_params = params.clone();
            if let (Some(new_mm), Some(old_mm)) = (make_model.as_deref(), boat.make_model.as_deref())
                && same_text(new_mm, old_mm)
                && let Some(obj) = merge_params.as_object_mut()
            {
                for key in ["make_model", "make_and_model", "model"] {
                    obj.remove(key);
                }
            }
            let written = apply_boat_fields(&mut boat, &merge_params);
            let updated = !written.is_empty();
            if updated {
                ctx.db.update_boat(&boat).await?;
            }
            tracing::info!(boat_id = %boat.id, updated, fields = ?written, "Boat already existed");
            return Ok(ToolOutput::success(
                json!({
                    "boat_id": boat.id.to_string(),
                    "already_exists": true,
                    "updated": updated,
                    "boat": boat_json(&boat),
                }),
                start.elapsed(),
            )
            .with_written_fields(written));
        }

        let mut boat = Boat::new(owner_id, &name);
        let mut written = vec!["name".to_string()];
        written.extend(apply_boat_fields(&mut boat, &params));
        ctx.db.insert_boat(&boat).await?;

        tracing::info!(boat_id = %boat.id, owner_id, "Boat created");
        Ok(ToolOutput::success(
            json!({
                "boat_id": boat.id.to_string(),
                "created": true,
                "already_exists": false,
                "boat": boat_json(&boat),
            }),
            start.elapsed(),
        )
        .with_written_fields(written))
    }
}

// ── update_boat ─────────────────────────────────────────────────────

pub struct UpdateBoatTool;

#[async_trait]
impl Tool for UpdateBoatTool {
    fn name(&self) -> &str {
        "update_boat"
    }

    fn description(&self) -> &str {
        "Update details of one of the owner's boats. Identify it by boat_id from list_boats."
    }

    fn parameters_schema(&self) -> Value {
        boat_schema(true)
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
        let mut boat = resolve_owned_boat(ctx, owner_id, &params).await?;

        let mut written = Vec::new();
        if let Some(new_name) = field(&params, &["name", "new_name"]).and_then(normalize_string)
            && new_name != boat.name
        {
            boat.name = new_name;
            written.push("name".to_string());
        }
        written.extend(apply_boat_fields(&mut boat, &params));
        if written.is_empty() {
            return Err(ToolError::Validation("no valid fields to update".to_string()));
        }
        ctx.db.update_boat(&boat).await?;

        tracing::info!(boat_id = %boat.id, fields = ?written, "Boat updated");
        Ok(ToolOutput::success(
            json!({"boat_id": boat.id.to_string(), "updated": true, "boat": boat_json(&boat)}),
            start.elapsed(),
        )
        .with_written_fields(written))
    }
}

/// Find the target boat by `boat_id`, enforcing ownership before any write.
pub(crate) async fn resolve_owned_boat(
    ctx: &ToolContext,
    owner_id: &str,
    params: &Value,
) -> Result<Boat, ToolError> {
    let raw_id = require_str(params, "boat_id")?;
    let id = Uuid::parse_str(raw_id)
        .map_err(|_| ToolError::Validation(format!("boat_id '{raw_id}' is not a valid id")))?;
    let boat = ctx
        .db
        .get_boat(id)
        .await?
        .ok_or_else(|| ToolError::NotFound(format!("boat {id}")))?;
    if boat.owner_id != owner_id {
        return Err(ToolError::Ownership(format!(
            "boat {id} does not belong to this user"
        )));
    }
    Ok(boat)
}

// ── list_boats ──────────────────────────────────────────────────────

pub struct ListBoatsTool;

#[async_trait]
impl Tool for ListBoatsTool {
    fn name(&self) -> &str {
        "list_boats"
    }

    fn description(&self) -> &str {
        "List the owner's boats with their ids."
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
        let boats = ctx.db.list_boats_by_owner(owner_id).await?;
        let list: Vec<Value> = boats.iter().map(boat_json).collect();
        Ok(ToolOutput::success(
            json!({"boats": list, "count": list.len()}),
            start.elapsed(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::model::{BoatCategory, Flow};
    use crate::store::{Database, LibSqlBackend};
    use std::sync::Arc;

    async fn ctx_for(db: Arc<dyn Database>, user: &str) -> ToolContext {
        ToolContext::new(Some(user.into()), Flow::Owner, db)
    }

    async fn owner_ctx() -> ToolContext {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        ctx_for(db, "owner-1").await
    }

    #[tokio::test]
    async fn create_twice_yields_one_row() {
        let ctx = owner_ctx().await;
        let params = json!({"name": "Saltwhistle", "make_model": "Westerly Centaur"});
        let first = CreateBoatTool.execute(params.clone(), &ctx).await.unwrap();
        assert_eq!(first.result["created"], true);

        let second = CreateBoatTool.execute(params, &ctx).await.unwrap();
        assert_eq!(second.result["already_exists"], true);
        assert_eq!(second.result["updated"], false);
        assert_eq!(first.result["boat_id"], second.result["boat_id"]);

        assert_eq!(ctx.db.list_boats_by_owner("owner-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_make_model_new_home_port_updates() {
        let ctx = owner_ctx().await;
        CreateBoatTool
            .execute(json!({"name": "Saltwhistle", "make_model": "Westerly Centaur"}), &ctx)
            .await
            .unwrap();

        let out = CreateBoatTool
            .execute(
                json!({"name": "Salt Whistle II", "make_model": "westerly centaur", "home_port": "Falmouth"}),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(out.result["already_exists"], true);
        assert_eq!(out.result["updated"], true);
        assert_eq!(out.written_fields, vec!["home_port".to_string()]);

        let boats = ctx.db.list_boats_by_owner("owner-1").await.unwrap();
        assert_eq!(boats.len(), 1);
        assert_eq!(boats[0].name, "Saltwhistle");
        assert_eq!(boats[0].home_port.as_deref(), Some("Falmouth"));
    }

    #[tokio::test]
    async fn create_normalizes_loose_fields() {
        let ctx = owner_ctx().await;
        let out = CreateBoatTool
            .execute(
                json!({"name": "Kittiwake", "type": "catamaran", "berths": "6", "length": "12.5m", "year": 1850.0}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(
            out.written_fields,
            vec!["name", "boat_type", "capacity", "loa_m", "year_built"]
        );
        let boats = ctx.db.list_boats_by_owner("owner-1").await.unwrap();
        assert_eq!(boats[0].boat_type, Some(BoatCategory::Multihull));
        assert_eq!(boats[0].capacity, Some(6));
        assert_eq!(boats[0].loa_m, Some(12.5));
    }

    #[tokio::test]
    async fn missing_name_is_validation_error() {
        let ctx = owner_ctx().await;
        let err = CreateBoatTool
            .execute(json!({"make_model": "Contessa 32"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
        assert!(ctx.db.list_boats_by_owner("owner-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_checks_ownership_before_writing() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let alice = ctx_for(db.clone(), "alice").await;
        let mallory = ctx_for(db.clone(), "mallory").await;

        let out = CreateBoatTool
            .execute(json!({"name": "Saltwhistle"}), &alice)
            .await
            .unwrap();
        let boat_id = out.result["boat_id"].as_str().unwrap().to_string();

        let err = UpdateBoatTool
            .execute(json!({"boat_id": boat_id, "home_port": "Brest"}), &mallory)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Ownership(_)));

        let err = UpdateBoatTool
            .execute(json!({"boat_id": "not-a-uuid", "home_port": "Brest"}), &alice)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));

        let err = UpdateBoatTool
            .execute(json!({"boat_id": Uuid::new_v4().to_string(), "home_port": "Brest"}), &alice)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));

        let out = UpdateBoatTool
            .execute(json!({"boat_id": boat_id, "home_port": "Brest"}), &alice)
            .await
            .unwrap();
        assert_eq!(out.written_fields, vec!["home_port".to_string()]);
        let boats = db.list_boats_by_owner("alice").await.unwrap();
        assert_eq!(boats[0].home_port.as_deref(), Some("Brest"));
    }

    #[tokio::test]
    async fn list_boats_scoped_to_owner() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let alice = ctx_for(db.clone(), "alice").await;
        let bob = ctx_for(db.clone(), "bob").await;
        CreateBoatTool
            .execute(json!({"name": "Saltwhistle"}), &alice)
            .await
            .unwrap();

        let out = ListBoatsTool.execute(json!({}), &alice).await.unwrap();
        assert_eq!(out.result["count"], 1);
        let out = ListBoatsTool.execute(json!({}), &bob).await.unwrap();
        assert_eq!(out.result["count"], 0);
    }
}
