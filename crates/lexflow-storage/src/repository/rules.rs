//! Automation rule repository

use crate::db::{db_err, DatabasePool};
use crate::models::{Action, AutomationRule, CatchConfig, MapDirective, RuleInput};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lexflow_common::types::RuleId;
use lexflow_common::Result;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Rule repository trait
#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn create(&self, input: RuleInput) -> Result<AutomationRule>;
    async fn get(&self, id: RuleId) -> Result<Option<AutomationRule>>;
    /// All rules, highest priority first
    async fn list(&self) -> Result<Vec<AutomationRule>>;
    /// Active rules in evaluation order: priority descending, then oldest first
    async fn list_active(&self) -> Result<Vec<AutomationRule>>;
    async fn update(&self, id: RuleId, input: RuleInput) -> Result<Option<AutomationRule>>;
    async fn set_active(&self, id: RuleId, is_active: bool) -> Result<Option<AutomationRule>>;
    async fn delete(&self, id: RuleId) -> Result<bool>;
}

#[derive(FromRow)]
struct RuleRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    is_active: bool,
    priority: i32,
    approver_identity: Option<String>,
    catch_config: Json<CatchConfig>,
    map_config: Json<Vec<MapDirective>>,
    action_bundle: Json<Vec<Action>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RuleRow> for AutomationRule {
    fn from(row: RuleRow) -> Self {
        AutomationRule {
            id: row.id,
            name: row.name,
            description: row.description,
            is_active: row.is_active,
            priority: row.priority,
            approver_identity: row.approver_identity,
            catch_config: row.catch_config.0,
            map_config: row.map_config.0,
            action_bundle: row.action_bundle.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Database rule repository
pub struct DbRuleRepository {
    pool: DatabasePool,
}

impl DbRuleRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RuleRepository for DbRuleRepository {
    async fn create(&self, input: RuleInput) -> Result<AutomationRule> {
        let id = Uuid::now_v7();
        let now = Utc::now();

        let row = sqlx::query_as::<_, RuleRow>(
            r#"
            INSERT INTO automation_rules (
                id, name, description, is_active, priority, approver_identity,
                catch_config, map_config, action_bundle, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.is_active)
        .bind(input.priority)
        .bind(&input.approver_identity)
        .bind(Json(&input.catch_config))
        .bind(Json(&input.map_config))
        .bind(Json(&input.action_bundle))
        .bind(now)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(row.into())
    }

    async fn get(&self, id: RuleId) -> Result<Option<AutomationRule>> {
        let row = sqlx::query_as::<_, RuleRow>("SELECT * FROM automation_rules WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?;
        Ok(row.map(Into::into))
    }

    async fn list(&self) -> Result<Vec<AutomationRule>> {
        let rows = sqlx::query_as::<_, RuleRow>(
            "SELECT * FROM automation_rules ORDER BY priority DESC, created_at ASC",
        )
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_active(&self) -> Result<Vec<AutomationRule>> {
        let rows = sqlx::query_as::<_, RuleRow>(
            r#"
            SELECT * FROM automation_rules
            WHERE is_active = true
            ORDER BY priority DESC, created_at ASC
            "#,
        )
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update(&self, id: RuleId, input: RuleInput) -> Result<Option<AutomationRule>> {
        let row = sqlx::query_as::<_, RuleRow>(
            r#"
            UPDATE automation_rules SET
                name = $2, description = $3, is_active = $4, priority = $5,
                approver_identity = $6, catch_config = $7, map_config = $8,
                action_bundle = $9, updated_at = $10
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.is_active)
        .bind(input.priority)
        .bind(&input.approver_identity)
        .bind(Json(&input.catch_config))
        .bind(Json(&input.map_config))
        .bind(Json(&input.action_bundle))
        .bind(Utc::now())
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;
        Ok(row.map(Into::into))
    }

    async fn set_active(&self, id: RuleId, is_active: bool) -> Result<Option<AutomationRule>> {
        let row = sqlx::query_as::<_, RuleRow>(
            "UPDATE automation_rules SET is_active = $2, updated_at = $3 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(is_active)
        .bind(Utc::now())
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;
        Ok(row.map(Into::into))
    }

    async fn delete(&self, id: RuleId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM automation_rules WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}
