//! # PostgreSQL Storage
//!
//! SQLx-backed [`Storage`]. Enum columns are stored as text and parsed back
//! through the row structs below; payload columns use JSONB.
//!
//! The relation table carries a primary key on `(resource_id, resource_type)`
//! and the lock write is `INSERT .. ON CONFLICT DO NOTHING RETURNING ..`, so
//! two concurrent lockers can never both succeed.

use super::{RelationInsert, Storage};
use crate::constants::{DetailState, FlowState, ResourceType};
use crate::error::{FlowError, Result};
use crate::models::{
    ActionId, DetailPatch, Flow, FlowTask, NewFlow, NewResourceFlowRelation, NewTaskManagement,
    NewTaskManagementDetail, ResourceFlowRelation, RetryPolicy, SubFlowRelation, TaskManagement,
    TaskManagementDetail, TaskParams,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, error};

/// Conflicting relations can be released between the failed insert and the
/// owner lookup; retry the insert this many times before giving up.
const RELATION_INSERT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| FlowError::Aborted(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_column<T: FromStr<Err = String>>(value: &str) -> Result<T> {
    value.parse().map_err(|e: String| {
        error!(value = %value, "Unrecognized enum value in storage");
        FlowError::Aborted(e)
    })
}

#[derive(Debug, FromRow)]
struct TaskManagementRow {
    id: i64,
    business_id: i64,
    vendor: String,
    account_id: String,
    source: String,
    task_type: String,
    flow_ids: Vec<i64>,
    created_at: DateTime<Utc>,
}

impl TaskManagementRow {
    fn into_model(self) -> Result<TaskManagement> {
        Ok(TaskManagement {
            id: self.id,
            business_id: self.business_id,
            vendor: parse_column(&self.vendor)?,
            account_id: self.account_id,
            source: self.source,
            task_type: parse_column(&self.task_type)?,
            flow_ids: self.flow_ids,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct DetailRow {
    id: i64,
    task_management_id: i64,
    business_id: i64,
    task_type: String,
    param: serde_json::Value,
    flow_id: Option<i64>,
    action_id: Option<String>,
    state: String,
    reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DetailRow {
    fn into_model(self) -> Result<TaskManagementDetail> {
        Ok(TaskManagementDetail {
            id: self.id,
            task_management_id: self.task_management_id,
            business_id: self.business_id,
            task_type: parse_column(&self.task_type)?,
            param: self.param,
            flow_id: self.flow_id,
            action_id: self.action_id.map(ActionId::new),
            state: parse_column(&self.state)?,
            reason: self.reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct FlowRow {
    id: i64,
    flow_type: String,
    state: String,
    share_data: Json<BTreeMap<String, String>>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct FlowTaskRow {
    action_id: String,
    action_name: String,
    params: Json<TaskParams>,
    depends_on: Vec<String>,
    retry: Json<RetryPolicy>,
}

impl FlowTaskRow {
    fn into_model(self) -> Result<FlowTask> {
        Ok(FlowTask {
            action_id: ActionId::new(self.action_id),
            action_name: parse_column(&self.action_name)?,
            params: self.params.0,
            depends_on: self.depends_on.into_iter().map(ActionId::new).collect(),
            retry: self.retry.0,
        })
    }
}

#[derive(Debug, FromRow)]
struct RelationRow {
    resource_id: String,
    resource_type: String,
    flow_id: i64,
    lock_kind: String,
    created_at: DateTime<Utc>,
}

impl RelationRow {
    fn into_model(self) -> Result<ResourceFlowRelation> {
        Ok(ResourceFlowRelation {
            resource_id: self.resource_id,
            resource_type: parse_column(&self.resource_type)?,
            flow_id: self.flow_id,
            lock_kind: parse_column(&self.lock_kind)?,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SubFlowRow {
    flow_id: i64,
    resource_id: String,
    resource_type: String,
}

const DETAIL_COLUMNS: &str = "id, task_management_id, business_id, task_type, param, flow_id, \
     action_id, state, reason, created_at, updated_at";

#[async_trait]
impl Storage for PgStorage {
    async fn create_task_management(&self, new: NewTaskManagement) -> Result<TaskManagement> {
        let row = sqlx::query_as::<_, TaskManagementRow>(
            r#"
            INSERT INTO lb_task_managements (business_id, vendor, account_id, source, task_type)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, business_id, vendor, account_id, source, task_type, flow_ids, created_at
            "#,
        )
        .bind(new.business_id)
        .bind(new.vendor.as_str())
        .bind(&new.account_id)
        .bind(&new.source)
        .bind(new.task_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        row.into_model()
    }

    async fn get_task_management(&self, id: i64) -> Result<Option<TaskManagement>> {
        let row = sqlx::query_as::<_, TaskManagementRow>(
            r#"
            SELECT id, business_id, vendor, account_id, source, task_type, flow_ids, created_at
            FROM lb_task_managements
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TaskManagementRow::into_model).transpose()
    }

    async fn attach_flows(&self, task_management_id: i64, flow_ids: &[i64]) -> Result<()> {
        let result = sqlx::query(
            "UPDATE lb_task_managements SET flow_ids = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(task_management_id)
        .bind(flow_ids)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(FlowError::RecordNotFound(format!(
                "task management {task_management_id}"
            )));
        }
        Ok(())
    }

    async fn create_task_details(
        &self,
        details: Vec<NewTaskManagementDetail>,
    ) -> Result<Vec<TaskManagementDetail>> {
        if details.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO lb_task_management_details \
             (task_management_id, business_id, task_type, param, state) ",
        );
        builder.push_values(details, |mut row, detail| {
            row.push_bind(detail.task_management_id)
                .push_bind(detail.business_id)
                .push_bind(detail.task_type.as_str())
                .push_bind(detail.param)
                .push_bind(DetailState::Pending.as_str());
        });
        builder.push(format!(" RETURNING {DETAIL_COLUMNS}"));

        let mut rows = builder
            .build_query_as::<DetailRow>()
            .fetch_all(&self.pool)
            .await?;
        // ids follow VALUES order; sort so callers can rely on it
        rows.sort_by_key(|r| r.id);

        debug!(count = rows.len(), "Created task management details");
        rows.into_iter().map(DetailRow::into_model).collect()
    }

    async fn list_task_details(
        &self,
        task_management_id: i64,
    ) -> Result<Vec<TaskManagementDetail>> {
        let rows = sqlx::query_as::<_, DetailRow>(&format!(
            "SELECT {DETAIL_COLUMNS} FROM lb_task_management_details \
             WHERE task_management_id = $1 ORDER BY id"
        ))
        .bind(task_management_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DetailRow::into_model).collect()
    }

    async fn update_task_details(&self, patches: &[DetailPatch]) -> Result<()> {
        if patches.is_empty() {
            return Ok(());
        }

        let ids: Vec<i64> = patches.iter().map(|p| p.id).collect();
        let flow_ids: Vec<Option<i64>> = patches.iter().map(|p| p.flow_id).collect();
        let action_ids: Vec<Option<String>> = patches
            .iter()
            .map(|p| p.action_id.as_ref().map(|a| a.as_str().to_string()))
            .collect();
        let states: Vec<Option<String>> = patches
            .iter()
            .map(|p| p.state.map(|s| s.as_str().to_string()))
            .collect();
        let reasons: Vec<Option<String>> = patches.iter().map(|p| p.reason.clone()).collect();

        sqlx::query(
            r#"
            UPDATE lb_task_management_details AS d
            SET flow_id = COALESCE(u.flow_id, d.flow_id),
                action_id = COALESCE(u.action_id, d.action_id),
                state = COALESCE(u.state, d.state),
                reason = COALESCE(u.reason, d.reason),
                updated_at = NOW()
            FROM UNNEST($1::BIGINT[], $2::BIGINT[], $3::TEXT[], $4::TEXT[], $5::TEXT[])
                AS u(id, flow_id, action_id, state, reason)
            WHERE d.id = u.id
            "#,
        )
        .bind(&ids)
        .bind(&flow_ids)
        .bind(&action_ids)
        .bind(&states)
        .bind(&reasons)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_flow(&self, flow: NewFlow) -> Result<Flow> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, FlowRow>(
            r#"
            INSERT INTO lb_flows (flow_type, state, share_data)
            VALUES ($1, $2, $3)
            RETURNING id, flow_type, state, share_data, created_at
            "#,
        )
        .bind(flow.flow_type.as_str())
        .bind(FlowState::Init.as_str())
        .bind(Json(&flow.share_data))
        .fetch_one(&mut *tx)
        .await?;

        for (position, task) in flow.tasks.iter().enumerate() {
            let depends_on: Vec<&str> = task.depends_on.iter().map(ActionId::as_str).collect();
            sqlx::query(
                r#"
                INSERT INTO lb_flow_tasks (flow_id, position, action_id, action_name, params, depends_on, retry)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(row.id)
            .bind(position as i32)
            .bind(task.action_id.as_str())
            .bind(task.action_name.as_str())
            .bind(Json(&task.params))
            .bind(&depends_on)
            .bind(Json(&task.retry))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(Flow {
            id: row.id,
            flow_type: parse_column(&row.flow_type)?,
            state: parse_column(&row.state)?,
            share_data: row.share_data.0,
            tasks: flow.tasks,
            created_at: row.created_at,
        })
    }

    async fn get_flow(&self, flow_id: i64) -> Result<Option<Flow>> {
        let Some(row) = sqlx::query_as::<_, FlowRow>(
            "SELECT id, flow_type, state, share_data, created_at FROM lb_flows WHERE id = $1",
        )
        .bind(flow_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let tasks = sqlx::query_as::<_, FlowTaskRow>(
            r#"
            SELECT action_id, action_name, params, depends_on, retry
            FROM lb_flow_tasks
            WHERE flow_id = $1
            ORDER BY position
            "#,
        )
        .bind(flow_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(FlowTaskRow::into_model)
        .collect::<Result<Vec<_>>>()?;

        Ok(Some(Flow {
            id: row.id,
            flow_type: parse_column(&row.flow_type)?,
            state: parse_column(&row.state)?,
            share_data: row.share_data.0,
            tasks,
            created_at: row.created_at,
        }))
    }

    async fn cas_flow_state(
        &self,
        flow_id: i64,
        expected: FlowState,
        target: FlowState,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE lb_flows SET state = $3, updated_at = NOW() WHERE id = $1 AND state = $2",
        )
        .bind(flow_id)
        .bind(expected.as_str())
        .bind(target.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_resource_relation(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
    ) -> Result<Option<ResourceFlowRelation>> {
        let row = sqlx::query_as::<_, RelationRow>(
            r#"
            SELECT resource_id, resource_type, flow_id, lock_kind, created_at
            FROM lb_resource_flow_relations
            WHERE resource_id = $1 AND resource_type = $2
            "#,
        )
        .bind(resource_id)
        .bind(resource_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(RelationRow::into_model).transpose()
    }

    async fn try_create_resource_relation(
        &self,
        relation: NewResourceFlowRelation,
    ) -> Result<RelationInsert> {
        for _ in 0..RELATION_INSERT_ATTEMPTS {
            let inserted = sqlx::query_as::<_, RelationRow>(
                r#"
                INSERT INTO lb_resource_flow_relations (resource_id, resource_type, flow_id, lock_kind)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (resource_id, resource_type) DO NOTHING
                RETURNING resource_id, resource_type, flow_id, lock_kind, created_at
                "#,
            )
            .bind(&relation.resource_id)
            .bind(relation.resource_type.as_str())
            .bind(relation.flow_id)
            .bind(relation.lock_kind.as_str())
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = inserted {
                return Ok(RelationInsert::Created(row.into_model()?));
            }

            if let Some(owner) = self
                .find_resource_relation(&relation.resource_id, relation.resource_type)
                .await?
            {
                return Ok(RelationInsert::Conflict(owner));
            }
        }

        Err(FlowError::Aborted(format!(
            "relation for {} {} kept changing during insert",
            relation.resource_type, relation.resource_id
        )))
    }

    async fn delete_resource_relation(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
        flow_id: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM lb_resource_flow_relations
            WHERE resource_id = $1 AND resource_type = $2 AND flow_id = $3
            "#,
        )
        .bind(resource_id)
        .bind(resource_type.as_str())
        .bind(flow_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn create_sub_flow_relations(&self, relations: Vec<SubFlowRelation>) -> Result<()> {
        if relations.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO lb_sub_flow_relations (flow_id, resource_id, resource_type) ",
        );
        builder.push_values(relations, |mut row, relation| {
            row.push_bind(relation.flow_id)
                .push_bind(relation.resource_id)
                .push_bind(relation.resource_type.as_str());
        });
        builder.push(" ON CONFLICT DO NOTHING");
        builder.build().execute(&self.pool).await?;

        Ok(())
    }

    async fn list_sub_flow_relations(&self, flow_id: i64) -> Result<Vec<SubFlowRelation>> {
        let rows = sqlx::query_as::<_, SubFlowRow>(
            r#"
            SELECT flow_id, resource_id, resource_type
            FROM lb_sub_flow_relations
            WHERE flow_id = $1
            ORDER BY resource_id
            "#,
        )
        .bind(flow_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(SubFlowRelation {
                    flow_id: row.flow_id,
                    resource_id: row.resource_id,
                    resource_type: parse_column(&row.resource_type)?,
                })
            })
            .collect()
    }
}
