//! Per-subscriber checkpoints: `(last_position, status)`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use sqlx::Row;

use crate::error::{Error, Result};
use crate::executor::{Executor, SqlValue};
use crate::schema::Bootstrap;
use crate::store::Backend;

/// Lifecycle status of a projection checkpoint.
///
/// Transitions: `Running → DeadLetter` on repeated failure, any status →
/// `Rebuilding` on reset, `Rebuilding → Running` when a rebuild completes.
/// `Stopped` is an operator-set state; like `DeadLetter` it suspends
/// processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionStatus {
    Running,
    Rebuilding,
    DeadLetter,
    Stopped,
}

impl ProjectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectionStatus::Running => "running",
            ProjectionStatus::Rebuilding => "rebuilding",
            ProjectionStatus::DeadLetter => "dead_letter",
            ProjectionStatus::Stopped => "stopped",
        }
    }

    /// True when the worker should not process events in this state.
    pub fn is_suspended(self) -> bool {
        matches!(self, ProjectionStatus::DeadLetter | ProjectionStatus::Stopped)
    }
}

impl fmt::Display for ProjectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(ProjectionStatus::Running),
            "rebuilding" => Ok(ProjectionStatus::Rebuilding),
            "dead_letter" => Ok(ProjectionStatus::DeadLetter),
            "stopped" => Ok(ProjectionStatus::Stopped),
            other => Err(Error::InvalidArgument(format!(
                "checkpoint: unknown status {other:?}"
            ))),
        }
    }
}

/// Tracks the last processed global position and status for each
/// subscriber, enabling resume-from-where-you-left-off semantics.
pub struct CheckpointStore {
    exec: Arc<dyn Executor>,
    bootstrap: Arc<Bootstrap>,
}

impl CheckpointStore {
    pub fn new(backend: &dyn Backend) -> Self {
        Self {
            exec: backend.executor(),
            bootstrap: backend.bootstrap(),
        }
    }

    async fn ensure(&self, name: &str) -> Result<()> {
        self.bootstrap
            .ensure_checkpoints(self.exec.as_ref())
            .await
            .map_err(|e| match e {
                Error::Db { context, source } => Error::Db {
                    context: format!("checkpoint {name}: {context}"),
                    source,
                },
                other => other,
            })
    }

    /// Returns the last processed position and status. A subscriber with
    /// no checkpoint row yet is `(0, Running)`.
    pub async fn load(&self, name: &str) -> Result<(i64, ProjectionStatus)> {
        self.ensure(name).await?;

        let context = format!("checkpoint {name}: load");
        let row = self
            .exec
            .fetch_optional(
                "SELECT last_position, status FROM whisker_projection_checkpoints \
                 WHERE projection_name = $1",
                &[SqlValue::Text(name.to_owned())],
            )
            .await
            .map_err(|e| Error::db(context.clone(), e))?;

        let Some(row) = row else {
            return Ok((0, ProjectionStatus::Running));
        };
        let position: i64 = row.try_get(0).map_err(|e| Error::db(context.clone(), e.into()))?;
        let status: String = row.try_get(1).map_err(|e| Error::db(context.clone(), e.into()))?;
        Ok((position, status.parse()?))
    }

    /// Upserts the checkpoint position. Status is left untouched.
    pub async fn save(&self, name: &str, position: i64) -> Result<()> {
        self.ensure(name).await?;

        self.exec
            .execute(
                "INSERT INTO whisker_projection_checkpoints (projection_name, last_position, updated_at) \
                 VALUES ($1, $2, now()) \
                 ON CONFLICT (projection_name) DO UPDATE SET last_position = $2, updated_at = now()",
                &[SqlValue::Text(name.to_owned()), SqlValue::Int8(position)],
            )
            .await
            .map_err(|e| Error::db(format!("checkpoint {name}: save"), e))?;
        Ok(())
    }

    /// Upserts the status, preserving the position (a fresh row starts at
    /// position 0).
    pub async fn set_status(&self, name: &str, status: ProjectionStatus) -> Result<()> {
        self.ensure(name).await?;

        self.exec
            .execute(
                "INSERT INTO whisker_projection_checkpoints (projection_name, last_position, status, updated_at) \
                 VALUES ($1, 0, $2, now()) \
                 ON CONFLICT (projection_name) DO UPDATE SET status = $2, updated_at = now()",
                &[
                    SqlValue::Text(name.to_owned()),
                    SqlValue::Text(status.as_str().to_owned()),
                ],
            )
            .await
            .map_err(|e| Error::db(format!("checkpoint {name}: set status"), e))?;
        Ok(())
    }

    /// Rewinds the checkpoint to position 0 with status `rebuilding`.
    pub async fn reset(&self, name: &str) -> Result<()> {
        self.ensure(name).await?;

        self.exec
            .execute(
                "INSERT INTO whisker_projection_checkpoints (projection_name, last_position, status, updated_at) \
                 VALUES ($1, 0, 'rebuilding', now()) \
                 ON CONFLICT (projection_name) DO UPDATE \
                 SET last_position = 0, status = 'rebuilding', updated_at = now()",
                &[SqlValue::Text(name.to_owned())],
            )
            .await
            .map_err(|e| Error::db(format!("checkpoint {name}: reset"), e))?;
        Ok(())
    }
}
