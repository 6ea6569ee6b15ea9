//! Job and notification-channel reads for dispatch.

use uuid::Uuid;

use super::models::{ChannelRow, JobDispatchInfo};
use super::Database;
use crate::error::StoreError;

impl Database {
    /// Resolve the owning user and configured channel set for a job.
    pub async fn job_dispatch_info(
        &self,
        job_id: Uuid,
    ) -> Result<Option<JobDispatchInfo>, StoreError> {
        let row = sqlx::query_as::<_, JobDispatchInfo>(
            "SELECT user_id, name, notification_channel_ids FROM jobs WHERE id = $1",
        )
        .bind(job_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    /// The user's active notification channels restricted to the given set.
    pub async fn active_channels(
        &self,
        user_id: Uuid,
        channel_ids: &[Uuid],
    ) -> Result<Vec<ChannelRow>, StoreError> {
        let rows = sqlx::query_as::<_, ChannelRow>(
            "SELECT id, user_id, channel_type, config, is_active \
             FROM notification_channels \
             WHERE user_id = $1 AND is_active = true AND id = ANY($2)",
        )
        .bind(user_id)
        .bind(channel_ids.to_vec())
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }
}
