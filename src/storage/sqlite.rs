use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ActivityFilter, ActivityStore};
use crate::db::Database;
use crate::error::StorageError;
use crate::models::Activity;

#[async_trait]
impl ActivityStore for Database {
    async fn upsert(&self, activity: &Activity) -> Result<(), StorageError> {
        self.upsert_activity(activity).await.map_err(StorageError::from)
    }

    async fn fetch(&self, filter: ActivityFilter) -> Result<Vec<Activity>, StorageError> {
        let result = match filter {
            ActivityFilter::Open => self.get_open_activities().await,
            ActivityFilter::Overlapping { start, end } => {
                self.get_activities_overlapping(start, end, Utc::now()).await
            }
        };
        result.map_err(StorageError::from)
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.delete_activity(id).await.map_err(StorageError::from)
    }

    async fn close_open_except(
        &self,
        keep_id: &str,
        at: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        self.close_open_activities_except(keep_id, at)
            .await
            .map_err(StorageError::from)
    }

    async fn probe(&self) -> Result<(), StorageError> {
        self.ping().await.map_err(StorageError::from)
    }
}
