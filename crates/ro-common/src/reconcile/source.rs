use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::ObservedObjectives;
use crate::store::{ActivitySummary, OutreachStore, StoreError};

/// Where externally observed candidate signals come from.
#[async_trait]
pub trait ObjectiveSource: Send + Sync {
    /// Objectives from the most recent analyzed interaction with `phone`.
    async fn latest_objectives(
        &self,
        phone: &str,
    ) -> Result<Option<ObservedObjectives>, StoreError>;

    async fn activity_since(
        &self,
        phone: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<ActivitySummary, StoreError>;
}

/// Reads signals from stored call analyses.
pub struct CallAnalysisSource {
    store: Arc<dyn OutreachStore>,
}

impl CallAnalysisSource {
    pub fn new(store: Arc<dyn OutreachStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ObjectiveSource for CallAnalysisSource {
    async fn latest_objectives(
        &self,
        phone: &str,
    ) -> Result<Option<ObservedObjectives>, StoreError> {
        Ok(self
            .store
            .latest_analysis_for_phone(phone)
            .await?
            .map(|analysis| ObservedObjectives::from(&analysis.objectives)))
    }

    async fn activity_since(
        &self,
        phone: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<ActivitySummary, StoreError> {
        self.store.call_activity_since(phone, since).await
    }
}
