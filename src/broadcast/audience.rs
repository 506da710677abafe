//! Audience resolution: selector token → ordered recipients.

use async_trait::async_trait;
use std::sync::Arc;

use crate::broadcast::error::{BroadcastError, BroadcastResult};
use crate::broadcast::model::{Channel, RecipientIdentity};
use crate::broadcast::selector::Selector;
use crate::storage::StoreError;

/// Query interface over users and subscriptions.
///
/// Implementations must answer every [`Selector`] variant, return recipients
/// in a stable order, and keep `count_by_filter` consistent with the length
/// of `iterate_by_filter` for an unchanged audience.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn count_by_filter(&self, selector: &Selector) -> Result<u64, StoreError>;

    async fn iterate_by_filter(&self, selector: &Selector) -> Result<Vec<RecipientIdentity>, StoreError>;

    /// Whether `tariff_id` names a tariff that is currently sold.
    async fn is_active_tariff(&self, tariff_id: i64) -> Result<bool, StoreError>;
}

#[derive(Clone)]
pub struct AudienceResolver {
    store: Arc<dyn UserStore>,
}

impl AudienceResolver {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Parses `token` and checks dynamic parts against the store.
    pub async fn validate(&self, token: &str) -> BroadcastResult<Selector> {
        let selector: Selector = token.parse()?;
        self.check_tariff(&selector).await?;
        Ok(selector)
    }

    /// Like [`validate`](Self::validate), restricted to one channel's family.
    pub async fn validate_for(&self, token: &str, channel: Channel) -> BroadcastResult<Selector> {
        let selector = Selector::parse_for(token, channel)?;
        self.check_tariff(&selector).await?;
        Ok(selector)
    }

    async fn check_tariff(&self, selector: &Selector) -> BroadcastResult<()> {
        if let Selector::Tariff(id) = selector {
            if !self.store.is_active_tariff(*id).await? {
                return Err(BroadcastError::InvalidSelector(format!(
                    "tariff {} does not exist or is not active",
                    id
                )));
            }
        }
        Ok(())
    }

    /// Validates `token` for `channel` and materializes its recipients.
    pub async fn resolve(&self, token: &str, channel: Channel) -> BroadcastResult<Vec<RecipientIdentity>> {
        let selector = self.validate_for(token, channel).await?;
        let recipients = self.store.iterate_by_filter(&selector).await?;
        log::debug!("Resolved {} → {} recipients", selector, recipients.len());
        Ok(recipients)
    }

    /// Audience size for a preview. May drift from a later `resolve`.
    pub async fn count(&self, token: &str) -> BroadcastResult<u64> {
        let selector = self.validate(token).await?;
        Ok(self.store.count_by_filter(&selector).await?)
    }
}
