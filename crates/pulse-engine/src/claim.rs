//! Claim resolution - the concurrency-critical core
//!
//! One atomic conditional update decides every claim. If it matches, the
//! caller won; if it matches nothing, the caller lost. No prior locking, no
//! retry loop, no read-then-write window. The loss reason comes from a
//! best-effort secondary read and is user messaging only - it never feeds
//! back into a correctness decision.

use std::sync::Arc;

use pulse_core::{ClientId, Collectible, CollectibleId, PulseError, PulseResult, Timestamp};
use pulse_store::{Collection, Condition, Store, Update};

/// Classification of a claim attempt's outcome
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimReason {
    /// This attempt's conditional update landed
    Granted,
    /// Another claimant's update landed first
    AlreadyClaimed,
    /// The collectible's lifetime ran out
    Expired,
    /// Deactivated without a claimant (swept) or otherwise not claimable
    Unavailable,
    /// No such collectible
    NotFound,
}

impl ClaimReason {
    /// User-facing message, distinct from a true error
    pub fn message(self) -> &'static str {
        match self {
            ClaimReason::Granted => "Collectible claimed successfully!",
            ClaimReason::AlreadyClaimed => "Someone else claimed it first",
            ClaimReason::Expired => "Collectible expired",
            ClaimReason::Unavailable => "Collectible not available",
            ClaimReason::NotFound => "Collectible not found",
        }
    }
}

/// Definitive outcome of one claim attempt
#[derive(Clone, Debug)]
pub struct ClaimOutcome {
    pub granted: bool,
    pub reason: ClaimReason,
    /// The claimed collectible, present only when granted
    pub collectible: Option<Collectible>,
    /// Position in the claim race (1 for the winner of a single-claim drop)
    pub claim_order: Option<u32>,
}

impl ClaimOutcome {
    fn lost(reason: ClaimReason) -> Self {
        ClaimOutcome {
            granted: false,
            reason,
            collectible: None,
            claim_order: None,
        }
    }
}

/// Resolves claim attempts against the store
pub struct ClaimResolver<S> {
    store: Arc<S>,
}

impl<S> Clone for ClaimResolver<S> {
    fn clone(&self) -> Self {
        ClaimResolver {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> ClaimResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        ClaimResolver { store }
    }

    /// Attempt to claim a collectible for `claimant`.
    ///
    /// Exactly one caller can ever observe `granted == true` for a given
    /// collectible: the winning path requires `claimed_by` unset, and the
    /// same indivisible operation that checks it also sets it.
    pub async fn attempt_claim(
        &self,
        collectible_id: &CollectibleId,
        claimant: &ClientId,
    ) -> PulseResult<ClaimOutcome> {
        // Analytics counter, best-effort; a failure here must not block the claim
        if let Err(err) = self
            .store
            .conditional_update(
                Collection::Collectibles,
                collectible_id.as_str(),
                &Condition::any(),
                &Update::new().inc("claim_attempts", 1),
            )
            .await
        {
            tracing::debug!(%err, "claim attempt counter update failed");
        }

        let now = Timestamp::now();
        let condition = Condition::any()
            .unset("claimed_by")
            .eq("is_active", true)
            .ts_gt("expires_at", now);
        let update = Update::new()
            .set("claimed_by", claimant.as_str())
            .set("claimed_at", now.as_millis())
            .set("is_active", false)
            .inc("successful_claims", 1);

        let won = self
            .store
            .conditional_update(Collection::Collectibles, collectible_id.as_str(), &condition, &update)
            .await?;

        match won {
            Some(doc) => {
                let collectible: Collectible = serde_json::from_value(doc)
                    .map_err(|e| PulseError::MalformedDocument(e.to_string()))?;
                let claim_order = collectible.successful_claims;
                tracing::info!(
                    collectible = %collectible_id,
                    claimant = %claimant,
                    "claim granted"
                );
                Ok(ClaimOutcome {
                    granted: true,
                    reason: ClaimReason::Granted,
                    collectible: Some(collectible),
                    claim_order: Some(claim_order),
                })
            }
            None => Ok(ClaimOutcome::lost(self.classify_loss(collectible_id, now).await)),
        }
    }

    /// Best-effort secondary read to explain a lost claim. Diagnostic only.
    async fn classify_loss(&self, collectible_id: &CollectibleId, now: Timestamp) -> ClaimReason {
        let doc = match self
            .store
            .get(Collection::Collectibles, collectible_id.as_str())
            .await
        {
            Ok(Some(doc)) => doc,
            Ok(None) => return ClaimReason::NotFound,
            Err(err) => {
                tracing::debug!(%err, "loss classification read failed");
                return ClaimReason::Unavailable;
            }
        };

        let collectible: Collectible = match serde_json::from_value(doc) {
            Ok(c) => c,
            Err(_) => return ClaimReason::Unavailable,
        };

        if collectible.claimed_by.is_some() {
            ClaimReason::AlreadyClaimed
        } else if collectible.expires_at <= now {
            ClaimReason::Expired
        } else {
            ClaimReason::Unavailable
        }
    }
}
