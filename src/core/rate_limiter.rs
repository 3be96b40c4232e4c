use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio::sync::Mutex;

/// One credential's independent quota budget. Mutated only under the
/// limiter's lock.
#[derive(Debug, Clone)]
pub struct CredentialSlot {
    pub id: String,
    api_key: String,
    remaining: u64,
    ceiling: u64,
    reset_at: DateTime<Utc>,
    /// Set when the server rejected a call for quota despite local budget.
    /// `None` inside `cooling == true` means no known recovery time.
    cooldown_until: Option<DateTime<Utc>>,
    cooling: bool,
    last_used: Option<DateTime<Utc>>,
}

impl CredentialSlot {
    fn new(id: String, api_key: String, ceiling: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            id,
            api_key,
            remaining: ceiling,
            ceiling,
            reset_at,
            cooldown_until: None,
            cooling: false,
            last_used: None,
        }
    }
}

/// Successful acquisition: the credential to call with.
#[derive(Debug, Clone)]
pub struct Grant {
    pub slot_id: String,
    pub api_key: String,
}

/// Result of asking for quota. `Exhausted` means "stop issuing calls now",
/// not an error: every slot is cooling with no known recovery time.
#[derive(Debug, Clone)]
pub enum Acquire {
    Granted(Grant),
    Wait(Duration),
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct SlotUsage {
    pub slot_id: String,
    pub remaining: u64,
    pub ceiling: u64,
    pub used_percent: f64,
    pub reset_at: DateTime<Utc>,
    pub cooling: bool,
}

/// Tracks the remaining call budget across credential slots and gates
/// outbound calls. Quota counters reset lazily when a slot's window
/// elapses; no background timer.
pub struct QuotaLimiter {
    slots: Mutex<Vec<CredentialSlot>>,
    window: ChronoDuration,
}

impl QuotaLimiter {
    pub fn new(api_keys: &[String], ceiling: u64, window: Duration) -> Self {
        let window = ChronoDuration::from_std(window).unwrap_or(ChronoDuration::hours(24));
        let now = Utc::now();
        let slots = api_keys
            .iter()
            .enumerate()
            .map(|(idx, key)| {
                CredentialSlot::new(format!("slot-{}", idx + 1), key.clone(), ceiling, now + window)
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
            window,
        }
    }

    pub async fn acquire(&self, cost: u64) -> Acquire {
        self.acquire_at(cost, Utc::now()).await
    }

    pub(crate) async fn acquire_at(&self, cost: u64, now: DateTime<Utc>) -> Acquire {
        let mut slots = self.slots.lock().await;

        for slot in slots.iter_mut() {
            if now >= slot.reset_at {
                slot.remaining = slot.ceiling;
                slot.reset_at = now + self.window;
                slot.cooling = false;
                slot.cooldown_until = None;
            }
            if slot.cooling {
                if let Some(until) = slot.cooldown_until {
                    if now >= until {
                        slot.cooling = false;
                        slot.cooldown_until = None;
                    }
                }
            }
        }

        // Among slots that can cover the cost, prefer the least recently
        // used so load spreads across credentials.
        let candidate = slots
            .iter_mut()
            .filter(|s| !s.cooling && s.remaining >= cost)
            .min_by_key(|s| s.last_used.unwrap_or(DateTime::<Utc>::MIN_UTC));

        if let Some(slot) = candidate {
            slot.remaining -= cost;
            slot.last_used = Some(now);
            tracing::debug!(
                slot = %slot.id,
                cost,
                remaining = slot.remaining,
                "quota granted"
            );
            return Acquire::Granted(Grant {
                slot_id: slot.id.clone(),
                api_key: slot.api_key.clone(),
            });
        }

        // No grantable slot: report the shortest wait until any slot
        // recovers. Slots cooling without a known recovery time contribute
        // nothing; if that is all we have, the budget is exhausted.
        let shortest = slots
            .iter()
            .filter_map(|s| {
                if s.cooling {
                    s.cooldown_until
                } else {
                    Some(s.reset_at)
                }
            })
            .min();

        match shortest {
            Some(at) if at > now => {
                let wait = (at - now).to_std().unwrap_or(Duration::from_secs(1));
                Acquire::Wait(wait)
            }
            Some(_) => Acquire::Wait(Duration::from_millis(0)),
            None => Acquire::Exhausted,
        }
    }

    /// The server rejected a call for quota on this slot. With a hint the
    /// slot cools until then; without one it cools with no known recovery
    /// time, until its window rolls over.
    pub async fn start_cooldown(&self, slot_id: &str, retry_after: Option<Duration>) {
        self.start_cooldown_at(slot_id, retry_after, Utc::now()).await
    }

    pub(crate) async fn start_cooldown_at(
        &self,
        slot_id: &str,
        retry_after: Option<Duration>,
        now: DateTime<Utc>,
    ) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.iter_mut().find(|s| s.id == slot_id) {
            slot.cooling = true;
            slot.cooldown_until =
                retry_after.and_then(|d| ChronoDuration::from_std(d).ok().map(|d| now + d));
            tracing::warn!(slot = %slot.id, until = ?slot.cooldown_until, "credential slot cooling down");
        }
    }

    /// Adopt the server's view of this slot's budget when the API reports
    /// remaining quota or a reset time.
    pub async fn sync_server_quota(
        &self,
        slot_id: &str,
        remaining: Option<u64>,
        reset_at: Option<DateTime<Utc>>,
    ) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.iter_mut().find(|s| s.id == slot_id) {
            if let Some(remaining) = remaining {
                slot.remaining = remaining.min(slot.ceiling);
            }
            if let Some(reset_at) = reset_at {
                slot.reset_at = reset_at;
            }
        }
    }

    /// Per-slot quota usage for the monitoring surface.
    pub async fn usage(&self) -> Vec<SlotUsage> {
        let slots = self.slots.lock().await;
        slots
            .iter()
            .map(|s| SlotUsage {
                slot_id: s.id.clone(),
                remaining: s.remaining,
                ceiling: s.ceiling,
                used_percent: if s.ceiling > 0 {
                    ((s.ceiling - s.remaining) as f64 / s.ceiling as f64 * 100.0 * 100.0).round()
                        / 100.0
                } else {
                    0.0
                },
                reset_at: s.reset_at,
                cooling: s.cooling,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(keys: usize, ceiling: u64) -> QuotaLimiter {
        let keys: Vec<String> = (0..keys).map(|i| format!("key-{}", i)).collect();
        QuotaLimiter::new(&keys, ceiling, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_granted_costs_never_exceed_ceiling() {
        let limiter = limiter(1, 10);
        let now = Utc::now();

        let mut granted = 0u64;
        for _ in 0..20 {
            match limiter.acquire_at(3, now).await {
                Acquire::Granted(_) => granted += 3,
                Acquire::Wait(_) | Acquire::Exhausted => break,
            }
        }
        assert!(granted <= 10);
        assert_eq!(granted, 9);
    }

    #[tokio::test]
    async fn test_wait_until_reset_when_budget_spent() {
        let limiter = limiter(1, 5);
        let now = Utc::now();

        assert!(matches!(
            limiter.acquire_at(5, now).await,
            Acquire::Granted(_)
        ));
        match limiter.acquire_at(1, now).await {
            Acquire::Wait(wait) => {
                assert!(wait <= Duration::from_secs(3600));
                assert!(wait > Duration::from_secs(3500));
            }
            other => panic!("expected Wait, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lazy_reset_restores_ceiling() {
        let limiter = limiter(1, 5);
        let now = Utc::now();

        assert!(matches!(
            limiter.acquire_at(5, now).await,
            Acquire::Granted(_)
        ));
        assert!(matches!(limiter.acquire_at(1, now).await, Acquire::Wait(_)));

        // Past the window boundary the full ceiling is available again.
        let later = now + ChronoDuration::hours(2);
        assert!(matches!(
            limiter.acquire_at(5, later).await,
            Acquire::Granted(_)
        ));
    }

    #[tokio::test]
    async fn test_least_recently_used_slot_preferred() {
        let limiter = limiter(2, 100);
        let now = Utc::now();

        let first = match limiter.acquire_at(1, now).await {
            Acquire::Granted(grant) => grant.slot_id,
            other => panic!("expected grant, got {:?}", other),
        };
        let second = match limiter.acquire_at(1, now + ChronoDuration::seconds(1)).await {
            Acquire::Granted(grant) => grant.slot_id,
            other => panic!("expected grant, got {:?}", other),
        };
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_rotates_to_other_slot_on_exhaustion() {
        let limiter = limiter(2, 5);
        let now = Utc::now();

        for _ in 0..2 {
            assert!(matches!(
                limiter.acquire_at(5, now).await,
                Acquire::Granted(_)
            ));
        }
        // Both budgets spent now.
        assert!(matches!(limiter.acquire_at(5, now).await, Acquire::Wait(_)));
    }

    #[tokio::test]
    async fn test_exhausted_when_all_slots_cooling_without_hint() {
        let limiter = limiter(2, 100);
        let now = Utc::now();

        limiter.start_cooldown_at("slot-1", None, now).await;
        limiter.start_cooldown_at("slot-2", None, now).await;

        assert!(matches!(
            limiter.acquire_at(1, now).await,
            Acquire::Exhausted
        ));

        // A fresh window clears the cooldown.
        let later = now + ChronoDuration::hours(2);
        assert!(matches!(
            limiter.acquire_at(1, later).await,
            Acquire::Granted(_)
        ));
    }

    #[tokio::test]
    async fn test_cooldown_with_hint_reports_wait() {
        let limiter = limiter(1, 100);
        let now = Utc::now();

        limiter
            .start_cooldown_at("slot-1", Some(Duration::from_secs(30)), now)
            .await;
        match limiter.acquire_at(1, now).await {
            Acquire::Wait(wait) => assert!(wait <= Duration::from_secs(30)),
            other => panic!("expected Wait, got {:?}", other),
        }

        // And the slot recovers once the hint elapses.
        assert!(matches!(
            limiter.acquire_at(1, now + ChronoDuration::seconds(31)).await,
            Acquire::Granted(_)
        ));
    }

    #[tokio::test]
    async fn test_usage_percentages() {
        let limiter = limiter(1, 10);
        let now = Utc::now();
        for _ in 0..3 {
            limiter.acquire_at(1, now).await;
        }

        let usage = limiter.usage().await;
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].remaining, 7);
        assert_eq!(usage[0].used_percent, 30.0);
    }
}
