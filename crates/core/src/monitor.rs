use std::collections::HashMap;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::types::Position;

/// Per-position automation record. Not persisted by the broker; rebuilt
/// from the live position list after a reconnect.
#[derive(Debug, Clone)]
pub struct AutomationSettings {
    pub trailing: bool,
    pub trailing_profit: Decimal,
    pub trailing_distance: Decimal,
    pub breakeven: bool,
    pub breakeven_profit: Decimal,
    /// One-shot guard: breakeven never re-fires once activated.
    pub breakeven_activated: bool,
    pub partial_close_profit: Option<Decimal>,
    /// One-shot guard: the partial-close rule triggers at most once.
    pub partial_closed: bool,
    /// Stamp of the last successful broker amendment; bounds the amendment
    /// rate per position.
    pub last_modified: Option<Instant>,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            trailing: false,
            trailing_profit: Decimal::TEN,
            trailing_distance: Decimal::from(5),
            breakeven: false,
            breakeven_profit: Decimal::from(5),
            breakeven_activated: false,
            partial_close_profit: None,
            partial_closed: false,
            last_modified: None,
        }
    }
}

impl AutomationSettings {
    #[must_use]
    pub fn cooled_down(&self, cooldown: Duration) -> bool {
        self.last_modified.map_or(true, |t| t.elapsed() >= cooldown)
    }
}

/// Single owner of all automation bookkeeping, shared between the order
/// executor, the automation engine and the client routers.
///
/// Live entries are keyed by position ticket; staged entries are keyed by
/// the pending-order ticket that created them and adopted by the position
/// once the order fills.
#[derive(Debug, Default)]
pub struct MonitorStore {
    positions: Mutex<HashMap<u64, AutomationSettings>>,
    staged: Mutex<HashMap<u64, AutomationSettings>>,
}

impl MonitorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a default entry for a newly observed position.
    pub async fn ensure(&self, ticket: u64) {
        self.positions.lock().await.entry(ticket).or_default();
    }

    pub async fn get(&self, ticket: u64) -> Option<AutomationSettings> {
        self.positions.lock().await.get(&ticket).cloned()
    }

    pub async fn insert(&self, ticket: u64, settings: AutomationSettings) {
        self.positions.lock().await.insert(ticket, settings);
    }

    /// Applies an in-place update, creating a default entry first when the
    /// ticket is unknown.
    pub async fn apply<F>(&self, ticket: u64, update: F)
    where
        F: FnOnce(&mut AutomationSettings),
    {
        let mut positions = self.positions.lock().await;
        update(positions.entry(ticket).or_default());
    }

    pub async fn remove(&self, ticket: u64) {
        self.positions.lock().await.remove(&ticket);
    }

    pub async fn mark_modified(&self, ticket: u64) {
        if let Some(settings) = self.positions.lock().await.get_mut(&ticket) {
            settings.last_modified = Some(Instant::now());
        }
    }

    pub async fn set_partial_closed(&self, ticket: u64) {
        if let Some(settings) = self.positions.lock().await.get_mut(&ticket) {
            settings.partial_closed = true;
        }
    }

    /// Stages settings for a pending order, keyed by the order ticket.
    pub async fn stage_pending(&self, order_ticket: u64, settings: AutomationSettings) {
        self.staged.lock().await.insert(order_ticket, settings);
    }

    pub async fn discard_staged(&self, order_ticket: u64) {
        self.staged.lock().await.remove(&order_ticket);
    }

    /// Re-keys staged settings after a cancel-and-recreate pending-order
    /// modification, so the settings follow the new order identity.
    pub async fn restage(&self, old_ticket: u64, new_ticket: u64) -> bool {
        let mut staged = self.staged.lock().await;
        match staged.remove(&old_ticket) {
            Some(settings) => {
                staged.insert(new_ticket, settings);
                true
            }
            None => false,
        }
    }

    /// Moves staged settings onto a filled position whose comment carries
    /// the originating order ticket. This is the only path that reassigns
    /// ownership of a settings record. Returns true on adoption.
    pub async fn adopt_staged(&self, position: &Position) -> bool {
        let mut staged = self.staged.lock().await;
        let matched = staged
            .keys()
            .find(|ticket| position.comment.contains(&ticket.to_string()))
            .copied();
        let Some(order_ticket) = matched else {
            return false;
        };
        if let Some(settings) = staged.remove(&order_ticket) {
            tracing::info!(
                "automation settings transferred from order #{order_ticket} to position #{}",
                position.ticket
            );
            self.positions
                .lock()
                .await
                .insert(position.ticket, settings);
            return true;
        }
        false
    }

    /// Purges entries whose positions no longer exist. At most one entry
    /// may exist per live position ticket.
    pub async fn retain_open(&self, open_tickets: &[u64]) {
        self.positions
            .lock()
            .await
            .retain(|ticket, _| open_tickets.contains(ticket));
    }

    pub async fn tracked(&self) -> Vec<u64> {
        self.positions.lock().await.keys().copied().collect()
    }

    pub async fn staged_count(&self) -> usize {
        self.staged.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PositionSide;

    fn filled_position(ticket: u64, comment: &str) -> Position {
        Position {
            ticket,
            symbol: "EURUSD".to_string(),
            side: PositionSide::Buy,
            volume: Decimal::new(10, 2),
            open_price: Decimal::ONE,
            sl: None,
            tp: None,
            profit: Decimal::ZERO,
            swap: Decimal::ZERO,
            commission: Decimal::ZERO,
            comment: comment.to_string(),
            current_price: Decimal::ONE,
        }
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let store = MonitorStore::new();
        store.ensure(7).await;
        store
            .apply(7, |s| {
                s.trailing = true;
            })
            .await;
        store.ensure(7).await;
        assert!(store.get(7).await.is_some_and(|s| s.trailing));
    }

    #[tokio::test]
    async fn staged_settings_follow_the_filled_position() {
        let store = MonitorStore::new();
        let mut settings = AutomationSettings::default();
        settings.trailing = true;
        store.stage_pending(555, settings).await;

        let position = filled_position(901, "order 555 filled");
        assert!(store.adopt_staged(&position).await);
        assert_eq!(store.staged_count().await, 0);
        assert!(store.get(901).await.is_some_and(|s| s.trailing));
    }

    #[tokio::test]
    async fn adoption_requires_comment_match() {
        let store = MonitorStore::new();
        store.stage_pending(555, AutomationSettings::default()).await;
        let position = filled_position(901, "manual entry");
        assert!(!store.adopt_staged(&position).await);
        assert_eq!(store.staged_count().await, 1);
    }

    #[tokio::test]
    async fn restage_moves_settings_to_the_new_order() {
        let store = MonitorStore::new();
        store.stage_pending(555, AutomationSettings::default()).await;
        assert!(store.restage(555, 556).await);
        assert!(!store.restage(555, 557).await);
        let position = filled_position(901, "order 556");
        assert!(store.adopt_staged(&position).await);
    }

    #[tokio::test]
    async fn retain_open_purges_closed_positions() {
        let store = MonitorStore::new();
        store.ensure(1).await;
        store.ensure(2).await;
        store.ensure(3).await;
        store.retain_open(&[2]).await;
        assert_eq!(store.tracked().await, vec![2]);
    }

    #[tokio::test]
    async fn cooldown_expires() {
        let settings = AutomationSettings {
            last_modified: Some(Instant::now()),
            ..AutomationSettings::default()
        };
        assert!(!settings.cooled_down(Duration::from_secs(5)));
        assert!(settings.cooled_down(Duration::ZERO));
        assert!(AutomationSettings::default().cooled_down(Duration::from_secs(5)));
    }
}
