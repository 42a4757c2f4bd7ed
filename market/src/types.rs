//! Shared types for the market-data multiplexer — spec §3 ("Subscription")
//! and §4.3.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use store::model::MarketDataBar;
use tokio::sync::mpsc;

pub type SubscriberId = String;

/// The outbound envelope built once per upstream batch (spec §4.3 step 3)
/// and then filtered per-subscriber before sending.
#[derive(Debug, Clone, PartialEq)]
pub struct BarEnvelope {
    pub timestamp: DateTime<Utc>,
    pub data: Vec<MarketDataBar>,
}

impl BarEnvelope {
    /// `None` in `symbols` means "all symbols" (spec §3 "Subscription").
    pub fn filtered(&self, symbols: Option<&HashSet<String>>) -> Self {
        let data = match symbols {
            Some(wanted) => self
                .data
                .iter()
                .filter(|bar| wanted.contains(&bar.symbol))
                .cloned()
                .collect(),
            None => self.data.clone(),
        };
        Self {
            timestamp: self.timestamp,
            data,
        }
    }
}

/// One registered downstream subscriber (spec §3 "Subscription").
pub struct Subscription {
    pub subscriber_id: SubscriberId,
    pub symbols: Option<HashSet<String>>,
    pub tx: mpsc::Sender<BarEnvelope>,
    pub last_successful_send: Option<DateTime<Utc>>,
}
