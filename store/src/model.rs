//! Shared data model — spec §3.
//!
//! Every timestamp here is UTC at rest (Design Notes: "Always store
//! instants in UTC"); conversion to a local timezone only happens inside
//! `MarketHoursWindow::compute`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ExchangeId = String;
pub type SessionId = Uuid;
pub type UserId = String;
pub type DeviceId = String;

/// Desired-state record for one exchange worker (spec §3 "ExchangeWorker").
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeWorker {
    pub exch_id: ExchangeId,
    pub exchange_type: String,
    pub timezone: Tz,
    pub pre_open_time: NaiveTime,
    pub post_close_time: NaiveTime,
}

/// `[pre_open_local - 5min, post_close_local + 5min]` converted to UTC,
/// empty on weekends (spec §3 "MarketHoursWindow").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketHoursWindow {
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
}

const PRE_POST_PAD: i64 = 5;

impl MarketHoursWindow {
    /// Compute the window for `exchange` on `local_date` (a date in the
    /// exchange's own timezone). Returns `None` on Saturday/Sunday.
    pub fn compute(exchange: &ExchangeWorker, local_date: NaiveDate) -> Option<Self> {
        if matches!(local_date.weekday(), Weekday::Sat | Weekday::Sun) {
            return None;
        }

        let pre_open_local = local_date.and_time(exchange.pre_open_time);
        let post_close_local = local_date.and_time(exchange.post_close_time);

        let start_local = exchange
            .timezone
            .from_local_datetime(&(pre_open_local - Duration::minutes(PRE_POST_PAD)))
            .single()?;
        let end_local = exchange
            .timezone
            .from_local_datetime(&(post_close_local + Duration::minutes(PRE_POST_PAD)))
            .single()?;

        Some(Self {
            start_utc: start_local.with_timezone(&Utc),
            end_utc: end_local.with_timezone(&Utc),
        })
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start_utc && instant <= self.end_utc
    }
}

// `chrono_tz::Tz` implements `TimeZone` via `chrono::offset::TimeZone`; re-export
// the trait method used above under a short alias to avoid an extra import at
// call sites throughout the lifecycle controller.
use chrono::TimeZone as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Creating,
    Active,
    Reconnecting,
    Inactive,
    Expired,
    Error,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Creating => "CREATING",
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Reconnecting => "RECONNECTING",
            SessionStatus::Inactive => "INACTIVE",
            SessionStatus::Expired => "EXPIRED",
            SessionStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

impl FromStr for SessionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATING" => Ok(SessionStatus::Creating),
            "ACTIVE" => Ok(SessionStatus::Active),
            "RECONNECTING" => Ok(SessionStatus::Reconnecting),
            "INACTIVE" => Ok(SessionStatus::Inactive),
            "EXPIRED" => Ok(SessionStatus::Expired),
            "ERROR" => Ok(SessionStatus::Error),
            other => Err(anyhow::anyhow!("invalid SessionStatus value: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionQuality {
    Good,
    Degraded,
    Poor,
}

impl fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionQuality::Good => "good",
            ConnectionQuality::Degraded => "degraded",
            ConnectionQuality::Poor => "poor",
        };
        f.write_str(s)
    }
}

impl FromStr for ConnectionQuality {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "good" => Ok(ConnectionQuality::Good),
            "degraded" => Ok(ConnectionQuality::Degraded),
            "poor" => Ok(ConnectionQuality::Poor),
            other => Err(anyhow::anyhow!("invalid ConnectionQuality value: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub connection_quality: ConnectionQuality,
    pub reconnect_count: u32,
    pub heartbeat_latency_ms: Option<u64>,
    pub missed_heartbeats: u32,
    pub simulator_id: Option<String>,
    pub simulator_endpoint: Option<String>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Persisted shadow of a live `WSConnection` (spec §3). The live connection
/// handle never crosses this boundary — only metadata does.
#[derive(Debug, Clone)]
pub struct WsConnectionRecord {
    pub session_id: SessionId,
    pub device_id: DeviceId,
    pub client_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Per-minute OHLCV summary for one symbol (spec §3 "MarketDataBar").
#[derive(Debug, Clone, PartialEq)]
pub struct MarketDataBar {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub vwap: Decimal,
    pub vwas: Decimal,
    pub vwav: Decimal,
    pub volume: i64,
    pub trade_count: i64,
    pub currency: String,
}

impl MarketDataBar {
    /// Floor `timestamp` to the exact minute — enforced before persistence
    /// and before broadcast (spec §3 invariant, §8 testable property #3).
    pub fn floor_to_minute(mut self) -> Self {
        self.timestamp = floor_to_minute(self.timestamp);
        self
    }
}

pub fn floor_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive()
        .and_hms_opt(ts.time().hour(), ts.time().minute(), 0)
        .expect("valid minute boundary")
        .and_utc()
}

use chrono::Timelike;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowExecutionRecord {
    pub execution_id: Uuid,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Running,
    Success,
    Failed,
    Timeout,
    Skipped,
    Cancelled,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "PENDING",
            TaskState::Running => "RUNNING",
            TaskState::Success => "SUCCESS",
            TaskState::Failed => "FAILED",
            TaskState::Timeout => "TIMEOUT",
            TaskState::Skipped => "SKIPPED",
            TaskState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowTaskRecord {
    pub execution_id: Uuid,
    pub task_id: String,
    pub state: TaskState,
    pub attempt: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ny_exchange() -> ExchangeWorker {
        ExchangeWorker {
            exch_id: "e1".into(),
            exchange_type: "equities".into(),
            timezone: chrono_tz::America::New_York,
            pre_open_time: NaiveTime::from_hms_opt(4, 0, 0).unwrap(),
            post_close_time: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        }
    }

    #[test]
    fn weekend_window_is_empty() {
        // 2025-11-01 is a Saturday.
        let date = NaiveDate::from_ymd_opt(2025, 11, 1).unwrap();
        assert!(MarketHoursWindow::compute(&ny_exchange(), date).is_none());
    }

    #[test]
    fn s1_market_hours_boundary() {
        let date = NaiveDate::from_ymd_opt(2025, 11, 3).unwrap(); // Monday
        let window = MarketHoursWindow::compute(&ny_exchange(), date).unwrap();

        let before = DateTime::parse_from_rfc3339("2025-11-03T08:54:59Z")
            .unwrap()
            .with_timezone(&Utc);
        let at_open = DateTime::parse_from_rfc3339("2025-11-03T08:55:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let after = DateTime::parse_from_rfc3339("2025-11-03T21:05:01Z")
            .unwrap()
            .with_timezone(&Utc);

        assert!(!window.contains(before));
        assert!(window.contains(at_open));
        assert!(!window.contains(after));
    }

    #[test]
    fn bar_timestamp_floors_to_minute() {
        let ts = DateTime::parse_from_rfc3339("2025-11-03T09:00:45.500Z")
            .unwrap()
            .with_timezone(&Utc);
        let bar = MarketDataBar {
            timestamp: ts,
            symbol: "AAPL".into(),
            open: Decimal::ONE,
            high: Decimal::ONE,
            low: Decimal::ONE,
            close: Decimal::ONE,
            vwap: Decimal::ONE,
            vwas: Decimal::ONE,
            vwav: Decimal::ONE,
            volume: 1,
            trade_count: 1,
            currency: "USD".into(),
        }
        .floor_to_minute();

        assert_eq!(bar.timestamp.second(), 0);
        assert_eq!(bar.timestamp.nanosecond(), 0);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn exchange_with(pre_open_h: u32, pre_open_m: u32, post_close_h: u32, post_close_m: u32) -> ExchangeWorker {
        ExchangeWorker {
            exch_id: "e1".into(),
            exchange_type: "equities".into(),
            timezone: chrono_tz::America::New_York,
            pre_open_time: NaiveTime::from_hms_opt(pre_open_h, pre_open_m, 0).unwrap(),
            post_close_time: NaiveTime::from_hms_opt(post_close_h, post_close_m, 0).unwrap(),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(1000))]
        #[test]
        fn weekday_window_is_inclusive_and_ordered(
            day_offset in 0i64..3650,
            // Kept away from midnight and the 02:00-02:59 hour so the 5-minute
            // pad never crosses a calendar day or a US DST spring-forward gap.
            pre_open_h in 4u32..=11,
            pre_open_m in 0u32..60,
            gap_minutes in 10i64..600,
        ) {
            // 2024-01-01 is a Monday; walking forward covers every weekday.
            let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(day_offset);
            let pre_open = NaiveTime::from_hms_opt(pre_open_h, pre_open_m, 0).unwrap();
            let post_close = pre_open + Duration::minutes(gap_minutes);
            // Keep post_close on the same calendar day so the fixture stays simple.
            prop_assume!(post_close.hour() >= pre_open.hour());

            let exchange = exchange_with(pre_open_h, pre_open_m, post_close.hour(), post_close.minute());
            let window = MarketHoursWindow::compute(&exchange, date);

            match date.weekday() {
                Weekday::Sat | Weekday::Sun => prop_assert!(window.is_none()),
                _ => {
                    let window = window.expect("weekday must produce a window");
                    prop_assert!(window.start_utc <= window.end_utc);
                    prop_assert!(window.contains(window.start_utc));
                    prop_assert!(window.contains(window.end_utc));
                }
            }
        }
    }
}
