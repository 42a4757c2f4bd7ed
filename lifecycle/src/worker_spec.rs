//! Deterministic exchange-worker specification template — spec §4.1
//! "the exchange specification ... is produced by a deterministic template
//! function of the exchange record — no hidden state".

use store::model::ExchangeWorker;

/// Everything `ClusterOps::start` needs to bring up one exchange worker.
/// Every field is computed purely from `ExchangeWorker`; nothing here reads
/// process-global state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub exch_id: String,
    /// `exchange-service-<lowercase-id>` (spec §6 "Lifecycle Controller ↔ Cluster").
    pub resource_name: String,
    pub image: String,
    pub cpu_request: String,
    pub memory_request: String,
    pub env: Vec<(String, String)>,
    pub ports: Vec<u16>,
}

const DEFAULT_IMAGE: &str = "tradesim/exchange-worker:latest";
const DEFAULT_CPU_REQUEST: &str = "250m";
const DEFAULT_MEMORY_REQUEST: &str = "256Mi";
const GRPC_PORT: u16 = 50051;
const METRICS_PORT: u16 = 9090;

impl WorkerSpec {
    pub fn from_exchange(exchange: &ExchangeWorker) -> Self {
        let resource_name = format!("exchange-service-{}", exchange.exch_id.to_lowercase());
        Self {
            exch_id: exchange.exch_id.clone(),
            resource_name,
            image: DEFAULT_IMAGE.to_string(),
            cpu_request: DEFAULT_CPU_REQUEST.to_string(),
            memory_request: DEFAULT_MEMORY_REQUEST.to_string(),
            env: vec![
                ("EXCH_ID".to_string(), exchange.exch_id.clone()),
                ("EXCHANGE_TYPE".to_string(), exchange.exchange_type.clone()),
                ("EXCHANGE_TIMEZONE".to_string(), exchange.timezone.to_string()),
            ],
            ports: vec![GRPC_PORT, METRICS_PORT],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    #[test]
    fn resource_name_is_lowercased() {
        let exchange = ExchangeWorker {
            exch_id: "NYSE".to_string(),
            exchange_type: "equities".to_string(),
            timezone: chrono_tz::America::New_York,
            pre_open_time: NaiveTime::from_hms_opt(4, 0, 0).unwrap(),
            post_close_time: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        };
        let spec = WorkerSpec::from_exchange(&exchange);
        assert_eq!(spec.resource_name, "exchange-service-nyse");
        assert!(spec.env.contains(&("EXCH_ID".to_string(), "NYSE".to_string())));
    }
}
