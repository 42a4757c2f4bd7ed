//! The `ExchangeWorker` gRPC service (spec §6 "Session ↔ Exchange Worker").
//! Thin adapter layer: converts between the wire contract (`simproto`) and
//! the multiplexer's own types, plus the unary `StartSimulator`/
//! `StopSimulator`/`Heartbeat` control calls the Lifecycle Controller's
//! health check reads indirectly through `Healthy`.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::Stream;
use simproto::exchange_worker_server::ExchangeWorker;
use simproto::{
    HeartbeatRequest, HeartbeatResponse, MarketDataUpdate, StartSimulatorRequest,
    StartSimulatorResponse, StopSimulatorRequest, StopSimulatorResponse, SubscribeRequest,
    SymbolData,
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::multiplexer::BarMultiplexer;
use crate::types::BarEnvelope;
use common::clock::Clock;

pub struct ExchangeWorkerService {
    exch_id: String,
    multiplexer: Arc<BarMultiplexer>,
    clock: Arc<dyn Clock>,
    /// Flipped by `StartSimulator`/`StopSimulator`; read by the Lifecycle
    /// Controller's health check via `Healthy` (spec §4.1 step 6).
    simulator_running: AtomicBool,
}

impl ExchangeWorkerService {
    pub fn new(exch_id: String, multiplexer: Arc<BarMultiplexer>, clock: Arc<dyn Clock>) -> Self {
        Self {
            exch_id,
            multiplexer,
            clock,
            simulator_running: AtomicBool::new(true),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.simulator_running.load(Ordering::Relaxed)
    }
}

fn to_symbol_data(bar: &store::model::MarketDataBar) -> SymbolData {
    SymbolData {
        symbol: bar.symbol.clone(),
        open: bar.open.to_string(),
        high: bar.high.to_string(),
        low: bar.low.to_string(),
        close: bar.close.to_string(),
        vwap: bar.vwap.to_string(),
        vwas: bar.vwas.to_string(),
        vwav: bar.vwav.to_string(),
        volume: bar.volume,
        trade_count: bar.trade_count,
        currency: bar.currency.clone(),
    }
}

fn to_update(exch_id: &str, envelope: BarEnvelope) -> MarketDataUpdate {
    MarketDataUpdate {
        exch_id: exch_id.to_string(),
        timestamp_unix_ms: envelope.timestamp.timestamp_millis(),
        bars: envelope.data.iter().map(to_symbol_data).collect(),
    }
}

type SubscribeStream = Pin<Box<dyn Stream<Item = Result<MarketDataUpdate, Status>> + Send>>;

#[tonic::async_trait]
impl ExchangeWorker for ExchangeWorkerService {
    type SubscribeMarketDataStream = SubscribeStream;

    async fn subscribe_market_data(
        &self,
        request: Request<SubscribeRequest>,
    ) -> Result<Response<Self::SubscribeMarketDataStream>, Status> {
        let req = request.into_inner();
        let symbols = if req.symbols.is_empty() {
            None
        } else {
            Some(req.symbols.into_iter().collect::<HashSet<String>>())
        };

        let subscriber_id = Uuid::new_v4().to_string();
        let rx = self.multiplexer.subscribe(subscriber_id, symbols).await;
        let exch_id = self.exch_id.clone();

        let stream = ReceiverStream::new(rx).map(move |envelope| Ok(to_update(&exch_id, envelope)));
        Ok(Response::new(Box::pin(stream)))
    }

    async fn start_simulator(
        &self,
        _request: Request<StartSimulatorRequest>,
    ) -> Result<Response<StartSimulatorResponse>, Status> {
        self.simulator_running.store(true, Ordering::Relaxed);
        Ok(Response::new(StartSimulatorResponse {
            simulator_id: self.exch_id.clone(),
            simulator_endpoint: String::new(),
        }))
    }

    async fn stop_simulator(
        &self,
        _request: Request<StopSimulatorRequest>,
    ) -> Result<Response<StopSimulatorResponse>, Status> {
        self.simulator_running.store(false, Ordering::Relaxed);
        Ok(Response::new(StopSimulatorResponse { stopped: true }))
    }

    async fn heartbeat(
        &self,
        _request: Request<HeartbeatRequest>,
    ) -> Result<Response<HeartbeatResponse>, Status> {
        Ok(Response::new(HeartbeatResponse {
            received_at_unix_ms: self.clock.now_ms() as i64,
        }))
    }
}
