//! Prometheus metrics for bets, matches and sessions

use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub bets_placed: IntCounter,
    pub matches: IntCounter,
    pub sessions_completed: IntCounter,
    pub sessions_abandoned: IntCounter,
    pub bets_expired: IntCounter,
    pub payments_confirmed: IntCounter,
    pub ws_connections: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let counter = IntCounter::with_opts(Opts::new(name, help))?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        let bets_placed = counter("betgammon_bets_placed_total", "Stakes escrowed and queued")?;
        let matches = counter("betgammon_matches_total", "Pairs formed by the match queue")?;
        let sessions_completed = counter(
            "betgammon_sessions_completed_total",
            "Sessions settled to a winner",
        )?;
        let sessions_abandoned = counter(
            "betgammon_sessions_abandoned_total",
            "Sessions closed with both stakes refunded",
        )?;
        let bets_expired = counter(
            "betgammon_bets_expired_total",
            "Queued bets refunded after waiting too long",
        )?;
        let payments_confirmed = counter(
            "betgammon_payments_confirmed_total",
            "Payment confirmations credited",
        )?;

        let ws_connections = IntGauge::with_opts(Opts::new(
            "betgammon_ws_connections",
            "Open notification channels",
        ))?;
        registry.register(Box::new(ws_connections.clone()))?;

        Ok(Self {
            registry,
            bets_placed,
            matches,
            sessions_completed,
            sessions_abandoned,
            bets_expired,
            payments_confirmed,
            ws_connections,
        })
    }

    /// Prometheus text exposition of every registered metric
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
