use std::collections::HashMap;

use crate::error::TradeError;
use crate::traits::Broker;

/// Canonical display symbols probed against the broker at connect time.
pub const BASE_SYMBOLS: [&str; 26] = [
    "EURUSD", "GBPUSD", "USDJPY", "AUDUSD", "USDCAD", "USDCHF", "NZDUSD", "EURJPY", "GBPJPY",
    "AUDJPY", "CADJPY", "CHFJPY", "EURGBP", "EURAUD", "EURCAD", "EURCHF", "GBPAUD", "GBPCAD",
    "GBPCHF", "AUDCAD", "AUDCHF", "CADCHF", "XAUUSD", "XAGUSD", "BTCUSD", "ETHUSD",
];

/// Known broker suffix variants, in probe order. The empty suffix comes
/// first so an unsuffixed listing wins.
pub const BROKER_SUFFIXES: [&str; 8] = ["", "+", ".", "m", "_raw", "pro", "#", ".a"];

/// Longest patterns first, so `.a` wins over a bare `.`.
const STRIP_SUFFIXES: [&str; 7] = ["_raw", "pro", ".a", "+", ".", "m", "#"];

/// Canonical-to-broker symbol table, built once per broker connection by
/// probing each base instrument against each known suffix (base-major,
/// suffix-minor, first recognized wins).
#[derive(Debug, Clone, Default)]
pub struct SymbolMap {
    forward: HashMap<String, String>,
}

impl SymbolMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Probes the broker for each base symbol. Tolerates broker-specific
    /// naming without any configuration.
    ///
    /// # Errors
    /// Returns an error if an instrument probe fails at the transport level.
    pub async fn discover(broker: &dyn Broker) -> Result<Self, TradeError> {
        let mut forward = HashMap::new();
        for base in BASE_SYMBOLS {
            for suffix in BROKER_SUFFIXES {
                let candidate = format!("{base}{suffix}");
                if broker.instrument_info(&candidate).await?.is_some() {
                    if !suffix.is_empty() {
                        tracing::info!("symbol {base} found as {candidate}");
                    }
                    forward.insert(base.to_string(), candidate);
                    break;
                }
            }
        }
        tracing::info!("symbol discovery mapped {} instruments", forward.len());
        Ok(Self { forward })
    }

    pub fn insert(&mut self, canonical: &str, broker_symbol: &str) {
        self.forward
            .insert(canonical.to_string(), broker_symbol.to_string());
    }

    /// Broker-native name for a canonical symbol; falls back to the
    /// canonical name when no mapping was discovered.
    #[must_use]
    pub fn resolve(&self, canonical: &str) -> String {
        self.forward
            .get(canonical)
            .cloned()
            .unwrap_or_else(|| canonical.to_string())
    }

    /// Strips known suffix patterns off the end of a broker name, repeating
    /// until none remain so stacked suffixes are fully reduced.
    #[must_use]
    pub fn to_canonical(broker_symbol: &str) -> String {
        let mut name = broker_symbol;
        let mut stripped = true;
        while stripped {
            stripped = false;
            for suffix in STRIP_SUFFIXES {
                if let Some(rest) = name.strip_suffix(suffix) {
                    name = rest;
                    stripped = true;
                }
            }
        }
        name.to_string()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}
