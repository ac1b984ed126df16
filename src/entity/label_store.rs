use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::config::{ClassificationConfig, ManualLabelConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Exchange,
    #[serde(rename = "defi")]
    DeFi,
    Institutional,
    Individual,
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exchange => "exchange",
            Self::DeFi => "defi",
            Self::Institutional => "institutional",
            Self::Individual => "individual",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exchange" | "cex" => Ok(Self::Exchange),
            "defi" | "protocol" => Ok(Self::DeFi),
            "institutional" | "institution" | "custodian" => Ok(Self::Institutional),
            "individual" => Ok(Self::Individual),
            "unknown" => Ok(Self::Unknown),
            other => Err(eyre::eyre!("Unknown address category '{}'", other)),
        }
    }
}

/// A known address and what it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub address: String,
    pub name: String,
    pub category: Category,
    pub source: String,
}

/// Well-known hot wallets and routers that show up as delegators or recipients.
const BUILTIN_LABELS: &[(&str, &str, Category)] = &[
    ("0x28c6c06298d514db089934071355e5743bf21d60", "Binance 14", Category::Exchange),
    ("0x21a31ee1afc51d94c2efccaa2092ad1028285549", "Binance 15", Category::Exchange),
    ("0xa9d1e08c7793af67e9d92fe308d5697fb81d3e43", "Coinbase 10", Category::Exchange),
    ("0x2910543af39aba0cd09dbb2d50200b3e800a63d2", "Kraken", Category::Exchange),
    ("0x6cc5f688a315f3dc28a7781717a9a798a59fda7b", "OKX", Category::Exchange),
    ("0xe592427a0aece92de3edee1f18e0157c05861564", "Uniswap V3 Router", Category::DeFi),
    ("0x1111111254eeb25477b68fb85ed929f73a960582", "1inch V5 Router", Category::DeFi),
];

/// Normalise to lower-case `0x` + 40 hex chars, or `None` if it is not an address.
pub fn normalize_address(address: &str) -> Option<String> {
    let address = address.trim().to_lowercase();
    let hex_part = address.strip_prefix("0x")?;
    if hex_part.len() != 40 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(address)
}

/// In-memory index of known addresses keyed by lower-case hex.
/// Later inserts for the same address replace earlier ones.
#[derive(Debug, Clone, Default)]
pub struct LabelStore {
    by_address: HashMap<String, Label>,
}

impl LabelStore {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut store = Self::empty();
        for (address, name, category) in BUILTIN_LABELS {
            store.insert(address, name, *category, "builtin");
        }
        store
    }

    /// Built-ins, then the wallet JSON file, then the CSV, then config labels.
    pub fn from_config(config: &ClassificationConfig) -> eyre::Result<Self> {
        let mut store = Self::builtin();

        if let Some(path) = &config.exchange_wallets_path {
            let count = crate::seed::exchange_wallets::load_exchange_wallets(&mut store, path)?;
            tracing::info!(count, path = %path, "Exchange wallets loaded");
        }
        if let Some(path) = &config.labels_csv_path {
            let count = store.load_csv(path)?;
            tracing::info!(count, path = %path, "CSV labels loaded");
        }
        if !config.manual_labels.is_empty() {
            store.apply_manual_labels(&config.manual_labels);
        }

        tracing::info!(labels = store.len(), "Label store ready");
        Ok(store)
    }

    /// Insert a label. Returns false (and stores nothing) for a malformed address.
    pub fn insert(&mut self, address: &str, name: &str, category: Category, source: &str) -> bool {
        let Some(address) = normalize_address(address) else {
            tracing::warn!(address, source, "Ignoring label with invalid address");
            return false;
        };
        self.by_address.insert(
            address.clone(),
            Label {
                address,
                name: name.to_string(),
                category,
                source: source.to_string(),
            },
        );
        true
    }

    pub fn lookup(&self, address: &str) -> Option<&Label> {
        self.by_address.get(&address.trim().to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    /// Load `address,name,category` rows. Rows with a bad address or category are skipped.
    pub fn load_csv(&mut self, path: &str) -> eyre::Result<usize> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(|e| eyre::eyre!("Failed to open labels CSV '{}': {}", path, e))?;

        let mut count = 0;
        for result in reader.records() {
            let record = result?;
            let address = record.get(0).unwrap_or("").trim();
            let name = record.get(1).unwrap_or("").trim();
            let category = match record.get(2).unwrap_or("").parse::<Category>() {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(address, error = %e, "Skipping CSV label");
                    continue;
                }
            };
            if self.insert(address, name, category, "csv") {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn apply_manual_labels(&mut self, labels: &[ManualLabelConfig]) -> usize {
        let mut count = 0;
        for label in labels {
            if self.insert(&label.address, &label.name, label.category, "config") {
                count += 1;
            }
        }
        tracing::info!(labels = count, "Applied manual labels");
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_lookup_ignores_case() {
        let store = LabelStore::builtin();
        let lower = store.lookup("0x28c6c06298d514db089934071355e5743bf21d60").unwrap();
        let upper = store.lookup("0x28C6C06298D514DB089934071355E5743BF21D60").unwrap();
        assert_eq!(lower, upper);
        assert_eq!(lower.category, Category::Exchange);
        assert!(store.lookup("0x0000000000000000000000000000000000000001").is_none());
    }

    #[test]
    fn test_insert_rejects_malformed() {
        let mut store = LabelStore::empty();
        assert!(!store.insert("0x1234", "short", Category::DeFi, "test"));
        assert!(!store.insert("28c6c06298d514db089934071355e5743bf21d60", "no prefix", Category::DeFi, "test"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("DeFi".parse::<Category>().unwrap(), Category::DeFi);
        assert_eq!(" exchange ".parse::<Category>().unwrap(), Category::Exchange);
        assert!("whale".parse::<Category>().is_err());
    }

    #[test]
    fn test_csv_rows_override_builtins() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "address,name,category").unwrap();
        writeln!(file, "0x28C6C06298D514DB089934071355E5743BF21D60,Treasury,institutional").unwrap();
        writeln!(file, "0x00000000000000000000000000000000000000aa,Vault,defi").unwrap();
        writeln!(file, "0x00000000000000000000000000000000000000bb,Odd,whale").unwrap();
        writeln!(file, "bogus,Broken,exchange").unwrap();

        let mut store = LabelStore::builtin();
        let count = store.load_csv(file.path().to_str().unwrap()).unwrap();

        assert_eq!(count, 2);
        let overridden = store.lookup("0x28c6c06298d514db089934071355e5743bf21d60").unwrap();
        assert_eq!(overridden.category, Category::Institutional);
        assert_eq!(overridden.source, "csv");
    }
}
