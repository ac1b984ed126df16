use serde::Deserialize;

use crate::entity::label_store::{Category, LabelStore};

#[derive(Debug, Deserialize)]
struct ExchangeProvider {
    provider: String,
    #[serde(default)]
    chain: Option<String>,
    #[serde(default)]
    category: Option<Category>,
    wallets: Vec<ExchangeWallet>,
}

#[derive(Debug, Deserialize)]
struct ExchangeWallet {
    address: String,
    label: String,
}

/// Load exchange wallet addresses from a JSON file into the label store.
/// Providers default to the exchange category unless the file says otherwise.
pub fn load_exchange_wallets(store: &mut LabelStore, path: &str) -> eyre::Result<u64> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("Failed to read exchange wallets file '{}': {}", path, e))?;

    let providers: Vec<ExchangeProvider> = serde_json::from_str(&content)
        .map_err(|e| eyre::eyre!("Failed to parse exchange wallets JSON: {}", e))?;

    let mut count = 0u64;

    for provider in &providers {
        let category = provider.category.unwrap_or(Category::Exchange);
        for wallet in &provider.wallets {
            let name = format!("{} ({})", provider.provider, wallet.label);
            if store.insert(&wallet.address, &name, category, "exchange_wallets") {
                count += 1;
            }
        }

        tracing::debug!(
            provider = %provider.provider,
            chain = provider.chain.as_deref().unwrap_or("-"),
            wallets = provider.wallets.len(),
            "Loaded exchange wallets"
        );
    }

    Ok(count)
}
