use serde::Serialize;
use std::collections::HashMap;

use super::label_store::{Category, LabelStore};
use super::service::LabelServiceClient;

/// Category used when nothing is known about an address. Treating the unknown as an
/// individual delegator is a reporting policy and will misfile unlabelled custodians.
pub const DEFAULT_CATEGORY: Category = Category::Individual;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    StaticList,
    Service,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressClassification {
    pub address: String,
    pub category: Category,
    pub source: ClassificationSource,
    pub label: Option<String>,
}

/// Classifies addresses for one run. Results are memoized per lower-cased address.
pub struct Classifier {
    store: LabelStore,
    service: Option<LabelServiceClient>,
    default_category: Category,
    memo: HashMap<String, AddressClassification>,
}

impl Classifier {
    pub fn new(store: LabelStore, default_category: Category) -> Self {
        Self {
            store,
            service: None,
            default_category,
            memo: HashMap::new(),
        }
    }

    pub fn with_service(mut self, service: Option<LabelServiceClient>) -> Self {
        self.service = service;
        self
    }

    pub fn default_category(&self) -> Category {
        self.default_category
    }

    /// Static-table classification only. Pure: same input, same answer, any letter case.
    pub fn classify_static(&self, address: &str) -> AddressClassification {
        let address = address.trim().to_lowercase();
        match self.store.lookup(&address) {
            Some(label) => AddressClassification {
                address,
                category: label.category,
                source: ClassificationSource::StaticList,
                label: Some(label.name.clone()),
            },
            None => AddressClassification {
                address,
                category: self.default_category,
                source: ClassificationSource::Default,
                label: None,
            },
        }
    }

    /// Static table first, then the label service if configured, then the default.
    /// Never fails: a service error falls through to the default.
    pub async fn classify(&mut self, address: &str) -> AddressClassification {
        let key = address.trim().to_lowercase();
        if let Some(hit) = self.memo.get(&key) {
            return hit.clone();
        }

        let mut result = self.classify_static(&key);
        if result.source == ClassificationSource::Default {
            if let Some(service) = &self.service {
                match service.lookup(&key).await {
                    Ok(Some((category, label))) => {
                        result = AddressClassification {
                            address: key.clone(),
                            category,
                            source: ClassificationSource::Service,
                            label,
                        };
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(address = %key, error = %e, "Label service lookup failed");
                    }
                }
            }
        }

        self.memo.insert(key, result.clone());
        result
    }

    pub async fn classify_all<'a, I>(&mut self, addresses: I) -> HashMap<String, AddressClassification>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out = HashMap::new();
        for address in addresses {
            let classification = self.classify(address).await;
            out.insert(classification.address.clone(), classification);
        }
        out
    }

    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }
}
