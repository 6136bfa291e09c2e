// [libs/domain/billing-sync/src/mapping.rs]
//! Caller-supplied translation from provider product identifiers to the
//! manager's tier names, with a reserved wildcard fallback.

use std::collections::HashMap;

const WILDCARD_KEYS: [&str; 2] = ["*", "default"];

#[derive(Debug, Clone, Default)]
pub struct TierMapping {
    by_product: HashMap<String, String>,
    fallback: Option<String>,
}

impl TierMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `product_id → tier_name`. Passing `"*"` or `"default"`
    /// as `product_id` sets the fallback used for any product with no
    /// direct mapping, rather than a literal product entry.
    pub fn with_mapping(mut self, product_id: impl Into<String>, tier_name: impl Into<String>) -> Self {
        let product_id = product_id.into();
        let tier_name = tier_name.into();
        if WILDCARD_KEYS.contains(&product_id.as_str()) {
            self.fallback = Some(tier_name);
        } else {
            self.by_product.insert(product_id, tier_name);
        }
        self
    }

    /// Resolves a provider product id to a local tier name. Falls back
    /// to the wildcard mapping when no exact entry exists, and to `None`
    /// when neither is present — the caller decides what that means
    /// (reject the event, or fall through to the manager's own default
    /// tier by simply not writing an entitlement).
    pub fn resolve(&self, product_id: &str) -> Option<&str> {
        self.by_product
            .get(product_id)
            .or(self.fallback.as_ref())
            .map(String::as_str)
    }
}
