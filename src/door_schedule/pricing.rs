// Material price lookup for door cost estimates

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::debug;

use crate::config::{DoorScheduleConfig, MaterialPrice};

/// Price of one material in the configured region
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceQuote {
    pub price_per_sqm: f64,
    pub installation: f64,
}

impl From<MaterialPrice> for PriceQuote {
    #[inline]
    fn from(price: MaterialPrice) -> Self {
        Self {
            price_per_sqm: price.price_per_sqm,
            installation: price.installation,
        }
    }
}

pub trait PriceSource: Send + Sync {
    fn quote(&self, material: &str) -> PriceQuote;
}

/// Prices from the `[door_schedule]` config, memoized per material and region.
///
/// A material matches a configured entry when either name contains the other,
/// so `"solid wood"` picks up a `"wood"` price. Unknown materials get the
/// default price.
#[derive(Debug)]
pub struct PriceTable {
    region: String,
    materials: BTreeMap<String, MaterialPrice>,
    default: PriceQuote,
    cache: Mutex<HashMap<String, PriceQuote>>,
}

impl PriceTable {
    #[inline]
    pub fn new(
        region: impl Into<String>,
        materials: BTreeMap<String, MaterialPrice>,
        default: PriceQuote,
    ) -> Self {
        Self {
            region: region.into(),
            materials: materials
                .into_iter()
                .map(|(name, price)| (name.trim().to_lowercase(), price))
                .collect(),
            default,
            cache: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn from_config(config: &DoorScheduleConfig) -> Self {
        Self::new(
            config.region.clone(),
            config.materials.clone(),
            PriceQuote {
                price_per_sqm: config.default_price_per_sqm,
                installation: config.default_installation_cost,
            },
        )
    }

    #[inline]
    pub fn cached_len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn lookup(&self, material: &str) -> PriceQuote {
        if material.is_empty() {
            return self.default;
        }
        if let Some(price) = self.materials.get(material) {
            return (*price).into();
        }
        self.materials
            .iter()
            .find(|(name, _)| material.contains(name.as_str()) || name.contains(material))
            .map_or(self.default, |(_, price)| (*price).into())
    }
}

impl PriceSource for PriceTable {
    #[inline]
    fn quote(&self, material: &str) -> PriceQuote {
        let material = material.trim().to_lowercase();
        let key = format!("{}_{}", material, self.region.to_lowercase());

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(quote) = cache.get(&key) {
            return *quote;
        }

        let quote = self.lookup(&material);
        debug!(
            "Price for {:?} in {}: {}/sqm + {} installation",
            material, self.region, quote.price_per_sqm, quote.installation
        );
        cache.insert(key, quote);
        quote
    }
}
