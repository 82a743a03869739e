// 8.0 feeds.rs: where quantized price samples come from.
//
// The core never produces prices. It asks a `PriceSource` for the sample of a
// feed at a height and gets back either a sample or nothing. Any oracle
// backend can implement the trait; `PriceHistory` is the in-memory one used
// by tests and the simulator.

use crate::types::{FeedIndex, Height, MAX_FEEDS};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One feed reading at one height, every field scaled by 1e8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSample {
    /// Raw reading for the block.
    pub spot: i64,
    /// Window extremum reading published alongside the sample.
    pub extremum: i64,
    /// Smoothed reading. Feed references evaluate to this by default.
    pub smoothed: i64,
}

impl PriceSample {
    pub fn new(spot: i64, extremum: i64, smoothed: i64) -> Self {
        Self { spot, extremum, smoothed }
    }

    /// Sample whose three readings are identical.
    pub fn flat(price: i64) -> Self {
        Self::new(price, price, price)
    }
}

/// Synchronous, already-resolved price lookup.
pub trait PriceSource {
    fn lookup_price(&self, feed: FeedIndex, height: Height) -> Option<PriceSample>;
}

impl<T: PriceSource + ?Sized> PriceSource for &T {
    fn lookup_price(&self, feed: FeedIndex, height: Height) -> Option<PriceSample> {
        (**self).lookup_price(feed, height)
    }
}

// 8.1: feed name table. names like BTC_USD map to the index the opcodes carry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedCatalog {
    names: Vec<String>,
    #[serde(skip)]
    by_name: HashMap<String, FeedIndex>,
}

impl FeedCatalog {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut catalog = Self::default();
        for name in names {
            catalog.register(name);
        }
        catalog
    }

    /// Feed table used by the simulator and tests.
    pub fn standard() -> Self {
        Self::new([
            "BTC_USD", "KMD_BTC", "ETH_BTC", "LTC_BTC", "EUR_USD", "JPY_USD", "GBP_USD", "XAU_USD", "KMD_USD",
            "ETH_USD",
        ])
    }

    /// Appends a name and returns its index. Re-registering returns the old index.
    pub fn register(&mut self, name: impl Into<String>) -> FeedIndex {
        let name = name.into();
        if let Some(&index) = self.by_name.get(&name) {
            return index;
        }
        debug_assert!(self.names.len() < MAX_FEEDS as usize);
        let index = FeedIndex(self.names.len() as u16);
        self.by_name.insert(name.clone(), index);
        self.names.push(name);
        index
    }

    pub fn index_of(&self, name: &str) -> Option<FeedIndex> {
        if let Some(index) = self.by_name.get(name) {
            return Some(*index);
        }
        // deserialized catalogs skip the map
        self.names.iter().position(|n| n == name).map(|i| FeedIndex(i as u16))
    }

    pub fn name_of(&self, index: FeedIndex) -> Option<&str> {
        self.names.get(index.0 as usize).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// 8.2: in-memory sample store keyed by (feed, height).
#[derive(Debug, Clone, Default)]
pub struct PriceHistory {
    samples: BTreeMap<(FeedIndex, Height), PriceSample>,
}

impl PriceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, feed: FeedIndex, height: Height, sample: PriceSample) {
        self.samples.insert((feed, height), sample);
    }

    pub fn set_flat(&mut self, feed: FeedIndex, height: Height, price: i64) {
        self.insert(feed, height, PriceSample::flat(price));
    }

    /// Writes the same flat price over `from..=to`.
    pub fn fill(&mut self, feed: FeedIndex, from: Height, to: Height, price: i64) {
        for h in from.0..=to.0 {
            self.set_flat(feed, Height(h), price);
        }
    }

    /// Writes `price_at(height)` over `from..=to`.
    pub fn fill_with(&mut self, feed: FeedIndex, from: Height, to: Height, mut price_at: impl FnMut(Height) -> i64) {
        for h in from.0..=to.0 {
            let height = Height(h);
            self.set_flat(feed, height, price_at(height));
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl PriceSource for PriceHistory {
    fn lookup_price(&self, feed: FeedIndex, height: Height) -> Option<PriceSample> {
        self.samples.get(&(feed, height)).copied()
    }
}
