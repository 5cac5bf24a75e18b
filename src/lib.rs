//! The geoipfilter library: geolocation enrichment for structured events.
//!
//! A [`GeoIpFilter`] reads an IP address from a configurable field of each
//! event, looks it up in a MaxMind database and writes the result into a
//! target field. City and Enterprise databases give a full geographic record;
//! when that fails the filter falls back to the ISP tier.
//!
//! # Examples
//!
//! Enriching an event from an in-memory lookup:
//!
//! ```rust
//! use geoipfilter::{Event, Filter, GeoIpConfig, GeoIpFilter, GeoRecord, MemoryLookup};
//! use serde_json::json;
//!
//! let lookup = MemoryLookup::new().with_city(
//!     "81.2.69.142".parse().unwrap(),
//!     GeoRecord::default()
//!         .with_city("en", "London")
//!         .with_country("en", "United Kingdom"),
//! );
//! let config = GeoIpConfig::new("client.ip", "unused.mmdb").with_target("geo");
//! let filter = GeoIpFilter::with_lookup(config, lookup).unwrap();
//!
//! let mut event: Event = serde_json::from_value(json!({"client": {"ip": "81.2.69.142"}})).unwrap();
//! assert!(filter.filter(&mut event));
//! assert_eq!(event["geo"]["city_name"], "London");
//! ```

pub mod config;
pub mod error;
pub mod filter;
pub mod input;
pub mod logging;
pub mod lookup;
pub mod pipeline;

pub use crate::config::GeoIpConfig;
pub use crate::error::{Error, Result};
pub use crate::filter::{Event, Filter, GeoIpFilter};
pub use crate::lookup::{
    DatabaseKind, GeoLookup, GeoRecord, IspRecord, LookupError, MemoryLookup, MmdbLookup,
};
pub use crate::pipeline::{Stage, Stats, StatsSnapshot};
pub use field_path::FieldPath;
