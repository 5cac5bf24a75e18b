//! The geoip enrichment filter.

use std::net::IpAddr;

use field_path::FieldPath;
use serde_json::{json, Map, Value};
use tracing::trace;

use crate::config::GeoIpConfig;
use crate::error::{Error, Result};
use crate::lookup::{GeoLookup, GeoRecord, IspRecord, MmdbLookup, Names};

/// One event flowing through a pipeline: a JSON object.
pub type Event = Map<String, Value>;

// Keys of the enrichment result
pub const FIELD_TIMEZONE: &str = "timezone";
pub const FIELD_CITY_NAME: &str = "city_name";
pub const FIELD_REGION_NAME: &str = "region_name";
pub const FIELD_COUNTRY_NAME: &str = "country_name";
pub const FIELD_LOCATION: &str = "location";
pub const FIELD_ISP: &str = "isp";

/// A pipeline stage that inspects and may mutate events.
pub trait Filter: Send + Sync {
    /// Process one event in place, returning whether the filter succeeded.
    fn filter(&self, event: &mut Event) -> bool;
}

/// Enriches events with geographic or ISP data for an IP address field.
///
/// The address found at the configured `src` path is first resolved to a full
/// geographic record, which replaces whatever was stored at `target`. When the
/// database has no geographic record for the address, its ISP record is used
/// instead and merged with an existing object at `target`, whose entries win
/// on collision. When neither tier knows the address, or the source field is
/// not an IP address, the event is left untouched and `false` is returned.
#[derive(Debug)]
pub struct GeoIpFilter<L = MmdbLookup> {
    config: GeoIpConfig,
    src: FieldPath,
    lookup: L,
}

impl GeoIpFilter<MmdbLookup> {
    /// Validate `config` and open the database it names.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid or the database cannot be
    /// opened. These are the only hard failures of the filter.
    pub fn from_config(config: GeoIpConfig) -> Result<Self> {
        config.validate()?;
        let src = parse_src(&config)?;
        let lookup = MmdbLookup::open(config.db_path())?;
        Ok(Self {
            config,
            src,
            lookup,
        })
    }
}

impl<L: GeoLookup> GeoIpFilter<L> {
    /// Build a filter around an already opened lookup service.
    ///
    /// The `dbPath` option is validated but not opened.
    pub fn with_lookup(config: GeoIpConfig, lookup: L) -> Result<Self> {
        config.validate()?;
        let src = parse_src(&config)?;
        Ok(Self {
            config,
            src,
            lookup,
        })
    }

    #[inline]
    pub fn config(&self) -> &GeoIpConfig {
        &self.config
    }

    #[inline]
    pub fn lookup(&self) -> &L {
        &self.lookup
    }

    /// Resolve the source field to an address, if it holds one.
    fn source_ip(&self, event: &Event) -> Option<IpAddr> {
        let value = match self.src.get_in(event) {
            Some(value) => value,
            None => {
                trace!(src = %self.src, "source field not present");
                return None;
            }
        };

        let Some(text) = value.as_str() else {
            trace!(src = %self.src, %value, "invalid IP address");
            return None;
        };

        match text.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                trace!(src = %self.src, value = text, "invalid IP address");
                None
            }
        }
    }

    fn geo_data(&self, record: &GeoRecord) -> Map<String, Value> {
        let language = self.config.language();
        let mut geo = Map::new();

        geo.insert(
            FIELD_TIMEZONE.to_string(),
            record.time_zone.clone().map_or(Value::Null, Value::String),
        );
        geo.insert(
            FIELD_CITY_NAME.to_string(),
            localized(&record.city_names, language),
        );
        if let Some(region) = record.subdivisions.first() {
            geo.insert(FIELD_REGION_NAME.to_string(), localized(region, language));
        }
        geo.insert(
            FIELD_COUNTRY_NAME.to_string(),
            localized(&record.country_names, language),
        );
        geo.insert(
            FIELD_LOCATION.to_string(),
            json!({
                "lon": record.longitude.unwrap_or(0.0),
                "lat": record.latitude.unwrap_or(0.0),
            }),
        );

        geo
    }

    fn merge_isp(&self, event: &mut Event, record: IspRecord) {
        let target = self.config.target();
        let mut geo = Map::new();
        geo.insert(FIELD_ISP.to_string(), Value::String(record.isp));

        // a non-object value at target is replaced, not merged
        if let Some(Value::Object(existing)) = event.remove(target) {
            geo.extend(existing);
        }

        event.insert(target.to_string(), Value::Object(geo));
    }
}

impl<L: GeoLookup> Filter for GeoIpFilter<L> {
    fn filter(&self, event: &mut Event) -> bool {
        let Some(ip) = self.source_ip(event) else {
            return false;
        };

        let city_err = match self.lookup.lookup_city(ip) {
            Ok(record) => {
                let geo = self.geo_data(&record);
                event.insert(self.config.target().to_string(), Value::Object(geo));
                return true;
            }
            Err(err) => err,
        };
        trace!(%ip, error = %city_err, "city lookup failed, trying isp");

        match self.lookup.lookup_isp(ip) {
            Ok(record) => {
                self.merge_isp(event, record);
                true
            }
            Err(err) => {
                trace!(%ip, error = %err, "isp lookup failed");
                false
            }
        }
    }
}

impl<F: Filter + ?Sized> Filter for Box<F> {
    #[inline]
    fn filter(&self, event: &mut Event) -> bool {
        (**self).filter(event)
    }
}

fn parse_src(config: &GeoIpConfig) -> Result<FieldPath> {
    FieldPath::parse(config.src()).map_err(|source| Error::InvalidFieldPath {
        path: config.src().to_string(),
        source,
    })
}

/// The name in `language`, or null when the record has no such translation.
fn localized(names: &Names, language: &str) -> Value {
    names
        .get(language)
        .map_or(Value::Null, |name| Value::String(name.clone()))
}
