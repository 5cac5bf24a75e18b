//! Geolocation lookup services.
//!
//! The filter queries a [`GeoLookup`] in two tiers: the full geographic
//! record first, the network (ISP) record as a fallback. [`MmdbLookup`] answers
//! from a MaxMind DB file, refusing the tier its database type does not hold;
//! [`MemoryLookup`] answers from an in-memory table.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use maxminddb::{MaxMindDbError, Reader};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Per-language names of a place, keyed by language code (`en`, `de`, `pt-BR`, ...).
pub type Names = BTreeMap<String, String>;

/// A full geographic record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoRecord {
    pub time_zone: Option<String>,
    pub city_names: Names,
    /// Subdivisions from largest to smallest (state, then county, ...).
    pub subdivisions: Vec<Names>,
    pub country_names: Names,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl GeoRecord {
    #[must_use]
    pub fn with_time_zone(mut self, time_zone: impl Into<String>) -> Self {
        self.time_zone = Some(time_zone.into());
        self
    }

    #[must_use]
    pub fn with_city(mut self, language: impl Into<String>, name: impl Into<String>) -> Self {
        self.city_names.insert(language.into(), name.into());
        self
    }

    /// Append a subdivision with a single name.
    #[must_use]
    pub fn with_subdivision(mut self, language: impl Into<String>, name: impl Into<String>) -> Self {
        let mut names = Names::new();
        names.insert(language.into(), name.into());
        self.subdivisions.push(names);
        self
    }

    #[must_use]
    pub fn with_country(mut self, language: impl Into<String>, name: impl Into<String>) -> Self {
        self.country_names.insert(language.into(), name.into());
        self
    }

    #[must_use]
    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    /// True when the record carries any geographic information at all.
    pub fn has_geo_data(&self) -> bool {
        !self.city_names.is_empty()
            || !self.country_names.is_empty()
            || !self.subdivisions.is_empty()
            || self.time_zone.is_some()
            || self.latitude.is_some()
            || self.longitude.is_some()
    }
}

/// A network record: the ISP or organization owning the address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IspRecord {
    pub isp: String,
}

/// Why a lookup produced no record.
///
/// These are expected outcomes for individual addresses, not failures of
/// the service.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// The address is not covered by the database.
    #[error("address not found: {0}")]
    AddressNotFound(IpAddr),

    /// The address is covered but the record has no geographic fields.
    #[error("no geographic data for {0}")]
    NoCityData(IpAddr),

    /// The address is covered but the record has no ISP name.
    #[error("no isp data for {0}")]
    NoIspData(IpAddr),

    /// The database does not hold this kind of record.
    #[error("{query} lookups are not supported by {database_type} databases")]
    Unsupported {
        query: &'static str,
        database_type: String,
    },

    /// The reader rejected the lookup or could not decode the record.
    #[error("lookup failed for {ip}")]
    Database {
        ip: IpAddr,
        #[source]
        source: MaxMindDbError,
    },
}

/// Read-only geolocation queries keyed by IP address.
///
/// Implementations are shared across worker threads and queried
/// concurrently through `&self`.
pub trait GeoLookup: Send + Sync {
    /// Look up the full geographic record of an address.
    fn lookup_city(&self, ip: IpAddr) -> std::result::Result<GeoRecord, LookupError>;

    /// Look up the network record of an address.
    fn lookup_isp(&self, ip: IpAddr) -> std::result::Result<IspRecord, LookupError>;
}

impl<L: GeoLookup + ?Sized> GeoLookup for Arc<L> {
    #[inline]
    fn lookup_city(&self, ip: IpAddr) -> std::result::Result<GeoRecord, LookupError> {
        (**self).lookup_city(ip)
    }

    #[inline]
    fn lookup_isp(&self, ip: IpAddr) -> std::result::Result<IspRecord, LookupError> {
        (**self).lookup_isp(ip)
    }
}

impl<L: GeoLookup + ?Sized> GeoLookup for &L {
    #[inline]
    fn lookup_city(&self, ip: IpAddr) -> std::result::Result<GeoRecord, LookupError> {
        (**self).lookup_city(ip)
    }

    #[inline]
    fn lookup_isp(&self, ip: IpAddr) -> std::result::Result<IspRecord, LookupError> {
        (**self).lookup_isp(ip)
    }
}

/// Which record layouts a MaxMind database holds, from its `database_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    /// City and Enterprise databases: geographic records only.
    City,
    /// ISP databases: network records only.
    Isp,
    /// Country, ASN, anonymous IP and anything else. Neither query is answered.
    Other,
}

impl DatabaseKind {
    pub fn from_database_type(database_type: &str) -> DatabaseKind {
        match database_type {
            "GeoIP2-ISP" | "GeoIP2-Precision-ISP" => DatabaseKind::Isp,
            t if t.contains("City") || t.contains("Enterprise") => DatabaseKind::City,
            _ => DatabaseKind::Other,
        }
    }

    #[inline]
    pub fn supports_city(self) -> bool {
        self == DatabaseKind::City
    }

    #[inline]
    pub fn supports_isp(self) -> bool {
        self == DatabaseKind::Isp
    }
}

// Record layouts as stored in the database. Strings borrow from the reader.

#[derive(Deserialize)]
struct MmdbCity<'a> {
    #[serde(borrow, default)]
    city: Option<MmdbNamed<'a>>,
    #[serde(borrow, default)]
    country: Option<MmdbNamed<'a>>,
    #[serde(borrow, default)]
    subdivisions: Option<Vec<MmdbNamed<'a>>>,
    #[serde(borrow, default)]
    location: Option<MmdbLocation<'a>>,
}

#[derive(Deserialize)]
struct MmdbNamed<'a> {
    #[serde(borrow, default)]
    names: Option<BTreeMap<&'a str, &'a str>>,
}

#[derive(Deserialize)]
struct MmdbLocation<'a> {
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(borrow, default)]
    time_zone: Option<&'a str>,
}

#[derive(Deserialize)]
struct MmdbIsp<'a> {
    #[serde(borrow, default)]
    isp: Option<&'a str>,
}

fn owned_names(named: Option<MmdbNamed<'_>>) -> Names {
    named
        .and_then(|n| n.names)
        .map(|names| {
            names
                .into_iter()
                .map(|(lang, name)| (lang.to_string(), name.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

impl From<MmdbCity<'_>> for GeoRecord {
    fn from(record: MmdbCity<'_>) -> Self {
        let (latitude, longitude, time_zone) = match record.location {
            Some(loc) => (loc.latitude, loc.longitude, loc.time_zone.map(str::to_string)),
            None => (None, None, None),
        };

        GeoRecord {
            time_zone,
            city_names: owned_names(record.city),
            subdivisions: record
                .subdivisions
                .unwrap_or_default()
                .into_iter()
                .map(|s| owned_names(Some(s)))
                .collect(),
            country_names: owned_names(record.country),
            latitude,
            longitude,
        }
    }
}

/// Lookup service backed by a MaxMind DB file held in memory.
pub struct MmdbLookup {
    reader: Reader<Vec<u8>>,
    kind: DatabaseKind,
    path: Utf8PathBuf,
}

impl fmt::Debug for MmdbLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmdbLookup")
            .field("path", &self.path)
            .field("database_type", &self.database_type())
            .field("kind", &self.kind)
            .finish()
    }
}

impl MmdbLookup {
    /// Open the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DatabaseNotFound`] if the file does not exist and
    /// [`Error::DatabaseOpen`] if it is not a readable MaxMind database.
    pub fn open(path: &Utf8Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::DatabaseNotFound {
                path: path.to_owned(),
            });
        }

        let reader = Reader::open_readfile(path).map_err(|source| Error::DatabaseOpen {
            path: path.to_owned(),
            source,
        })?;
        let kind = DatabaseKind::from_database_type(&reader.metadata.database_type);

        debug!(
            path = %path,
            database_type = %reader.metadata.database_type,
            build_epoch = reader.metadata.build_epoch,
            ?kind,
            "opened geoip database"
        );

        Ok(Self {
            reader,
            kind,
            path: path.to_owned(),
        })
    }

    #[inline]
    pub fn kind(&self) -> DatabaseKind {
        self.kind
    }

    #[inline]
    pub fn database_type(&self) -> &str {
        &self.reader.metadata.database_type
    }

    /// Seconds since the Unix epoch at which the database was built.
    #[inline]
    pub fn build_epoch(&self) -> u64 {
        self.reader.metadata.build_epoch
    }

    #[inline]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn unsupported(&self, query: &'static str) -> LookupError {
        LookupError::Unsupported {
            query,
            database_type: self.database_type().to_string(),
        }
    }

    fn decode<'de, T>(&'de self, ip: IpAddr) -> std::result::Result<T, LookupError>
    where
        T: Deserialize<'de>,
    {
        let result = self
            .reader
            .lookup(ip)
            .map_err(|source| LookupError::Database { ip, source })?;

        if !result.has_data() {
            return Err(LookupError::AddressNotFound(ip));
        }

        result
            .decode::<T>()
            .map_err(|source| LookupError::Database { ip, source })?
            .ok_or(LookupError::AddressNotFound(ip))
    }
}

impl GeoLookup for MmdbLookup {
    fn lookup_city(&self, ip: IpAddr) -> std::result::Result<GeoRecord, LookupError> {
        if !self.kind.supports_city() {
            return Err(self.unsupported("city"));
        }

        let record = GeoRecord::from(self.decode::<MmdbCity<'_>>(ip)?);
        if record.has_geo_data() {
            Ok(record)
        } else {
            Err(LookupError::NoCityData(ip))
        }
    }

    fn lookup_isp(&self, ip: IpAddr) -> std::result::Result<IspRecord, LookupError> {
        if !self.kind.supports_isp() {
            return Err(self.unsupported("isp"));
        }

        match self.decode::<MmdbIsp<'_>>(ip)?.isp {
            Some(isp) => Ok(IspRecord {
                isp: isp.to_string(),
            }),
            None => Err(LookupError::NoIspData(ip)),
        }
    }
}

/// Lookup service answering from in-memory tables keyed by exact address.
#[derive(Debug, Clone, Default)]
pub struct MemoryLookup {
    cities: HashMap<IpAddr, GeoRecord>,
    isps: HashMap<IpAddr, String>,
}

impl MemoryLookup {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_city(mut self, ip: IpAddr, record: GeoRecord) -> Self {
        self.cities.insert(ip, record);
        self
    }

    #[must_use]
    pub fn with_isp(mut self, ip: IpAddr, isp: impl Into<String>) -> Self {
        self.isps.insert(ip, isp.into());
        self
    }
}

impl GeoLookup for MemoryLookup {
    fn lookup_city(&self, ip: IpAddr) -> std::result::Result<GeoRecord, LookupError> {
        self.cities
            .get(&ip)
            .cloned()
            .ok_or(LookupError::AddressNotFound(ip))
    }

    fn lookup_isp(&self, ip: IpAddr) -> std::result::Result<IspRecord, LookupError> {
        self.isps
            .get(&ip)
            .map(|isp| IspRecord { isp: isp.clone() })
            .ok_or(LookupError::AddressNotFound(ip))
    }
}
