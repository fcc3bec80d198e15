//! Geospatial commands
//!
//! `GEOSEARCH` replies are positional: each match is either a bare member
//! name or an array whose trailing elements depend on which `WITH*` flags
//! were sent, always in the order distance, hash, coordinates.

use super::{Command, ToArg};
use bytes::Bytes;
use kvwire_core::{
    decode::{FromWire, WireCursor},
    error::{KvError, KvResult},
    types::Key,
    value::WireValue,
};

/// Distance unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeoUnit {
    /// Meters
    #[default]
    Meters,
    /// Kilometers
    Kilometers,
    /// Miles
    Miles,
    /// Feet
    Feet,
}

impl GeoUnit {
    /// Wire keyword
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Meters => "m",
            Self::Kilometers => "km",
            Self::Miles => "mi",
            Self::Feet => "ft",
        }
    }
}

/// GEOADD command - Add members with their coordinates
#[derive(Debug, Clone)]
pub struct GeoAddCommand {
    key: Key,
    members: Vec<(f64, f64, Bytes)>,
}

impl GeoAddCommand {
    /// Create a new GEOADD command from `(longitude, latitude, member)` triples
    pub fn new(
        key: impl Into<Key>,
        members: impl IntoIterator<Item = (f64, f64, impl ToArg)>,
    ) -> Self {
        Self {
            key: key.into(),
            members: members
                .into_iter()
                .map(|(lon, lat, member)| (lon, lat, member.to_arg()))
                .collect(),
        }
    }
}

impl Command for GeoAddCommand {
    type Output = i64;

    fn command_name(&self) -> &'static str {
        "GEOADD"
    }

    fn args(&self) -> Vec<Bytes> {
        let mut args = Vec::with_capacity(1 + self.members.len() * 3);
        args.push(self.key.to_bytes());
        for (lon, lat, member) in &self.members {
            args.push(lon.to_arg());
            args.push(lat.to_arg());
            args.push(member.clone());
        }
        args
    }
}

/// GEOPOS command - Coordinates of members, absent for unknown members
#[derive(Debug, Clone)]
pub struct GeoPosCommand {
    key: Key,
    members: Vec<Bytes>,
}

impl GeoPosCommand {
    /// Create a new GEOPOS command
    pub fn new(key: impl Into<Key>, members: impl IntoIterator<Item = impl ToArg>) -> Self {
        Self {
            key: key.into(),
            members: members.into_iter().map(|m| m.to_arg()).collect(),
        }
    }
}

impl Command for GeoPosCommand {
    type Output = Vec<Option<(f64, f64)>>;

    fn command_name(&self) -> &'static str {
        "GEOPOS"
    }

    fn args(&self) -> Vec<Bytes> {
        let mut args = vec![self.key.to_bytes()];
        args.extend(self.members.iter().cloned());
        args
    }
}

/// GEODIST command - Distance between two members
#[derive(Debug, Clone)]
pub struct GeoDistCommand {
    key: Key,
    member1: Bytes,
    member2: Bytes,
    unit: Option<GeoUnit>,
}

impl GeoDistCommand {
    /// Create a new GEODIST command
    pub fn new(key: impl Into<Key>, member1: impl ToArg, member2: impl ToArg) -> Self {
        Self {
            key: key.into(),
            member1: member1.to_arg(),
            member2: member2.to_arg(),
            unit: None,
        }
    }

    /// Report the distance in `unit` instead of meters
    #[must_use]
    pub const fn unit(mut self, unit: GeoUnit) -> Self {
        self.unit = Some(unit);
        self
    }
}

impl Command for GeoDistCommand {
    type Output = Option<f64>;

    fn command_name(&self) -> &'static str {
        "GEODIST"
    }

    fn args(&self) -> Vec<Bytes> {
        let mut args = vec![
            self.key.to_bytes(),
            self.member1.clone(),
            self.member2.clone(),
        ];
        if let Some(unit) = self.unit {
            args.push(unit.as_str().to_arg());
        }
        args
    }
}

/// One match of a geo search
#[derive(Debug, Clone, PartialEq)]
pub struct GeoMatch {
    /// Member name
    pub member: String,
    /// Distance from the search center, with `WITHDIST`
    pub distance: Option<f64>,
    /// Raw geohash score, with `WITHHASH`
    pub hash: Option<i64>,
    /// `(longitude, latitude)`, with `WITHCOORD`
    pub coordinates: Option<(f64, f64)>,
}

impl FromWire for GeoMatch {
    /// Decodes a match without knowing which `WITH*` flags were sent.
    ///
    /// The trailing elements are told apart by shape: an integer is the
    /// hash, a nested array the coordinates, anything else the distance.
    fn from_wire(value: WireValue) -> KvResult<Self> {
        let value = value.into_primary();
        if !matches!(value, WireValue::Array(_) | WireValue::Set(_)) {
            return Ok(Self {
                member: value.decode()?,
                distance: None,
                hash: None,
                coordinates: None,
            });
        }

        let mut cursor = WireCursor::new(value)?;
        let mut found = Self {
            member: cursor.next()?,
            distance: None,
            hash: None,
            coordinates: None,
        };
        while cursor.remaining() > 0 {
            match cursor.next_value()?.into_primary() {
                WireValue::Integer(hash) if found.hash.is_none() => found.hash = Some(hash),
                coord @ WireValue::Array(_) if found.coordinates.is_none() => {
                    found.coordinates = Some(parse_coordinates(coord)?);
                }
                other if found.distance.is_none() => found.distance = Some(other.decode()?),
                other => return Err(KvError::decode("geo match attribute", other.shape())),
            }
        }
        Ok(found)
    }
}

fn parse_coordinates(value: WireValue) -> KvResult<(f64, f64)> {
    let mut coord = WireCursor::new(value)?;
    let lon = coord.next()?;
    let lat = coord.next()?;
    coord.finish()?;
    Ok((lon, lat))
}

/// GEOSEARCH command - Members within a radius of a point
#[derive(Debug, Clone)]
pub struct GeoSearchCommand {
    key: Key,
    longitude: f64,
    latitude: f64,
    radius: f64,
    unit: GeoUnit,
    with_coord: bool,
    with_dist: bool,
    with_hash: bool,
    count: Option<usize>,
    ascending: Option<bool>,
}

impl GeoSearchCommand {
    /// Search `key` for members within `radius` of `(longitude, latitude)`
    pub fn from_lonlat(
        key: impl Into<Key>,
        longitude: f64,
        latitude: f64,
        radius: f64,
        unit: GeoUnit,
    ) -> Self {
        Self {
            key: key.into(),
            longitude,
            latitude,
            radius,
            unit,
            with_coord: false,
            with_dist: false,
            with_hash: false,
            count: None,
            ascending: None,
        }
    }

    /// Include each match's coordinates
    #[must_use]
    pub const fn with_coord(mut self) -> Self {
        self.with_coord = true;
        self
    }

    /// Include each match's distance from the center
    #[must_use]
    pub const fn with_dist(mut self) -> Self {
        self.with_dist = true;
        self
    }

    /// Include each match's geohash
    #[must_use]
    pub const fn with_hash(mut self) -> Self {
        self.with_hash = true;
        self
    }

    /// Return at most `count` matches
    #[must_use]
    pub const fn count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// Sort matches nearest first (`true`) or farthest first (`false`)
    #[must_use]
    pub const fn sort_ascending(mut self, ascending: bool) -> Self {
        self.ascending = Some(ascending);
        self
    }

    const fn has_attributes(&self) -> bool {
        self.with_coord || self.with_dist || self.with_hash
    }

    fn parse_match(&self, value: WireValue) -> KvResult<GeoMatch> {
        if !self.has_attributes() {
            return Ok(GeoMatch {
                member: value.decode()?,
                distance: None,
                hash: None,
                coordinates: None,
            });
        }

        let mut cursor = WireCursor::new(value)?;
        let member = cursor.next()?;
        let distance = if self.with_dist { Some(cursor.next()?) } else { None };
        let hash = if self.with_hash { Some(cursor.next()?) } else { None };
        let coordinates = if self.with_coord {
            Some(parse_coordinates(cursor.next_value()?)?)
        } else {
            None
        };
        cursor.finish()?;

        Ok(GeoMatch {
            member,
            distance,
            hash,
            coordinates,
        })
    }
}

impl Command for GeoSearchCommand {
    type Output = Vec<GeoMatch>;

    fn command_name(&self) -> &'static str {
        "GEOSEARCH"
    }

    fn args(&self) -> Vec<Bytes> {
        let mut args = vec![
            self.key.to_bytes(),
            "FROMLONLAT".to_arg(),
            self.longitude.to_arg(),
            self.latitude.to_arg(),
            "BYRADIUS".to_arg(),
            self.radius.to_arg(),
            self.unit.as_str().to_arg(),
        ];
        match self.ascending {
            Some(true) => args.push("ASC".to_arg()),
            Some(false) => args.push("DESC".to_arg()),
            None => {}
        }
        if let Some(count) = self.count {
            args.push("COUNT".to_arg());
            args.push(count.to_arg());
        }
        if self.with_coord {
            args.push("WITHCOORD".to_arg());
        }
        if self.with_dist {
            args.push("WITHDIST".to_arg());
        }
        if self.with_hash {
            args.push("WITHHASH".to_arg());
        }
        args
    }

    fn parse_response(&self, response: WireValue) -> KvResult<Self::Output> {
        match response.into_primary() {
            WireValue::Array(items) | WireValue::Set(items) => {
                items.into_iter().map(|item| self.parse_match(item)).collect()
            }
            other => Err(KvError::decode("geo search matches", other.shape())),
        }
    }
}
