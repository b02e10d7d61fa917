use crate::error::AssignError;
use geo::Point;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A validated latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, AssignError> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(AssignError::InvalidPoint { latitude, longitude });
        }
        Ok(Self { latitude, longitude })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// geo keeps x as longitude.
    pub fn to_point(self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }
}

impl FromStr for GeoPoint {
    type Err = AssignError;

    /// Parses the `"lat,lon"` form used by boundary datasets.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || AssignError::MalformedRecord(format!("expected 'lat,lon', got '{}'", s));
        let (lat, lon) = s.split_once(',').ok_or_else(malformed)?;
        let lat: f64 = lat.trim().parse().map_err(|_| malformed())?;
        let lon: f64 = lon.trim().parse().map_err(|_| malformed())?;
        Self::new(lat, lon)
    }
}

/// A single cell of a table.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Field {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Field::Int(i) => Some(*i as f64),
            Field::Float(f) => Some(*f),
            Field::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Field::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Parses integers first, then floats, falling back to text.
    pub fn infer(raw: &str) -> Field {
        let raw = raw.trim();
        if let Ok(i) = raw.parse::<i64>() {
            Field::Int(i)
        } else if let Ok(f) = raw.parse::<f64>() {
            Field::Float(f)
        } else {
            Field::Text(raw.to_string())
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(i) => write!(f, "{}", i),
            // Debug is the shortest representation that parses back to the same bits.
            Field::Float(x) => write!(f, "{:?}", x),
            Field::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Field {
    fn from(v: i64) -> Self {
        Field::Int(v)
    }
}

impl From<f64> for Field {
    fn from(v: f64) -> Self {
        Field::Float(v)
    }
}

impl From<&str> for Field {
    fn from(v: &str) -> Self {
        Field::Text(v.to_string())
    }
}

impl From<String> for Field {
    fn from(v: String) -> Self {
        Field::Text(v)
    }
}

/// One component of a composite key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    Int(i64),
    Text(String),
}

impl TryFrom<&Field> for KeyPart {
    type Error = AssignError;

    fn try_from(field: &Field) -> Result<Self, Self::Error> {
        match field {
            Field::Int(i) => Ok(KeyPart::Int(*i)),
            Field::Text(s) => Ok(KeyPart::Text(s.clone())),
            Field::Float(x) => Err(AssignError::InvalidKey(format!(
                "floating point value {:?} cannot be part of a key",
                x
            ))),
        }
    }
}

impl From<&KeyPart> for Field {
    fn from(part: &KeyPart) -> Self {
        match part {
            KeyPart::Int(i) => Field::Int(*i),
            KeyPart::Text(s) => Field::Text(s.clone()),
        }
    }
}

/// Ordered tuple of fields identifying a row. Arity is fixed per table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeKey(Vec<KeyPart>);

impl CompositeKey {
    pub fn new(parts: Vec<KeyPart>) -> Result<Self, AssignError> {
        if parts.is_empty() {
            return Err(AssignError::InvalidKey("composite key has no parts".to_string()));
        }
        Ok(Self(parts))
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match part {
                KeyPart::Int(v) => write!(f, "{}", v)?,
                KeyPart::Text(s) => write!(f, "{}", s)?,
            }
        }
        write!(f, ")")
    }
}

/// Five-digit county code: state padded to 2 digits, county to 3.
pub fn fips_code(state_id: i64, county_id: i64) -> String {
    format!("{:02}{:03}", state_id, county_id)
}
