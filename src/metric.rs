use crate::places::Place;
use crate::types::GeoPoint;
use geo::{Distance, Geodesic, Haversine};
use serde::Deserialize;

const METERS_PER_MILE: f64 = 1609.344;

/// Distance between places, in miles.
pub trait DistanceMetric: Sync {
    fn distance(&self, a: GeoPoint, b: GeoPoint) -> f64;

    /// The value the resolver minimizes. Defaults to the raw distance.
    fn adjusted_distance(&self, query: &Place, site: &Place) -> f64 {
        self.distance(query.location, site.location)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Formula {
    /// WGS-84 ellipsoid (Karney).
    #[default]
    Geodesic,
    /// Great circle on a sphere of mean earth radius.
    Haversine,
}

impl Formula {
    pub fn as_str(self) -> &'static str {
        match self {
            Formula::Geodesic => "geodesic",
            Formula::Haversine => "haversine",
        }
    }
}

/// Shrinks the distance when a query field equals a site field, so sites in
/// the query's own region are favored without being forced.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RegionalAdjustment {
    pub query_field: String,
    pub site_field: String,
    #[serde(default = "default_factor")]
    pub factor: f64,
}

fn default_factor() -> f64 {
    2.5
}

impl RegionalAdjustment {
    fn applies(&self, query: &Place, site: &Place) -> bool {
        match (query.field(&self.query_field), site.field(&self.site_field)) {
            (Some(q), Some(s)) => q == s,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GeoMetric {
    formula: Formula,
    adjustment: Option<RegionalAdjustment>,
}

impl GeoMetric {
    pub fn new(formula: Formula) -> Self {
        Self {
            formula,
            adjustment: None,
        }
    }

    pub fn with_adjustment(mut self, adjustment: RegionalAdjustment) -> Self {
        self.adjustment = Some(adjustment);
        self
    }

    pub fn formula(&self) -> Formula {
        self.formula
    }
}

impl DistanceMetric for GeoMetric {
    fn distance(&self, a: GeoPoint, b: GeoPoint) -> f64 {
        if a == b {
            return 0.0;
        }
        let (a, b) = (a.to_point(), b.to_point());
        let meters = match self.formula {
            Formula::Geodesic => Geodesic::distance(a, b),
            Formula::Haversine => Haversine::distance(a, b),
        };
        meters / METERS_PER_MILE
    }

    fn adjusted_distance(&self, query: &Place, site: &Place) -> f64 {
        let raw = self.distance(query.location, site.location);
        match &self.adjustment {
            Some(adj) if adj.applies(query, site) => raw / adj.factor,
            _ => raw,
        }
    }
}
