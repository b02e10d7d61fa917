use crate::error::AssignError;
use crate::metric::DistanceMetric;
use crate::places::{Place, PlaceTable};
use crate::types::{CompositeKey, Field};

/// The nearest site found for one query point.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub query_key: CompositeKey,
    pub site_key: CompositeKey,
    /// Raw distance to the chosen site.
    pub distance_miles: f64,
    /// The minimized value; differs from `distance_miles` only when the
    /// metric adjusts for this pair.
    pub adjusted_miles: f64,
}

impl Assignment {
    /// One field per site key component, then the distance.
    pub fn to_fields(&self) -> Vec<Field> {
        let mut fields: Vec<Field> = self.site_key.parts().iter().map(Field::from).collect();
        fields.push(Field::Float(self.distance_miles));
        fields
    }
}

/// Brute-force nearest site. The first site in table order wins exact ties;
/// NaN distances never win.
pub fn resolve<M: DistanceMetric + ?Sized>(
    query: &Place,
    sites: &PlaceTable,
    metric: &M,
) -> Result<Assignment, AssignError> {
    let mut best: Option<(&Place, f64)> = None;
    for site in sites.places() {
        let d = metric.adjusted_distance(query, site);
        match best {
            Some((_, best_d)) if !(d < best_d) => {}
            None if d.is_nan() => {}
            _ => best = Some((site, d)),
        }
    }

    let (site, adjusted_miles) = best.ok_or(AssignError::EmptySiteTable)?;
    Ok(Assignment {
        query_key: query.key.clone(),
        site_key: site.key.clone(),
        distance_miles: metric.distance(query.location, site.location),
        adjusted_miles,
    })
}
