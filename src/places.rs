use crate::error::AssignError;
use crate::table::Table;
use crate::types::{CompositeKey, Field, GeoPoint};
use std::collections::HashMap;
use tracing::warn;

/// A keyed location: a site (stadium) or a query point (county center).
#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub key: CompositeKey,
    pub location: GeoPoint,
    /// Every non-location column of the source row, key columns included.
    pub fields: HashMap<String, Field>,
}

impl Place {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }
}

/// Places built from a table, kept aligned row-for-row with it.
#[derive(Debug, Clone)]
pub struct PlaceTable {
    table: Table,
    places: Vec<Place>,
}

/// A place table plus the number of rows that had no usable location.
#[derive(Debug)]
pub struct Parsed<T> {
    pub value: T,
    pub skipped: usize,
}

impl PlaceTable {
    /// Reads locations from the `latitude`/`longitude` columns. Rows whose
    /// coordinates are missing, non-numeric or out of range are dropped and
    /// counted; the returned table no longer contains them.
    pub fn from_table(table: &Table, latitude: &str, longitude: &str) -> Result<Parsed<Self>, AssignError> {
        let lat_idx = table.column_index(latitude)?;
        let lon_idx = table.column_index(longitude)?;

        let mut keep = Vec::with_capacity(table.len());
        let mut places = Vec::with_capacity(table.len());
        for (i, row) in table.rows().iter().enumerate() {
            match locate(row, lat_idx, lon_idx) {
                Ok(location) => {
                    let fields = table
                        .columns()
                        .iter()
                        .zip(row)
                        .enumerate()
                        .filter(|(j, _)| *j != lat_idx && *j != lon_idx)
                        .map(|(_, (name, value))| (name.clone(), value.clone()))
                        .collect();
                    places.push(Place {
                        key: table.key_at(i).clone(),
                        location,
                        fields,
                    });
                    keep.push(true);
                }
                Err(e) => {
                    warn!(table = table.name(), key = %table.key_at(i), error = %e, "skipping row");
                    keep.push(false);
                }
            }
        }

        let skipped = keep.iter().filter(|k| !**k).count();
        let mut flags = keep.into_iter();
        let table = table.filter(table.name(), |_| flags.next().unwrap_or(false))?;
        Ok(Parsed {
            value: Self { table, places },
            skipped,
        })
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn places(&self) -> &[Place] {
        &self.places
    }

    pub fn key_columns(&self) -> Vec<&str> {
        self.table.key_columns()
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    pub fn get(&self, key: &CompositeKey) -> Option<&Place> {
        self.places.iter().find(|p| &p.key == key)
    }
}

fn locate(row: &[Field], lat_idx: usize, lon_idx: usize) -> Result<GeoPoint, AssignError> {
    let coordinate = |idx: usize| {
        row[idx]
            .as_f64()
            .ok_or_else(|| AssignError::MalformedRecord(format!("non-numeric coordinate '{}'", row[idx])))
    };
    GeoPoint::new(coordinate(lat_idx)?, coordinate(lon_idx)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_locations_are_skipped_and_counted() {
        let table = Table::from_rows(
            "teams",
            vec!["team".into(), "latitude".into(), "longitude".into()],
            &["team"],
            vec![
                vec!["Rams".into(), Field::Float(33.95), Field::Float(-118.34)],
                vec!["Nowhere".into(), Field::Text("n/a".into()), Field::Float(0.0)],
                vec!["Offworld".into(), Field::Float(123.0), Field::Float(0.0)],
                vec!["Packers".into(), Field::Int(44), Field::Float(-88.06)],
            ],
        )
        .unwrap();

        let parsed = PlaceTable::from_table(&table, "latitude", "longitude").unwrap();

        assert_eq!(parsed.skipped, 2);
        let places = parsed.value;
        assert_eq!(places.len(), 2);
        assert_eq!(places.table().len(), 2);
        assert_eq!(places.places()[1].field("team"), Some(&Field::Text("Packers".into())));
        assert!(places.places()[1].field("latitude").is_none());
        assert_eq!(places.places()[1].location.latitude(), 44.0);
    }

    #[test]
    fn test_missing_location_column() {
        let table = Table::from_rows("t", vec!["team".into()], &["team"], vec![vec!["Rams".into()]]).unwrap();
        assert!(matches!(
            PlaceTable::from_table(&table, "latitude", "longitude"),
            Err(AssignError::MissingColumn { .. })
        ));
    }
}
