//! Watershed polygons and their GeoJSON representation.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use basin_common::{BoundingBox, Crs};
use geo::{BoundingRect, MultiPolygon, Polygon};
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject, JsonValue};

use crate::error::{Result, RoutingError};
use crate::router::RouteOutcome;

/// Property written next to `dsid` for watersheds whose routing failed.
pub const ROUTE_ERROR_FIELD: &str = "route_error";

/// One watershed polygon.
#[derive(Debug, Clone)]
pub struct Watershed {
    /// Row position in the input collection.
    pub position: usize,
    /// Caller-supplied identifier.
    pub wsid: i64,
    pub geometry: MultiPolygon<f64>,
    pub bbox: BoundingBox,
    /// Downstream watershed id, `-1` for terminal, unset until routed.
    pub dsid: Option<i64>,
    /// Why routing failed, when it did.
    pub route_error: Option<String>,
    /// Original attributes, carried through to the output.
    properties: JsonObject,
    /// Original geometry, written back unchanged.
    source_geometry: Option<geojson::Geometry>,
}

impl Watershed {
    pub fn new(position: usize, wsid: i64, geometry: MultiPolygon<f64>) -> Result<Self> {
        let rect = geometry
            .bounding_rect()
            .ok_or_else(|| RoutingError::invalid_watershed(position, "geometry is empty"))?;

        Ok(Self {
            position,
            wsid,
            bbox: BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y),
            geometry,
            dsid: None,
            route_error: None,
            properties: JsonObject::new(),
            source_geometry: None,
        })
    }

    /// Input attributes other than the routing columns.
    pub fn properties(&self) -> &JsonObject {
        &self.properties
    }

    fn from_feature(position: usize, feature: Feature, id_field: &str) -> Result<Self> {
        let geometry = feature
            .geometry
            .as_ref()
            .ok_or_else(|| RoutingError::invalid_watershed(position, "feature has no geometry"))?;

        let polygons = match &geometry.value {
            geojson::Value::Polygon(_) => {
                let polygon = Polygon::<f64>::try_from(geometry.value.clone())
                    .map_err(|e| RoutingError::invalid_watershed(position, e.to_string()))?;
                MultiPolygon::new(vec![polygon])
            }
            geojson::Value::MultiPolygon(_) => {
                MultiPolygon::<f64>::try_from(geometry.value.clone())
                    .map_err(|e| RoutingError::invalid_watershed(position, e.to_string()))?
            }
            other => {
                return Err(RoutingError::invalid_watershed(
                    position,
                    format!("expected Polygon or MultiPolygon, got {}", geometry_type(other)),
                ))
            }
        };

        let properties = feature.properties.clone().unwrap_or_default();
        let raw_id = properties.get(id_field).ok_or_else(|| {
            RoutingError::invalid_watershed(position, format!("missing '{}' attribute", id_field))
        })?;
        let wsid = parse_id(raw_id).ok_or_else(|| {
            RoutingError::invalid_watershed(
                position,
                format!("'{}' value {} is not an integer", id_field, raw_id),
            )
        })?;

        let mut watershed = Self::new(position, wsid, polygons)?;
        watershed.properties = properties;
        watershed.source_geometry = feature.geometry;
        Ok(watershed)
    }

    fn to_feature(&self, id_field: &str, downstream_field: &str) -> Feature {
        let mut properties = self.properties.clone();
        properties.insert(id_field.to_string(), JsonValue::from(self.wsid));
        properties.insert(
            downstream_field.to_string(),
            self.dsid.map(JsonValue::from).unwrap_or(JsonValue::Null),
        );
        match &self.route_error {
            Some(error) => {
                properties.insert(ROUTE_ERROR_FIELD.to_string(), JsonValue::from(error.clone()));
            }
            None => {
                properties.remove(ROUTE_ERROR_FIELD);
            }
        }

        let geometry = self
            .source_geometry
            .clone()
            .unwrap_or_else(|| geojson::Geometry::new(geojson::Value::from(&self.geometry)));

        Feature {
            bbox: None,
            geometry: Some(geometry),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

fn geometry_type(value: &geojson::Value) -> &'static str {
    match value {
        geojson::Value::Point(_) => "Point",
        geojson::Value::MultiPoint(_) => "MultiPoint",
        geojson::Value::LineString(_) => "LineString",
        geojson::Value::MultiLineString(_) => "MultiLineString",
        geojson::Value::Polygon(_) => "Polygon",
        geojson::Value::MultiPolygon(_) => "MultiPolygon",
        geojson::Value::GeometryCollection(_) => "GeometryCollection",
    }
}

/// Accepts integers, integral floats and numeric strings.
fn parse_id(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        JsonValue::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        _ => None,
    }
}

fn integral(value: f64) -> Option<i64> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

/// Ordered collection of watersheds. Positions never change.
#[derive(Debug, Clone)]
pub struct WatershedCollection {
    watersheds: Vec<Watershed>,
    crs: Option<Crs>,
    id_field: String,
    foreign_members: Option<JsonObject>,
}

impl WatershedCollection {
    /// Build from watersheds already in position order.
    pub fn new(watersheds: Vec<Watershed>) -> Self {
        Self {
            watersheds,
            crs: None,
            id_field: "wsid".to_string(),
            foreign_members: None,
        }
    }

    /// Build from `(wsid, geometry)` pairs, positions taken from order.
    pub fn from_polygons(
        polygons: impl IntoIterator<Item = (i64, MultiPolygon<f64>)>,
    ) -> Result<Self> {
        let watersheds = polygons
            .into_iter()
            .enumerate()
            .map(|(position, (wsid, geometry))| Watershed::new(position, wsid, geometry))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(watersheds))
    }

    pub fn from_geojson_str(input: &str, id_field: &str) -> Result<Self> {
        let geojson: GeoJson = input.parse()?;
        let collection = match geojson {
            GeoJson::FeatureCollection(collection) => collection,
            _ => {
                return Err(RoutingError::Vector(
                    "watershed input must be a FeatureCollection".to_string(),
                ))
            }
        };

        let crs = declared_crs(collection.foreign_members.as_ref());
        let watersheds = collection
            .features
            .into_iter()
            .enumerate()
            .map(|(position, feature)| Watershed::from_feature(position, feature, id_field))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            watersheds = watersheds.len(),
            crs = ?crs,
            "Loaded watershed collection"
        );

        Ok(Self {
            watersheds,
            crs,
            id_field: id_field.to_string(),
            foreign_members: collection.foreign_members,
        })
    }

    pub fn from_geojson_file(path: impl AsRef<Path>, id_field: &str) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|e| {
            RoutingError::Io(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_geojson_str(&input, id_field)
    }

    pub fn len(&self) -> usize {
        self.watersheds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watersheds.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Watershed> {
        self.watersheds.get(position)
    }

    pub fn watersheds(&self) -> &[Watershed] {
        &self.watersheds
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Watershed> {
        self.watersheds.iter()
    }

    /// CRS declared by the input file, if any.
    pub fn crs(&self) -> Option<Crs> {
        self.crs
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// Ids that appear more than once, ascending.
    pub fn duplicate_ids(&self) -> Vec<i64> {
        let mut counts: HashMap<i64, usize> = HashMap::new();
        for watershed in &self.watersheds {
            *counts.entry(watershed.wsid).or_default() += 1;
        }
        let mut duplicates: Vec<i64> = counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(wsid, _)| wsid)
            .collect();
        duplicates.sort_unstable();
        duplicates
    }

    /// Write routing outcomes into the `dsid` / `route_error` columns.
    ///
    /// `outcomes[i]` belongs to the watershed at position `i`.
    pub fn apply_outcomes(&mut self, outcomes: &[RouteOutcome]) {
        for (watershed, outcome) in self.watersheds.iter_mut().zip(outcomes) {
            watershed.dsid = outcome.dsid();
            watershed.route_error = outcome.error().map(|e| e.to_string());
        }
    }

    /// `(wsid, dsid)` pairs in position order.
    pub fn drainage_pairs(&self) -> Vec<(i64, Option<i64>)> {
        self.watersheds.iter().map(|w| (w.wsid, w.dsid)).collect()
    }

    pub fn to_feature_collection(&self, downstream_field: &str) -> FeatureCollection {
        FeatureCollection {
            bbox: None,
            features: self
                .watersheds
                .iter()
                .map(|w| w.to_feature(&self.id_field, downstream_field))
                .collect(),
            foreign_members: self.foreign_members.clone(),
        }
    }

    pub fn to_geojson_string(&self, downstream_field: &str) -> Result<String> {
        Ok(serde_json::to_string(&self.to_feature_collection(downstream_field))?)
    }

    pub fn write_geojson(&self, path: impl AsRef<Path>, downstream_field: &str) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| {
            RoutingError::Io(format!("cannot create {}: {}", path.display(), e))
        })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &self.to_feature_collection(downstream_field))?;
        writer.flush()?;

        tracing::info!(path = %path.display(), watersheds = self.len(), "Wrote routed watersheds");
        Ok(())
    }
}

/// Read a legacy GeoJSON `crs` member: `{"type": "name", "properties": {"name": "..."}}`.
fn declared_crs(foreign_members: Option<&JsonObject>) -> Option<Crs> {
    let name = foreign_members?
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()?;
    match name.parse() {
        Ok(crs) => Some(crs),
        Err(e) => {
            tracing::warn!(crs = name, error = %e, "Ignoring unrecognised GeoJSON crs member");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use serde_json::json;

    fn collection_json(features: JsonValue) -> String {
        json!({
            "type": "FeatureCollection",
            "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::26913"}},
            "features": features,
        })
        .to_string()
    }

    fn square_feature(wsid: JsonValue, x: f64) -> JsonValue {
        json!({
            "type": "Feature",
            "properties": {"wsid": wsid, "name": "basin"},
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[x, 0.0], [x + 1.0, 0.0], [x + 1.0, 1.0], [x, 1.0], [x, 0.0]]],
            },
        })
    }

    #[test]
    fn test_load_feature_collection() {
        let input = collection_json(json!([
            square_feature(json!(10), 0.0),
            square_feature(json!(11.0), 1.0),
            square_feature(json!("12"), 2.0),
        ]));
        let collection = WatershedCollection::from_geojson_str(&input, "wsid").unwrap();

        assert_eq!(collection.len(), 3);
        assert_eq!(collection.crs(), Some(Crs::from_epsg(26913)));
        let ids: Vec<i64> = collection.iter().map(|w| w.wsid).collect();
        assert_eq!(ids, vec![10, 11, 12]);
        assert_eq!(collection.get(1).unwrap().position, 1);
        assert_eq!(
            collection.get(2).unwrap().bbox,
            BoundingBox::new(2.0, 0.0, 3.0, 1.0)
        );
    }

    #[test]
    fn test_missing_or_bad_id_is_rejected() {
        let input = collection_json(json!([{
            "type": "Feature",
            "properties": {"name": "no id"},
            "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]},
        }]));
        let err = WatershedCollection::from_geojson_str(&input, "wsid").unwrap_err();
        assert!(matches!(err, RoutingError::InvalidWatershed { index: 0, .. }));

        let input = collection_json(json!([square_feature(json!(1.5), 0.0)]));
        assert!(WatershedCollection::from_geojson_str(&input, "wsid").is_err());
    }

    #[test]
    fn test_non_polygon_is_rejected() {
        let input = collection_json(json!([{
            "type": "Feature",
            "properties": {"wsid": 1},
            "geometry": {"type": "Point", "coordinates": [0.0, 0.0]},
        }]));
        let err = WatershedCollection::from_geojson_str(&input, "wsid").unwrap_err();
        assert!(err.to_string().contains("Point"));
    }

    #[test]
    fn test_duplicate_ids() {
        let input = collection_json(json!([
            square_feature(json!(3), 0.0),
            square_feature(json!(1), 1.0),
            square_feature(json!(3), 2.0),
        ]));
        let collection = WatershedCollection::from_geojson_str(&input, "wsid").unwrap();
        assert_eq!(collection.duplicate_ids(), vec![3]);
    }

    #[test]
    fn test_output_keeps_attributes_and_adds_dsid() {
        let input = collection_json(json!([
            square_feature(json!(1), 0.0),
            square_feature(json!(2), 1.0),
        ]));
        let mut collection = WatershedCollection::from_geojson_str(&input, "wsid").unwrap();
        collection.apply_outcomes(&[
            RouteOutcome::Downstream { wsid: 2, position: 1 },
            RouteOutcome::Terminal,
        ]);

        let output = collection.to_feature_collection("dsid");
        assert!(output.foreign_members.unwrap().contains_key("crs"));
        let first = output.features[0].properties.as_ref().unwrap();
        assert_eq!(first["dsid"], json!(2));
        assert_eq!(first["name"], json!("basin"));
        assert_eq!(first["wsid"], json!(1));
        let second = output.features[1].properties.as_ref().unwrap();
        assert_eq!(second["dsid"], json!(-1));
        assert!(!second.contains_key(ROUTE_ERROR_FIELD));
    }

    #[test]
    fn test_unrouted_watershed_has_null_dsid() {
        let collection = WatershedCollection::from_polygons(vec![(
            5,
            MultiPolygon::new(vec![geo::polygon![
                (x: 0.0, y: 0.0),
                (x: 1.0, y: 0.0),
                (x: 1.0, y: 1.0),
            ]]),
        )])
        .unwrap();
        let output = collection.to_feature_collection("dsid");
        let properties = output.features[0].properties.as_ref().unwrap();
        assert_eq!(properties["dsid"], JsonValue::Null);
        assert!(output.features[0].geometry.is_some());
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id(&json!(7)), Some(7));
        assert_eq!(parse_id(&json!(-3)), Some(-3));
        assert_eq!(parse_id(&json!(8.0)), Some(8));
        assert_eq!(parse_id(&json!(" 9 ")), Some(9));
        assert_eq!(parse_id(&json!("9.0")), Some(9));
        assert_eq!(parse_id(&json!(2.5)), None);
        assert_eq!(parse_id(&json!(null)), None);
        assert_eq!(parse_id(&json!(true)), None);
    }
}
