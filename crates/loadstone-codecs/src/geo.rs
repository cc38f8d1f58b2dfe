//! Geospatial literals: well-known text and GeoJSON in, WKT out.

use loadstone_types::error::CodecError;
use loadstone_types::value::{Coordinate, CqlType, CqlValue};

fn parse_error(raw: &str, target: &CqlType, detail: impl Into<String>) -> CodecError {
    CodecError::Parse {
        value: raw.to_string(),
        target: target.clone(),
        detail: detail.into(),
    }
}

/// Parses a geo literal for `target`, accepting WKT and GeoJSON.
pub fn parse_geometry(raw: &str, target: &CqlType) -> Result<CqlValue, CodecError> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        let json: serde_json::Value = serde_json::from_str(trimmed)
            .map_err(|e| parse_error(raw, target, format!("invalid GeoJSON: {e}")))?;
        return parse_geojson(&json, target);
    }
    parse_wkt(trimmed, target)
}

/// Parses a GeoJSON geometry object for `target`.
pub fn parse_geojson(json: &serde_json::Value, target: &CqlType) -> Result<CqlValue, CodecError> {
    let raw = json.to_string();
    let kind = json
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| parse_error(&raw, target, "missing GeoJSON type"))?;
    let coordinates = json
        .get("coordinates")
        .ok_or_else(|| parse_error(&raw, target, "missing GeoJSON coordinates"))?;

    match (kind, target) {
        ("Point", CqlType::Point) => Ok(CqlValue::Point(json_position(coordinates).ok_or_else(
            || parse_error(&raw, target, "invalid Point coordinates"),
        )?)),
        ("LineString", CqlType::LineString) => {
            let points = json_positions(coordinates)
                .ok_or_else(|| parse_error(&raw, target, "invalid LineString coordinates"))?;
            Ok(CqlValue::LineString(points))
        }
        ("Polygon", CqlType::Polygon) => {
            let rings = coordinates
                .as_array()
                .map(|rings| rings.iter().map(json_positions).collect::<Option<Vec<_>>>())
                .unwrap_or(None)
                .ok_or_else(|| parse_error(&raw, target, "invalid Polygon coordinates"))?;
            Ok(CqlValue::Polygon(rings))
        }
        _ => Err(parse_error(
            &raw,
            target,
            format!("GeoJSON type '{kind}' does not match {target}"),
        )),
    }
}

fn json_position(value: &serde_json::Value) -> Option<Coordinate> {
    let pair = value.as_array()?;
    if pair.len() < 2 {
        return None;
    }
    Some(Coordinate {
        x: pair[0].as_f64()?,
        y: pair[1].as_f64()?,
    })
}

fn json_positions(value: &serde_json::Value) -> Option<Vec<Coordinate>> {
    value.as_array()?.iter().map(json_position).collect()
}

fn parse_wkt(raw: &str, target: &CqlType) -> Result<CqlValue, CodecError> {
    let upper = raw.to_ascii_uppercase();
    match target {
        CqlType::Point => {
            let body = wkt_body(&upper, raw, "POINT")
                .ok_or_else(|| parse_error(raw, target, "expected POINT (x y)"))?;
            let point = parse_wkt_position(body)
                .ok_or_else(|| parse_error(raw, target, "invalid POINT coordinates"))?;
            Ok(CqlValue::Point(point))
        }
        CqlType::LineString => {
            let body = wkt_body(&upper, raw, "LINESTRING")
                .ok_or_else(|| parse_error(raw, target, "expected LINESTRING (...)"))?;
            let points = body
                .split(',')
                .map(|p| parse_wkt_position(p.trim()))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| parse_error(raw, target, "invalid LINESTRING coordinates"))?;
            Ok(CqlValue::LineString(points))
        }
        CqlType::Polygon => {
            let body = wkt_body(&upper, raw, "POLYGON")
                .ok_or_else(|| parse_error(raw, target, "expected POLYGON ((...))"))?;
            let rings = split_rings(body)
                .into_iter()
                .map(|ring| {
                    ring.split(',')
                        .map(|p| parse_wkt_position(p.trim()))
                        .collect::<Option<Vec<_>>>()
                })
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| parse_error(raw, target, "invalid POLYGON coordinates"))?;
            Ok(CqlValue::Polygon(rings))
        }
        other => Err(parse_error(raw, other, "not a geospatial type")),
    }
}

/// Returns the text between the outer parentheses when `upper` starts
/// with `keyword`. Offsets index into `original`, which has the same
/// byte layout.
fn wkt_body<'a>(upper: &str, original: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = upper.strip_prefix(keyword)?.trim_start();
    let offset = original.len() - rest.len();
    let rest = &original[offset..];
    let rest = rest.strip_prefix('(')?;
    let rest = rest.strip_suffix(')')?;
    Some(rest.trim())
}

fn parse_wkt_position(raw: &str) -> Option<Coordinate> {
    let mut parts = raw.split_whitespace();
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    Some(Coordinate { x, y })
}

/// Splits `(r1), (r2)` into ring bodies.
fn split_rings(body: &str) -> Vec<&str> {
    let mut rings = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    for (i, c) in body.char_indices() {
        match c {
            '(' => {
                if depth == 0 {
                    start = Some(i + 1);
                }
                depth += 1;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if let Some(s) = start.take() {
                        rings.push(&body[s..i]);
                    }
                }
            }
            _ => {}
        }
    }
    rings
}

fn format_position(c: &Coordinate) -> String {
    format!("{} {}", c.x, c.y)
}

/// Formats a geo value as WKT, the unload representation.
pub fn format_wkt(value: &CqlValue) -> Option<String> {
    match value {
        CqlValue::Point(c) => Some(format!("POINT ({})", format_position(c))),
        CqlValue::LineString(pts) => Some(format!(
            "LINESTRING ({})",
            pts.iter().map(format_position).collect::<Vec<_>>().join(", ")
        )),
        CqlValue::Polygon(rings) => Some(format!(
            "POLYGON ({})",
            rings
                .iter()
                .map(|ring| format!(
                    "({})",
                    ring.iter().map(format_position).collect::<Vec<_>>().join(", ")
                ))
                .collect::<Vec<_>>()
                .join(", ")
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wkt_point_round_trips() {
        let parsed = parse_geometry("POINT (-1.5 2.75)", &CqlType::Point).unwrap();
        assert_eq!(
            parsed,
            CqlValue::Point(Coordinate { x: -1.5, y: 2.75 })
        );
        assert_eq!(format_wkt(&parsed).unwrap(), "POINT (-1.5 2.75)");
    }

    #[test]
    fn wkt_linestring_parses_each_position() {
        let parsed = parse_geometry("LINESTRING (30 10, 10 30, 40 40)", &CqlType::LineString);
        match parsed.unwrap() {
            CqlValue::LineString(pts) => assert_eq!(pts.len(), 3),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn wkt_polygon_keeps_rings() {
        let raw = "POLYGON ((35 10, 45 45, 15 40, 35 10), (20 30, 35 35, 30 20, 20 30))";
        match parse_geometry(raw, &CqlType::Polygon).unwrap() {
            CqlValue::Polygon(rings) => {
                assert_eq!(rings.len(), 2);
                assert_eq!(rings[0].len(), 4);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn geojson_point_accepted_on_load() {
        let parsed =
            parse_geometry(r#"{"type": "Point", "coordinates": [1.0, 2.0]}"#, &CqlType::Point)
                .unwrap();
        assert_eq!(parsed, CqlValue::Point(Coordinate { x: 1.0, y: 2.0 }));
    }

    #[test]
    fn mismatched_geojson_type_is_rejected() {
        let result = parse_geometry(
            r#"{"type": "Point", "coordinates": [1.0, 2.0]}"#,
            &CqlType::LineString,
        );
        assert!(result.is_err());
    }

    #[test]
    fn lowercase_wkt_keyword_accepted() {
        assert!(parse_geometry("point (1 2)", &CqlType::Point).is_ok());
    }
}
