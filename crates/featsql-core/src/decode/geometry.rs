//! Geometry column decoding.

use featsql_proto::{FeatureEvent, SchemaPath, Value};

use crate::error::DecodeError;

/// Turns the text of a geometry column into events.
///
/// Implementations may parse the WKT into coordinates; the decoder only
/// routes spatial columns here instead of emitting plain values.
pub trait GeometryDecoder: Send {
    fn decode(
        &mut self,
        path: &SchemaPath,
        value: &Value,
        out: &mut Vec<FeatureEvent>,
    ) -> Result<(), DecodeError>;
}

impl<T: GeometryDecoder + ?Sized> GeometryDecoder for &mut T {
    fn decode(
        &mut self,
        path: &SchemaPath,
        value: &Value,
        out: &mut Vec<FeatureEvent>,
    ) -> Result<(), DecodeError> {
        (**self).decode(path, value, out)
    }
}

const KEYWORDS: [&str; 7] = [
    "GEOMETRYCOLLECTION",
    "MULTILINESTRING",
    "MULTIPOLYGON",
    "MULTIPOINT",
    "LINESTRING",
    "POLYGON",
    "POINT",
];

/// Checks the WKT header and emits the text unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct WktPassthrough;

fn strip_keyword<'t>(text: &'t str, keyword: &str) -> Option<&'t str> {
    let head = text.get(..keyword.len())?;
    head.eq_ignore_ascii_case(keyword)
        .then(|| text[keyword.len()..].trim_start())
}

impl WktPassthrough {
    fn validate(text: &str) -> Result<(), DecodeError> {
        let invalid = || DecodeError::Geometry(format!("not WKT: {}", text));
        let mut rest = text.trim();
        if strip_keyword(rest, "SRID=").is_some() {
            let (_, tail) = rest.split_once(';').ok_or_else(invalid)?;
            rest = tail.trim_start();
        }
        let mut body = KEYWORDS
            .iter()
            .find_map(|k| strip_keyword(rest, k))
            .ok_or_else(invalid)?;
        if let Some(tail) = ["ZM", "Z", "M"]
            .iter()
            .find_map(|d| strip_keyword(body, d))
        {
            body = tail;
        }
        if body.starts_with('(') || body.eq_ignore_ascii_case("EMPTY") {
            Ok(())
        } else {
            Err(invalid())
        }
    }
}

impl GeometryDecoder for WktPassthrough {
    fn decode(
        &mut self,
        path: &SchemaPath,
        value: &Value,
        out: &mut Vec<FeatureEvent>,
    ) -> Result<(), DecodeError> {
        let text = value
            .as_str()
            .ok_or_else(|| DecodeError::Geometry(format!("expected WKT text, got {}", value)))?;
        Self::validate(text)?;
        out.push(FeatureEvent::Geometry {
            path: path.clone(),
            wkt: text.to_string(),
        });
        Ok(())
    }
}
