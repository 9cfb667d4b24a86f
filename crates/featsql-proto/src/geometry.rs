//! Geometry literals used in spatial filter predicates.

use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// A two-dimensional coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord(pub f64, pub f64);

/// Geometry shapes accepted as filter literals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Shape {
    Point(Coord),
    LineString(Vec<Coord>),
    Polygon(Vec<Vec<Coord>>),
    MultiPoint(Vec<Coord>),
    MultiLineString(Vec<Vec<Coord>>),
    MultiPolygon(Vec<Vec<Vec<Coord>>>),
    /// Axis-aligned bounding box. `min_x > max_x` means the box crosses
    /// the antimeridian.
    Envelope {
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
    },
}

/// A geometry literal with an optional EPSG code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub shape: Shape,
    #[serde(default)]
    pub srid: Option<i32>,
}

impl Geometry {
    /// Create a geometry without an explicit CRS.
    pub fn new(shape: Shape) -> Self {
        Self { shape, srid: None }
    }

    /// Create a point.
    pub fn point(x: f64, y: f64) -> Self {
        Self::new(Shape::Point(Coord(x, y)))
    }

    /// Create an envelope.
    pub fn envelope(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self::new(Shape::Envelope {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    /// Set the EPSG code.
    pub fn with_srid(mut self, srid: i32) -> Self {
        self.srid = Some(srid);
        self
    }

    /// Replace envelopes by equivalent polygonal shapes.
    ///
    /// An envelope crossing the antimeridian becomes a multipolygon of two
    /// boxes, one clipped at 180 and one clipped at -180.
    pub fn to_polygonal(&self) -> Geometry {
        let shape = match self.shape {
            Shape::Envelope {
                min_x,
                min_y,
                max_x,
                max_y,
            } if min_x > max_x => Shape::MultiPolygon(vec![
                vec![box_ring(min_x, min_y, 180.0, max_y)],
                vec![box_ring(-180.0, min_y, max_x, max_y)],
            ]),
            Shape::Envelope {
                min_x,
                min_y,
                max_x,
                max_y,
            } => Shape::Polygon(vec![box_ring(min_x, min_y, max_x, max_y)]),
            ref other => other.clone(),
        };
        Geometry {
            shape,
            srid: self.srid,
        }
    }

    /// Render as well-known text.
    pub fn to_wkt(&self) -> String {
        let mut out = String::new();
        match &self.to_polygonal().shape {
            Shape::Point(c) => {
                out.push_str("POINT(");
                write_coord(&mut out, c);
                out.push(')');
            }
            Shape::LineString(line) => {
                out.push_str("LINESTRING");
                write_line(&mut out, line);
            }
            Shape::Polygon(rings) => {
                out.push_str("POLYGON");
                write_rings(&mut out, rings);
            }
            Shape::MultiPoint(points) => {
                out.push_str("MULTIPOINT(");
                for (i, c) in points.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push('(');
                    write_coord(&mut out, c);
                    out.push(')');
                }
                out.push(')');
            }
            Shape::MultiLineString(lines) => {
                out.push_str("MULTILINESTRING");
                write_rings(&mut out, lines);
            }
            Shape::MultiPolygon(polygons) => {
                out.push_str("MULTIPOLYGON(");
                for (i, rings) in polygons.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write_rings(&mut out, rings);
                }
                out.push(')');
            }
            // to_polygonal never yields an envelope
            Shape::Envelope { .. } => {}
        }
        out
    }
}

fn box_ring(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Vec<Coord> {
    vec![
        Coord(min_x, min_y),
        Coord(max_x, min_y),
        Coord(max_x, max_y),
        Coord(min_x, max_y),
        Coord(min_x, min_y),
    ]
}

fn write_coord(out: &mut String, c: &Coord) {
    let _ = write!(out, "{} {}", c.0, c.1);
}

fn write_line(out: &mut String, line: &[Coord]) {
    out.push('(');
    for (i, c) in line.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_coord(out, c);
    }
    out.push(')');
}

fn write_rings(out: &mut String, rings: &[Vec<Coord>]) {
    out.push('(');
    for (i, ring) in rings.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_line(out, ring);
    }
    out.push(')');
}
