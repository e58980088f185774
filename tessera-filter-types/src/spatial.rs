use std::fmt;

use serde::{Deserialize, Serialize};

/// Spatial relationship tested between a target geometry and a source geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialRelation {
    Intersects,
    Contains,
    Within,
    Touches,
    Crosses,
    Overlaps,
    Disjoint,
    Equals,
}

impl SpatialRelation {
    pub fn sql_function(&self) -> &'static str {
        match self {
            SpatialRelation::Intersects => "ST_Intersects",
            SpatialRelation::Contains => "ST_Contains",
            SpatialRelation::Within => "ST_Within",
            SpatialRelation::Touches => "ST_Touches",
            SpatialRelation::Crosses => "ST_Crosses",
            SpatialRelation::Overlaps => "ST_Overlaps",
            SpatialRelation::Disjoint => "ST_Disjoint",
            SpatialRelation::Equals => "ST_Equals",
        }
    }
}

impl fmt::Display for SpatialRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_function())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryType {
    Point,
    Line,
    Polygon,
    Unknown,
}

/// Axis aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x: min_x.min(max_x),
            min_y: min_y.min(max_y),
            max_x: min_x.max(max_x),
            max_y: min_y.max(max_y),
        }
    }

    pub fn point(x: f64, y: f64) -> Self {
        Self::new(x, y, x, y)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn intersects(&self, other: &Envelope) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub fn contains(&self, other: &Envelope) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && self.max_x >= other.max_x
            && self.max_y >= other.max_y
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Boundaries meet but interiors don't overlap.
    pub fn touches(&self, other: &Envelope) -> bool {
        self.intersects(other) && self.intersection_area(other) == 0.0
    }

    pub fn intersection_area(&self, other: &Envelope) -> f64 {
        let w = self.max_x.min(other.max_x) - self.min_x.max(other.min_x);
        let h = self.max_y.min(other.max_y) - self.min_y.max(other.min_y);
        if w <= 0.0 || h <= 0.0 { 0.0 } else { w * h }
    }

    pub fn expand(&self, distance: f64) -> Envelope {
        Envelope::new(
            self.min_x - distance,
            self.min_y - distance,
            self.max_x + distance,
            self.max_y + distance,
        )
    }

    pub fn union(&self, other: &Envelope) -> Envelope {
        Envelope {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }
}

/// Description of a spatial predicate between a target dataset and a source dataset.
///
/// Several relations are OR-ed together. A buffer expands (positive) or erodes (negative) the
/// source geometry before testing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialPredicate {
    pub relations: Vec<SpatialRelation>,
    #[serde(default)]
    pub buffer: Option<f64>,
}

impl SpatialPredicate {
    pub fn new(relations: Vec<SpatialRelation>) -> Self {
        Self {
            relations,
            buffer: None,
        }
    }

    pub fn intersects() -> Self {
        Self::new(vec![SpatialRelation::Intersects])
    }

    pub fn with_buffer(mut self, distance: f64) -> Self {
        self.buffer = Some(distance);
        self
    }

    /// Buffer distance, treating zero as "no buffer".
    pub fn active_buffer(&self) -> Option<f64> {
        self.buffer.filter(|d| *d != 0.0)
    }

    /// Render as SQL, `target_geometry` and `source_geometry` are already-qualified column
    /// references.
    pub fn to_sql(&self, target_geometry: &str, source_geometry: &str) -> String {
        let source = match self.active_buffer() {
            Some(distance) => format!("ST_Buffer({source_geometry}, {distance})"),
            None => source_geometry.to_string(),
        };

        let parts: Vec<String> = self
            .relations
            .iter()
            .map(|relation| format!("{}({target_geometry}, {source})", relation.sql_function()))
            .collect();

        match parts.len() {
            0 => String::new(),
            1 => parts.into_iter().next().unwrap_or_default(),
            _ => format!("({})", parts.join(" OR ")),
        }
    }
}
