use tessera_filter_types::spatial::{Envelope, SpatialRelation};

/// Geometry operations used by in-memory selection.
pub trait GeometryEngine: Send + Sync {
    /// Whether `target` stands in `relation` to `source`.
    fn evaluate(&self, relation: SpatialRelation, target: &Envelope, source: &Envelope) -> bool;

    /// Expand (positive) or erode (negative) a geometry. `None` when erosion consumes it.
    fn buffer(&self, geometry: &Envelope, distance: f64) -> Option<Envelope>;
}

/// Evaluates relations on bounding envelopes only.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeEngine;

fn is_degenerate(envelope: &Envelope) -> bool {
    envelope.width() == 0.0 || envelope.height() == 0.0
}

impl GeometryEngine for EnvelopeEngine {
    fn evaluate(&self, relation: SpatialRelation, target: &Envelope, source: &Envelope) -> bool {
        match relation {
            SpatialRelation::Intersects => target.intersects(source),
            SpatialRelation::Disjoint => !target.intersects(source),
            SpatialRelation::Contains => target.contains(source),
            SpatialRelation::Within => source.contains(target),
            SpatialRelation::Equals => target == source,
            SpatialRelation::Touches => target.touches(source),
            SpatialRelation::Overlaps => {
                target.intersection_area(source) > 0.0
                    && !target.contains(source)
                    && !source.contains(target)
            }
            SpatialRelation::Crosses => {
                (is_degenerate(target) || is_degenerate(source))
                    && target.intersects(source)
                    && !target.contains(source)
                    && !source.contains(target)
            }
        }
    }

    fn buffer(&self, geometry: &Envelope, distance: f64) -> Option<Envelope> {
        if distance < 0.0 && (geometry.width() < -2.0 * distance || geometry.height() < -2.0 * distance)
        {
            return None;
        }
        Some(geometry.expand(distance))
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn square(min: f64, max: f64) -> Envelope {
        Envelope::new(min, min, max, max)
    }

    #[test_case(SpatialRelation::Intersects, square(0.0, 2.0), square(1.0, 3.0), true)]
    #[test_case(SpatialRelation::Intersects, square(0.0, 1.0), square(2.0, 3.0), false)]
    #[test_case(SpatialRelation::Disjoint, square(0.0, 1.0), square(2.0, 3.0), true)]
    #[test_case(SpatialRelation::Contains, square(0.0, 10.0), square(2.0, 3.0), true)]
    #[test_case(SpatialRelation::Contains, square(2.0, 3.0), square(0.0, 10.0), false)]
    #[test_case(SpatialRelation::Within, square(2.0, 3.0), square(0.0, 10.0), true)]
    #[test_case(SpatialRelation::Touches, square(0.0, 1.0), square(1.0, 2.0), true)]
    #[test_case(SpatialRelation::Touches, square(0.0, 2.0), square(1.0, 3.0), false)]
    #[test_case(SpatialRelation::Overlaps, square(0.0, 2.0), square(1.0, 3.0), true)]
    #[test_case(SpatialRelation::Overlaps, square(0.0, 10.0), square(1.0, 3.0), false)]
    #[test_case(SpatialRelation::Equals, square(0.0, 1.0), square(0.0, 1.0), true)]
    #[test_case(SpatialRelation::Crosses, Envelope::new(-1.0, 1.0, 5.0, 1.0), square(0.0, 2.0), true)]
    fn envelope_relations(relation: SpatialRelation, target: Envelope, source: Envelope, expected: bool) {
        assert_eq!(EnvelopeEngine.evaluate(relation, &target, &source), expected);
    }

    #[test]
    fn erosion_can_consume_geometry() {
        assert_eq!(EnvelopeEngine.buffer(&square(0.0, 4.0), -1.0), Some(square(1.0, 3.0)));
        assert_eq!(EnvelopeEngine.buffer(&square(0.0, 4.0), -3.0), None);
        assert_eq!(EnvelopeEngine.buffer(&square(0.0, 1.0), 1.0), Some(square(-1.0, 2.0)));
    }
}
