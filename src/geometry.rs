use geo_types::{LineString, Point, Polygon};

use crate::errors::{Result, VmapError};

/// Geometry of a single map element.
///
/// Values are independent copies of the engine state at the map version they
/// were read at. They are never updated when the map changes, so holding one
/// across a structural change yields stale, not dangling, data.
#[derive(Clone, Debug, PartialEq)]
pub enum Geometry {
    Point(Point<f64>),
    Line(LineString<f64>),
    Polygon(Polygon<f64>),
}

impl Geometry {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::Line(_) => "LineString",
            Geometry::Polygon(_) => "Polygon",
        }
    }

    pub fn as_point(&self) -> Option<&Point<f64>> {
        match self {
            Geometry::Point(point) => Some(point),
            _ => None,
        }
    }

    pub fn as_line(&self) -> Option<&LineString<f64>> {
        match self {
            Geometry::Line(line) => Some(line),
            _ => None,
        }
    }

    pub fn as_polygon(&self) -> Option<&Polygon<f64>> {
        match self {
            Geometry::Polygon(polygon) => Some(polygon),
            _ => None,
        }
    }

    /// Number of vertices, rings included.
    pub fn vertex_count(&self) -> usize {
        match self {
            Geometry::Point(_) => 1,
            Geometry::Line(line) => line.0.len(),
            Geometry::Polygon(polygon) => {
                polygon.exterior().0.len()
                    + polygon
                        .interiors()
                        .iter()
                        .map(|ring| ring.0.len())
                        .sum::<usize>()
            }
        }
    }
}

impl From<Point<f64>> for Geometry {
    fn from(point: Point<f64>) -> Self {
        Geometry::Point(point)
    }
}

impl From<LineString<f64>> for Geometry {
    fn from(line: LineString<f64>) -> Self {
        Geometry::Line(line)
    }
}

impl From<Polygon<f64>> for Geometry {
    fn from(polygon: Polygon<f64>) -> Self {
        Geometry::Polygon(polygon)
    }
}

impl From<Geometry> for geo_types::Geometry<f64> {
    fn from(geometry: Geometry) -> geo_types::Geometry<f64> {
        match geometry {
            Geometry::Point(point) => geo_types::Geometry::Point(point),
            Geometry::Line(line) => geo_types::Geometry::LineString(line),
            Geometry::Polygon(polygon) => geo_types::Geometry::Polygon(polygon),
        }
    }
}

impl TryFrom<geo_types::Geometry<f64>> for Geometry {
    type Error = VmapError;

    fn try_from(geometry: geo_types::Geometry<f64>) -> Result<Geometry> {
        match geometry {
            geo_types::Geometry::Point(point) => Ok(Geometry::Point(point)),
            geo_types::Geometry::LineString(line) => Ok(Geometry::Line(line)),
            geo_types::Geometry::Line(line) => Ok(Geometry::Line(LineString::from(vec![
                line.start, line.end,
            ]))),
            geo_types::Geometry::Polygon(polygon) => Ok(Geometry::Polygon(polygon)),
            geo_types::Geometry::Rect(rect) => Ok(Geometry::Polygon(rect.to_polygon())),
            geo_types::Geometry::Triangle(triangle) => {
                Ok(Geometry::Polygon(triangle.to_polygon()))
            }
            geo_types::Geometry::MultiPoint(_) => Err(VmapError::UnsupportedGeometry("MultiPoint")),
            geo_types::Geometry::MultiLineString(_) => {
                Err(VmapError::UnsupportedGeometry("MultiLineString"))
            }
            geo_types::Geometry::MultiPolygon(_) => {
                Err(VmapError::UnsupportedGeometry("MultiPolygon"))
            }
            geo_types::Geometry::GeometryCollection(_) => {
                Err(VmapError::UnsupportedGeometry("GeometryCollection"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use geo_types::{coord, line_string, point, polygon, Rect};

    use super::*;

    #[test]
    fn test_geo_types_conversion() {
        let line: Geometry = line_string![(x: 0., y: 0.), (x: 1., y: 1.)].into();
        assert_eq!(line.kind_name(), "LineString");
        let geo: geo_types::Geometry<f64> = line.clone().into();
        assert_eq!(Geometry::try_from(geo).unwrap(), line);

        let rect = Rect::new(coord! { x: 0., y: 0. }, coord! { x: 2., y: 2. });
        let polygon = Geometry::try_from(geo_types::Geometry::Rect(rect)).unwrap();
        assert_eq!(polygon.kind_name(), "Polygon");
    }

    #[test]
    fn test_multi_geometry_rejected() {
        let multi = geo_types::Geometry::MultiPoint(vec![point!(x: 1., y: 2.)].into());
        assert_eq!(
            Geometry::try_from(multi),
            Err(VmapError::UnsupportedGeometry("MultiPoint"))
        );
    }

    #[test]
    fn test_vertex_count() {
        let square: Geometry = polygon![
            (x: 0., y: 0.),
            (x: 4., y: 0.),
            (x: 4., y: 4.),
            (x: 0., y: 4.),
        ]
        .into();
        // closed exterior ring
        assert_eq!(square.vertex_count(), 5);
        assert_eq!(Geometry::from(point!(x: 1., y: 1.)).vertex_count(), 1);
        assert!(square.as_polygon().is_some());
        assert!(square.as_line().is_none());
    }
}
