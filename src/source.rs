//! Source entities produced by detection or supplied from external catalogs.

use serde::{Deserialize, Serialize};

use crate::cube::SpatialWcs;

/// A compact astronomical source on the cube's spatial grid.
///
/// Positions are fractional pixel coordinates; the extent is an isophotal
/// ellipse (semi-axes in pixels plus position angle). Sources are immutable
/// after creation and are identified by a stable numeric id that downstream
/// stages carry through extraction and redshift fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Stable identifier, unique within one detection run or catalog.
    pub id: u32,
    /// Centroid column coordinate, fractional pixels.
    pub x: f64,
    /// Centroid row coordinate, fractional pixels.
    pub y: f64,
    /// Semi-major axis of the extent ellipse, pixels.
    pub a: f64,
    /// Semi-minor axis of the extent ellipse, pixels.
    pub b: f64,
    /// Position angle of the semi-major axis, radians counterclockwise from
    /// the +x axis.
    pub theta: f64,
    /// Detection significance (signal over noise); zero for catalog sources
    /// with no measured significance.
    pub significance: f64,
}

impl Source {
    /// Circular source of radius `radius` pixels.
    pub fn circular(id: u32, x: f64, y: f64, radius: f64) -> Self {
        Self {
            id,
            x,
            y,
            a: radius,
            b: radius,
            theta: 0.0,
            significance: 0.0,
        }
    }
}

/// One entry of an externally supplied catalog, positions in world
/// coordinates (degrees).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Right ascension, degrees.
    pub ra: f64,
    /// Declination, degrees.
    pub dec: f64,
    /// Semi-major axis, pixels. Falls back to `default_radius` when absent.
    #[serde(default)]
    pub a: Option<f64>,
    /// Semi-minor axis, pixels.
    #[serde(default)]
    pub b: Option<f64>,
    /// Position angle, radians.
    #[serde(default)]
    pub theta: Option<f64>,
}

/// Convert catalog entries to pixel-coordinate sources, bypassing detection.
///
/// Entries keep their catalog order; ids are assigned sequentially from zero.
/// Missing extents fall back to a circle of `default_radius` pixels.
pub fn from_catalog_positions(
    wcs: &SpatialWcs,
    entries: &[CatalogEntry],
    default_radius: f64,
) -> Vec<Source> {
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let (x, y) = wcs.world_to_pixel(entry.ra, entry.dec);
            let a = entry.a.unwrap_or(default_radius);
            Source {
                id: i as u32,
                x,
                y,
                a,
                b: entry.b.unwrap_or(a),
                theta: entry.theta.unwrap_or(0.0),
                significance: 0.0,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_circular_source() {
        let src = Source::circular(7, 10.5, 20.25, 3.0);
        assert_eq!(src.id, 7);
        assert_relative_eq!(src.a, 3.0);
        assert_relative_eq!(src.b, 3.0);
        assert_relative_eq!(src.theta, 0.0);
    }

    #[test]
    fn test_catalog_conversion_assigns_sequential_ids() {
        let wcs = SpatialWcs {
            crpix: [5.0, 5.0],
            crval: [150.0, 2.0],
            cdelt: [1e-4, 1e-4],
        };
        let entries = vec![
            CatalogEntry {
                ra: 150.0,
                dec: 2.0,
                a: Some(2.5),
                b: Some(1.5),
                theta: Some(0.3),
            },
            CatalogEntry {
                ra: 150.0005,
                dec: 2.0,
                a: None,
                b: None,
                theta: None,
            },
        ];
        let sources = from_catalog_positions(&wcs, &entries, 2.0);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].id, 0);
        assert_eq!(sources[1].id, 1);

        assert_relative_eq!(sources[0].x, 5.0, epsilon = 1e-9);
        assert_relative_eq!(sources[0].y, 5.0, epsilon = 1e-9);
        assert_relative_eq!(sources[0].b, 1.5);

        // Missing extent becomes the default circle.
        assert_relative_eq!(sources[1].x, 10.0, epsilon = 1e-9);
        assert_relative_eq!(sources[1].a, 2.0);
        assert_relative_eq!(sources[1].b, 2.0);
    }
}
