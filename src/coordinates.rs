//! Coordinate maps: affine transforms between the grid-index domain and
//! the external (Cartesian or geographic) model domain (spec §4.10).
//!
//! Grounded on the teacher's `math::Vec2`/`IntRect` plain-data affine-style
//! helpers (small `Copy` structs of `f64`/`i32` components with free
//! functions rather than heavyweight geometry types).

use crate::error::{GvrsError, Result};

/// Coordinate system tag stored in the header (spec §6: "2 = geographic").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateSystem {
    Cartesian,
    Geographic,
}

impl CoordinateSystem {
    pub fn code(self) -> u8 {
        match self {
            CoordinateSystem::Cartesian => 0,
            CoordinateSystem::Geographic => 2,
        }
    }

    pub fn from_code(code: u8) -> Self {
        if code == 2 { CoordinateSystem::Geographic } else { CoordinateSystem::Cartesian }
    }
}

/// A 2-D affine transform `x' = a00*x + a01*y + a02`, `y' = a10*x + a11*y + a12`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub a00: f64, pub a01: f64, pub a02: f64,
    pub a10: f64, pub a11: f64, pub a12: f64,
}

impl AffineTransform {
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (self.a00 * x + self.a01 * y + self.a02, self.a10 * x + self.a11 * y + self.a12)
    }

    pub fn to_array(self) -> [f64; 6] {
        [self.a00, self.a01, self.a02, self.a10, self.a11, self.a12]
    }

    pub fn from_array(a: [f64; 6]) -> Self {
        AffineTransform { a00: a[0], a01: a[1], a02: a[2], a10: a[3], a11: a[4], a12: a[5] }
    }

    /// The affine transform mapping raster (col, row) to model (x, y) such
    /// that the raster's bounding extent `[x0,y0]..[x1,y1]` is spanned
    /// exactly over `n_cols x n_rows` cells.
    pub fn raster_to_model(n_rows: usize, n_cols: usize, x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        let cell_size_x = (x1 - x0) / n_cols as f64;
        let cell_size_y = (y1 - y0) / n_rows as f64;
        AffineTransform {
            a00: cell_size_x, a01: 0.0, a02: x0,
            a10: 0.0, a11: -cell_size_y, a12: y1,
        }
    }

    /// Analytic inverse, used to derive `model_to_raster` from
    /// `raster_to_model` (or vice versa) when only one is supplied.
    pub fn invert(&self) -> Result<Self> {
        let det = self.a00 * self.a11 - self.a01 * self.a10;
        if det.abs() < 1e-300 {
            return Err(GvrsError::BadRasterSpecification("affine transform is not invertible".into()));
        }

        let a00 = self.a11 / det;
        let a01 = -self.a01 / det;
        let a10 = -self.a10 / det;
        let a11 = self.a00 / det;
        let a02 = -(a00 * self.a02 + a01 * self.a12);
        let a12 = -(a10 * self.a02 + a11 * self.a12);

        Ok(AffineTransform { a00, a01, a02, a10, a11, a12 })
    }
}

/// Grid/model coordinate mapping plus longitude-wrap handling for
/// geographic rasters (spec §4.10).
#[derive(Debug, Clone, Copy)]
pub struct CoordinateMaps {
    pub system: CoordinateSystem,
    pub model_to_raster: AffineTransform,
    pub raster_to_model: AffineTransform,
    /// True when the column span is within 1e-9 of 360 degrees, so
    /// adjacent columns at the seam should be treated as identical.
    pub geo_wraps: bool,
}

impl CoordinateMaps {
    pub fn new(system: CoordinateSystem, raster_to_model: AffineTransform, x0: f64, x1: f64) -> Result<Self> {
        let model_to_raster = raster_to_model.invert()?;
        let geo_wraps = system == CoordinateSystem::Geographic && ((x1 - x0).abs() - 360.0).abs() < 1e-9;
        Ok(CoordinateMaps { system, model_to_raster, raster_to_model, geo_wraps })
    }

    /// Maps a (col, row) grid position to a model (x, y) position.
    pub fn grid_to_model(&self, col: f64, row: f64) -> (f64, f64) {
        let (x, y) = self.raster_to_model.apply(col, row);
        if self.system == CoordinateSystem::Geographic { (normalize_longitude(x), y) } else { (x, y) }
    }

    /// Maps a model (x, y) position to a (col, row) grid position.
    pub fn model_to_grid(&self, x: f64, y: f64) -> (f64, f64) {
        let x = if self.system == CoordinateSystem::Geographic { normalize_longitude(x) } else { x };
        self.model_to_raster.apply(x, y)
    }
}

/// Normalizes a longitude into `[-180, 180)` via mod-360 (spec §4.10).
pub fn normalize_longitude(lon: f64) -> f64 {
    let wrapped = lon.rem_euclid(360.0);
    if wrapped >= 180.0 { wrapped - 360.0 } else { wrapped }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn affine_round_trips_through_inverse() {
        let r2m = AffineTransform::raster_to_model(10, 20, 0.0, 0.0, 20.0, 10.0);
        let m2r = r2m.invert().unwrap();

        let (x, y) = r2m.apply(5.0, 3.0);
        let (col, row) = m2r.apply(x, y);
        assert!((col - 5.0).abs() < 1e-9);
        assert!((row - 3.0).abs() < 1e-9);
    }

    #[test]
    fn longitude_normalizes_into_bracket() {
        assert!((normalize_longitude(190.0) - (-170.0)).abs() < 1e-9);
        assert!((normalize_longitude(-190.0) - 170.0).abs() < 1e-9);
        assert!((normalize_longitude(0.0)).abs() < 1e-9);
        assert!((normalize_longitude(180.0) - (-180.0)).abs() < 1e-9);
    }

    #[test]
    fn full_globe_column_span_sets_geo_wraps() {
        let r2m = AffineTransform::raster_to_model(180, 360, -180.0, -90.0, 180.0, 90.0);
        let maps = CoordinateMaps::new(CoordinateSystem::Geographic, r2m, -180.0, 180.0).unwrap();
        assert!(maps.geo_wraps);
    }

    #[test]
    fn regional_extent_does_not_wrap() {
        let r2m = AffineTransform::raster_to_model(10, 10, 0.0, 0.0, 10.0, 10.0);
        let maps = CoordinateMaps::new(CoordinateSystem::Geographic, r2m, 0.0, 10.0).unwrap();
        assert!(!maps.geo_wraps);
    }

    #[test]
    fn singular_transform_is_rejected() {
        let degenerate = AffineTransform { a00: 0.0, a01: 0.0, a02: 0.0, a10: 0.0, a11: 0.0, a12: 0.0 };
        assert!(degenerate.invert().is_err());
    }
}
