//! Undistortion / rectification lookup tables.
//!
//! A [`RectificationMap`] stores, for every pixel of an ideal pinhole output
//! image, the source coordinates in the original distorted image. Image
//! resampling itself is left to the caller; the tables use `f32` entries in
//! row-major order so they drop straight into common remap routines.

use log::debug;
use nalgebra::{Matrix3, Vector3};

use crate::camera::{CameraModelError, ProjectionModel};

/// Per-pixel source lookup for rectified images.
#[derive(Debug, Clone)]
pub struct RectificationMap {
    width: u32,
    height: u32,
    map_x: Vec<f32>,
    map_y: Vec<f32>,
    valid: Vec<bool>,
}

impl RectificationMap {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major source x-coordinates, one per output pixel.
    pub fn map_x(&self) -> &[f32] {
        &self.map_x
    }

    /// Row-major source y-coordinates, one per output pixel.
    pub fn map_y(&self) -> &[f32] {
        &self.map_y
    }

    /// Source coordinates for output pixel (`x`, `y`), or `None` when the
    /// pixel has no valid preimage in the source image.
    pub fn source(&self, x: u32, y: u32) -> Option<(f32, f32)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize) * (self.width as usize) + x as usize;
        if self.valid[idx] {
            Some((self.map_x[idx], self.map_y[idx]))
        } else {
            None
        }
    }

    /// Number of output pixels with a valid source.
    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }
}

/// Configures and builds a [`RectificationMap`] for a camera model. Focal
/// length, principal point and output size default to the model's nominal
/// values; an optional rotation rectifies toward a different viewing
/// direction (stereo alignment, horizon leveling).
pub struct RectificationMapBuilder {
    focal: Option<(f64, f64)>,
    principal_point: Option<(f64, f64)>,
    output_size: Option<(u32, u32)>,
    rotation: Matrix3<f64>,
}

impl RectificationMapBuilder {
    pub fn new() -> Self {
        RectificationMapBuilder {
            focal: None,
            principal_point: None,
            output_size: None,
            rotation: Matrix3::identity(),
        }
    }

    /// Focal lengths of the ideal output camera.
    pub fn focal(mut self, fx: f64, fy: f64) -> Self {
        self.focal = Some((fx, fy));
        self
    }

    /// Principal point of the ideal output camera.
    pub fn principal_point(mut self, cx: f64, cy: f64) -> Self {
        self.principal_point = Some((cx, cy));
        self
    }

    pub fn output_size(mut self, width: u32, height: u32) -> Self {
        self.output_size = Some((width, height));
        self
    }

    /// Rotation from the source camera frame to the rectified frame.
    pub fn rotation(mut self, rotation: Matrix3<f64>) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn build<M: ProjectionModel + ?Sized>(
        self,
        model: &M,
    ) -> Result<RectificationMap, CameraModelError> {
        let (nominal_fx, nominal_fy, nominal_cx, nominal_cy) = model.nominal_intrinsics();
        let (fx, fy) = self.focal.unwrap_or((nominal_fx, nominal_fy));
        let (width, height) = self
            .output_size
            .unwrap_or((model.image_width(), model.image_height()));
        let (cx, cy) = self.principal_point.unwrap_or((nominal_cx, nominal_cy));

        if fx <= 0.0 || fy <= 0.0 {
            return Err(CameraModelError::InvalidParams(
                "output focal length must be positive".to_string(),
            ));
        }
        if width == 0 || height == 0 {
            return Err(CameraModelError::InvalidParams(
                "output size must be positive".to_string(),
            ));
        }

        // Map rectified rays back into the source camera frame
        let rect_to_cam = self.rotation.transpose();

        let n = (width as usize) * (height as usize);
        let mut map_x = vec![0.0f32; n];
        let mut map_y = vec![0.0f32; n];
        let mut valid = vec![false; n];

        let src_w = model.image_width() as f64;
        let src_h = model.image_height() as f64;
        let mask = model.mask();

        for v in 0..height {
            for u in 0..width {
                let mx = (u as f64 - cx) / fx;
                let my = (v as f64 - cy) / fy;
                let ray = rect_to_cam * Vector3::new(mx, my, 1.0);
                let src = model.space_to_plane(&ray);

                let idx = (v as usize) * (width as usize) + u as usize;
                map_x[idx] = src.x as f32;
                map_y[idx] = src.y as f32;
                valid[idx] = src.x.is_finite()
                    && src.y.is_finite()
                    && src.x >= 0.0
                    && src.y >= 0.0
                    && src.x < src_w
                    && src.y < src_h
                    && mask.contains(src.x, src.y);
            }
        }

        let map = RectificationMap {
            width,
            height,
            map_x,
            map_y,
            valid,
        };
        debug!(
            "rectification map {}x{}: {} of {} pixels valid",
            width,
            height,
            map.valid_count(),
            n
        );
        Ok(map)
    }
}

impl Default for RectificationMapBuilder {
    fn default() -> Self {
        Self::new()
    }
}
