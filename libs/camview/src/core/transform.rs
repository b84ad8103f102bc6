// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Projection from the unit video quad onto the viewport.
//!
//! The quad spans clip space `[-1, 1]²`. The transform scales it so the
//! source keeps its aspect ratio inside the viewport: fitted with margins on
//! one axis (letterbox) or scaled up until both axes are covered, cropping the
//! overflow (zoomed). The quad stays centered in both modes.

/// Drawable size in physical pixels, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub width: i32,
    pub height: i32,
}

impl Viewport {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// Column-major 4x4 matrix, laid out for `glUniformMatrix4fv(.., GL_FALSE, ..)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat4(pub [f32; 16]);

impl Mat4 {
    pub const IDENTITY: Mat4 = Mat4([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    pub fn scale(sx: f32, sy: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.0[0] = sx;
        m.0[5] = sy;
        m
    }

    pub fn as_slice(&self) -> &[f32; 16] {
        &self.0
    }

    /// Apply to a point on the z = 0 plane.
    pub fn transform_point(&self, x: f32, y: f32) -> (f32, f32) {
        let m = &self.0;
        let w = m[3] * x + m[7] * y + m[15];
        let tx = (m[0] * x + m[4] * y + m[12]) / w;
        let ty = (m[1] * x + m[5] * y + m[13]) / w;
        (tx, ty)
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Compute the frame matrix for a viewport and source size.
///
/// Any non-positive dimension yields the identity; callers treat that as
/// "nothing to draw".
pub fn frame_matrix(
    viewport: Viewport,
    source_width: u32,
    source_height: u32,
    zoomed: bool,
) -> Mat4 {
    if viewport.is_empty() || source_width == 0 || source_height == 0 {
        return Mat4::IDENTITY;
    }

    let source_ar = source_width as f64 / source_height as f64;
    let viewport_ar = viewport.width as f64 / viewport.height as f64;

    // Ratio of the quad's natural extent (viewport-shaped) to the aspect-correct one.
    let x_fit = source_ar / viewport_ar;
    let y_fit = viewport_ar / source_ar;

    let (sx, sy) = if zoomed {
        (x_fit.max(1.0), y_fit.max(1.0))
    } else {
        (x_fit.min(1.0), y_fit.min(1.0))
    };

    Mat4::scale(sx as f32, sy as f32)
}

/// Inputs the matrix was last computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TransformInputs {
    viewport: Viewport,
    source: (u32, u32),
    zoomed: bool,
}

/// Cached frame matrix, recomputed only when one of its inputs changes.
#[derive(Debug, Clone)]
pub struct ViewTransform {
    inputs: Option<TransformInputs>,
    matrix: Mat4,
}

impl ViewTransform {
    pub fn new() -> Self {
        Self {
            inputs: None,
            matrix: Mat4::IDENTITY,
        }
    }

    /// Recompute if the inputs changed. Returns true when the matrix was rebuilt.
    pub fn update(
        &mut self,
        viewport: Viewport,
        source_width: u32,
        source_height: u32,
        zoomed: bool,
    ) -> bool {
        let inputs = TransformInputs {
            viewport,
            source: (source_width, source_height),
            zoomed,
        };
        if self.inputs == Some(inputs) {
            return false;
        }
        self.matrix = frame_matrix(viewport, source_width, source_height, zoomed);
        self.inputs = Some(inputs);
        tracing::trace!(
            "ViewTransform: {}x{} source in {}x{} viewport (zoomed={}) -> scale ({:.4}, {:.4})",
            source_width,
            source_height,
            viewport.width,
            viewport.height,
            zoomed,
            self.matrix.0[0],
            self.matrix.0[5]
        );
        true
    }

    /// Force the next [`update`](Self::update) to recompute.
    pub fn invalidate(&mut self) {
        self.inputs = None;
    }

    pub fn matrix(&self) -> &Mat4 {
        &self.matrix
    }

    /// False when the last inputs were degenerate and nothing should be drawn.
    pub fn is_drawable(&self) -> bool {
        match self.inputs {
            Some(inputs) => {
                !inputs.viewport.is_empty() && inputs.source.0 > 0 && inputs.source.1 > 0
            }
            None => false,
        }
    }
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    fn corners(m: &Mat4) -> [(f32, f32); 4] {
        [
            m.transform_point(-1.0, -1.0),
            m.transform_point(1.0, -1.0),
            m.transform_point(1.0, 1.0),
            m.transform_point(-1.0, 1.0),
        ]
    }

    #[test]
    fn letterbox_800x480_with_640x480_source() {
        let m = frame_matrix(Viewport::new(800, 480), 640, 480, false);
        // 640x480 scaled to full height is 640 wide: 80px margins each side.
        let expected_sx = 640.0 / 800.0;
        assert!((m.0[0] - expected_sx).abs() < EPS);
        assert!((m.0[5] - 1.0).abs() < EPS);

        let (left, _) = m.transform_point(-1.0, 0.0);
        let (right, _) = m.transform_point(1.0, 0.0);
        let left_margin_px = (left + 1.0) / 2.0 * 800.0;
        let right_margin_px = (1.0 - right) / 2.0 * 800.0;
        assert!((left_margin_px - 80.0).abs() < 1e-3);
        assert!((right_margin_px - 80.0).abs() < 1e-3);
    }

    #[test]
    fn zoomed_800x480_with_640x480_source() {
        let m = frame_matrix(Viewport::new(800, 480), 640, 480, true);
        assert!((m.0[0] - 1.0).abs() < EPS);
        // 640x480 scaled to 800 wide is 600 tall: 60px cropped top and bottom.
        assert!((m.0[5] - 600.0 / 480.0).abs() < EPS);
    }

    #[test]
    fn matching_aspect_has_no_margin() {
        for zoomed in [false, true] {
            let m = frame_matrix(Viewport::new(1280, 720), 1920, 1080, zoomed);
            assert!(
                (m.0[0] - 1.0).abs() < EPS && (m.0[5] - 1.0).abs() < EPS,
                "zoomed={zoomed}"
            );
        }
    }

    #[test]
    fn degenerate_inputs_yield_identity() {
        assert!(frame_matrix(Viewport::new(0, 480), 640, 480, false).is_identity());
        assert!(frame_matrix(Viewport::new(800, -1), 640, 480, true).is_identity());
        assert!(frame_matrix(Viewport::new(800, 480), 0, 480, false).is_identity());
        assert!(frame_matrix(Viewport::new(800, 480), 640, 0, true).is_identity());
    }

    #[test]
    fn letterbox_never_crops_and_zoom_always_covers() {
        let sizes = [1, 2, 3, 7, 16, 240, 480, 481, 640, 720, 1080, 1920, 4096];
        for &vw in &sizes {
            for &vh in &sizes {
                for &sw in &sizes {
                    for &sh in &sizes {
                        let viewport = Viewport::new(vw, vh);

                        let fit = frame_matrix(viewport, sw as u32, sh as u32, false);
                        for (x, y) in corners(&fit) {
                            assert!(x.abs() <= 1.0 + EPS && y.abs() <= 1.0 + EPS);
                        }
                        // One axis always spans the full viewport.
                        assert!(
                            (fit.0[0] - 1.0).abs() < EPS || (fit.0[5] - 1.0).abs() < EPS,
                            "{vw}x{vh} / {sw}x{sh}"
                        );

                        let fill = frame_matrix(viewport, sw as u32, sh as u32, true);
                        for (x, y) in corners(&fill) {
                            assert!(x.abs() >= 1.0 - EPS && y.abs() >= 1.0 - EPS);
                        }

                        // Both modes preserve the source aspect ratio on screen.
                        for m in [fit, fill] {
                            let on_screen =
                                (m.0[0] as f64 * vw as f64) / (m.0[5] as f64 * vh as f64);
                            let source = sw as f64 / sh as f64;
                            assert!((on_screen - source).abs() / source < 1e-4);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn view_transform_recomputes_only_on_change() {
        let mut t = ViewTransform::new();
        assert!(!t.is_drawable());
        assert!(t.update(Viewport::new(800, 480), 640, 480, false));
        assert!(!t.update(Viewport::new(800, 480), 640, 480, false));
        assert!(t.update(Viewport::new(800, 600), 640, 480, false));
        assert!(t.update(Viewport::new(800, 600), 640, 480, true));
        assert!(t.update(Viewport::new(800, 600), 1280, 720, true));
        assert!(t.is_drawable());

        t.invalidate();
        assert!(t.update(Viewport::new(800, 600), 1280, 720, true));

        assert!(t.update(Viewport::new(0, 600), 1280, 720, true));
        assert!(!t.is_drawable());
        assert!(t.matrix().is_identity());
    }
}
