//! Filtered texture sampling.
//!
//! A sample maps a shading point's texture coordinates and screen-space
//! derivatives to a filtered colour:
//!
//! 1. The derivatives are scaled into level-0 texel units.
//! 2. A level (or pair of per-axis levels) is chosen from the footprint.
//! 3. The texture is read with the requested [`FilterStyle`].
//! 4. [`post_process`] applies invert, luminance alpha and gain/offset.
//!
//! The elliptical style is a Heckbert EWA filter. Its footprint is the
//! image of the pixel under the texture Jacobian, its eccentricity is
//! clamped, and the texel walk is bounded by [`MAX_ELLIPSE_EXTENT`].

use serde::Serialize;

use super::color::Rgba;
use super::image::TextureLookup;
use super::source::{LevelMode, TextureHeader};

// =============================================================================
// Constants
// =============================================================================

/// Floor for squared footprint lengths.
pub const EPSILON: f32 = 1e-6;

/// Distance kept from the last level when clamping a lod.
pub const LEVEL_EPSILON: f32 = 1e-4;

const INV_LN_2: f32 = std::f32::consts::LOG2_E;

/// Mipmap blends below this fraction are skipped.
const MIPMAP_BLEND_THRESHOLD: f32 = 0.005;

/// Entries in the elliptical weight table.
pub const WEIGHT_LUT_SIZE: usize = 1024;

/// Falloff of the Gaussian weight, `exp(-alpha * r^2)`.
const GAUSSIAN_ALPHA: f32 = 2.0;

/// Target half-extent of the ellipse at the chosen level, in texels.
const ELLIPSE_TEXELS: f32 = 2.0;

/// Largest ellipse half-extent walked, in texels of the chosen level.
pub const MAX_ELLIPSE_EXTENT: f32 = 32.0;

/// Filter width that makes the isotropic lod the log2 of the footprint.
pub const DEFAULT_FILTER_WIDTH: f32 = 0.5;

// =============================================================================
// Inputs
// =============================================================================

/// How the texture is read for a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterStyle {
    /// Nearest texel at the selected level
    None,
    /// Bilinear at the selected level
    Box,
    /// Bilinear at two adjacent levels, blended
    #[default]
    Mipmap,
    /// Weighted walk over the footprint ellipse
    Elliptical,
}

/// Texture-space derivatives of a shading point.
///
/// `ds` holds the partials of `s` along screen x and y (the third
/// component, along the ray, only contributes to isotropic footprints);
/// `dt` the same for `t`. Both are in normalised texture units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Derivatives {
    pub ds: [f32; 3],
    pub dt: [f32; 3],
}

impl Derivatives {
    pub fn new(ds: [f32; 3], dt: [f32; 3]) -> Self {
        Self { ds, dt }
    }

    /// Derivatives along screen x and y only.
    pub fn screen(ds_dx: f32, ds_dy: f32, dt_dx: f32, dt_dy: f32) -> Self {
        Self::new([ds_dx, ds_dy, 0.0], [dt_dx, dt_dy, 0.0])
    }

    /// Replace non-finite components with zero.
    fn sanitized(self) -> Self {
        let clean = |v: [f32; 3]| v.map(|c| if c.is_finite() { c } else { 0.0 });
        Self::new(clean(self.ds), clean(self.dt))
    }
}

/// Placement of the texture in uv space, applied before lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvTransform {
    pub repeat: [f32; 2],
    pub offset: [f32; 2],
    pub flip_t: bool,
}

impl Default for UvTransform {
    fn default() -> Self {
        Self {
            repeat: [1.0, 1.0],
            offset: [0.0, 0.0],
            flip_t: false,
        }
    }
}

impl UvTransform {
    pub fn apply(&self, u: f32, v: f32) -> (f32, f32) {
        let s = u * self.repeat[0] + self.offset[0];
        let t = v * self.repeat[1] + self.offset[1];
        (s, if self.flip_t { 1.0 - t } else { t })
    }

    pub fn apply_derivatives(&self, d: &Derivatives) -> Derivatives {
        let t_scale = if self.flip_t {
            -self.repeat[1]
        } else {
            self.repeat[1]
        };
        Derivatives::new(d.ds.map(|c| c * self.repeat[0]), d.dt.map(|c| c * t_scale))
    }
}

/// Per-call sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleParams {
    /// Footprint scale; 0.5 selects the level matching the footprint
    pub filter_width: f32,
    pub transform: UvTransform,
    pub invert: bool,
    pub alpha_is_luminance: bool,
    pub color_gain: [f32; 3],
    pub color_offset: [f32; 3],
    pub alpha_gain: f32,
    pub alpha_offset: f32,
}

impl Default for SampleParams {
    fn default() -> Self {
        Self {
            filter_width: DEFAULT_FILTER_WIDTH,
            transform: UvTransform::default(),
            invert: false,
            alpha_is_luminance: false,
            color_gain: [1.0; 3],
            color_offset: [0.0; 3],
            alpha_gain: 1.0,
            alpha_offset: 0.0,
        }
    }
}

// =============================================================================
// Outputs
// =============================================================================

/// A post-processed sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub color: [f32; 3],
    pub alpha: f32,
    pub transparency: f32,
}

impl Sample {
    /// Transparent black, returned for invalid handles and failed lookups.
    pub const SENTINEL: Sample = Sample {
        color: [0.0; 3],
        alpha: 0.0,
        transparency: 1.0,
    };
}

/// Result of filtering, before post-processing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Filtered {
    pub color: Rgba,
    pub level_x: f32,
    pub level_y: f32,
}

impl Filtered {
    /// The coarser of the two levels, for statistics.
    pub fn level(&self) -> f32 {
        self.level_x.max(self.level_y)
    }
}

/// The EWA footprint at its chosen level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EllipseFootprint {
    pub level_x: u32,
    pub level_y: u32,

    /// Centre in texel coordinates of the level
    pub center: (f32, f32),

    /// Conic `a x² + b xy + c y² = 1`
    pub a: f32,
    pub b: f32,
    pub c: f32,

    /// Half-extents of the walked box, capped at `MAX_ELLIPSE_EXTENT`
    pub extent: (f32, f32),

    /// Whether the minor axis was widened to respect the eccentricity cap
    pub clamped: bool,
}

impl EllipseFootprint {
    /// Inclusive texel bounds `(x0, x1, y0, y1)` of the walk.
    pub fn texel_bounds(&self) -> (i64, i64, i64, i64) {
        let (cx, cy) = self.center;
        let (ex, ey) = self.extent;
        (
            (cx - ex).ceil() as i64,
            (cx + ex).floor() as i64,
            (cy - ey).ceil() as i64,
            (cy + ey).floor() as i64,
        )
    }

    /// Number of texels the walk visits.
    pub fn walk_size(&self) -> usize {
        let (x0, x1, y0, y1) = self.texel_bounds();
        let span = |a: i64, b: i64| b.saturating_sub(a).saturating_add(1).max(0) as usize;
        span(x0, x1).saturating_mul(span(y0, y1))
    }

    /// The same footprint with its centre moved by whole wrap periods, or
    /// pinned next to the image, so the walk stays in `i64` range.
    fn wrapped<T: TextureLookup + ?Sized>(&self, texture: &T) -> Self {
        let (w, h) = texture.level_size(self.level_x, self.level_y);
        let (wrap_s, wrap_t) = texture.wrap_modes();
        let (cx, cy) = self.center;
        Self {
            center: (
                wrap_s.reduce(cx, w, self.extent.0 + 1.0),
                wrap_t.reduce(cy, h, self.extent.1 + 1.0),
            ),
            ..*self
        }
    }

    /// Normalised squared distance from the centre, `< 1` inside.
    #[inline]
    fn radius2(&self, dx: f32, dy: f32) -> f32 {
        self.a * dx * dx + self.b * dx * dy + self.c * dy * dy
    }
}

// =============================================================================
// Level selection
// =============================================================================

#[inline]
fn clamp_lod(lod: f32, levels: u32) -> f32 {
    // min then max: the upper bound is negative for single-level axes
    lod.min(levels as f32 - 1.0 - LEVEL_EPSILON).max(0.0)
}

fn length_squared(v: [f32; 3]) -> f32 {
    v.iter().map(|c| c * c).sum()
}

/// Isotropic per-axis lods for a footprint.
pub fn isotropic_lods(header: &TextureHeader, d: &Derivatives, filter_width: f32) -> (f32, f32) {
    let d = d.sanitized();
    let ds = d.ds.map(|c| c * header.width as f32);
    let dt = d.dt.map(|c| c * header.height as f32);

    let j = length_squared(ds).max(length_squared(dt)).max(EPSILON);
    let lod = filter_width * j.ln() * INV_LN_2;
    (
        clamp_lod(lod, header.levels_x),
        clamp_lod(lod, header.levels_y),
    )
}

// =============================================================================
// Sampler
// =============================================================================

/// Stateless filter kernels plus the elliptical weight table.
#[derive(Debug, Clone)]
pub struct Sampler {
    max_eccentricity: f32,
    weights: Box<[f32]>,
}

impl Sampler {
    pub fn new(max_eccentricity: f32) -> Self {
        let last = (WEIGHT_LUT_SIZE - 1) as f32;
        let weights = (0..WEIGHT_LUT_SIZE)
            .map(|i| (-GAUSSIAN_ALPHA * i as f32 / last).exp())
            .collect();
        Self {
            max_eccentricity: max_eccentricity.max(1.0),
            weights,
        }
    }

    pub fn max_eccentricity(&self) -> f32 {
        self.max_eccentricity
    }

    #[inline]
    fn weight(&self, r2: f32) -> f32 {
        let index = (r2 * (WEIGHT_LUT_SIZE - 1) as f32) as usize;
        self.weights[index.min(WEIGHT_LUT_SIZE - 1)]
    }

    /// Filter `texture` at `(u, v)`.
    pub fn filter<T: TextureLookup + ?Sized>(
        &self,
        texture: &T,
        u: f32,
        v: f32,
        derivatives: &Derivatives,
        style: FilterStyle,
        filter_width: f32,
    ) -> Filtered {
        let header = texture.header();

        if style == FilterStyle::Elliptical {
            let footprint = self.ellipse(header, u, v, derivatives, filter_width);
            let color = self.walk(texture, &footprint, u, v);
            return Filtered {
                color,
                level_x: footprint.level_x as f32,
                level_y: footprint.level_y as f32,
            };
        }

        let (lod_x, lod_y) = isotropic_lods(header, derivatives, filter_width);
        let (lx, ly) = (lod_x as u32, lod_y as u32);

        let color = match style {
            FilterStyle::None => texture.texel(u, v, lx, ly),
            FilterStyle::Box => texture.blur(u, v, lx, ly),
            _ => {
                let near = texture.blur(u, v, lx, ly);
                let lod = lod_x.max(lod_y);
                let frac = lod - lod.floor();
                let next = (
                    (lx + 1).min(header.levels_x - 1),
                    (ly + 1).min(header.levels_y - 1),
                );
                if frac > MIPMAP_BLEND_THRESHOLD && next != (lx, ly) {
                    near.lerp(texture.blur(u, v, next.0, next.1), frac)
                } else {
                    near
                }
            }
        };

        Filtered {
            color,
            level_x: lod_x,
            level_y: lod_y,
        }
    }

    /// Build the clamped EWA footprint for a sample.
    ///
    /// RIP sources pick a level per axis. MIP sources start at the finer
    /// axis's level and move to coarser levels until the ellipse fits in
    /// [`MAX_ELLIPSE_EXTENT`]; the cap only truncates at the last level.
    pub fn ellipse(
        &self,
        header: &TextureHeader,
        u: f32,
        v: f32,
        derivatives: &Derivatives,
        filter_width: f32,
    ) -> EllipseFootprint {
        let d = derivatives.sanitized();
        let (w, h) = (header.width as f32, header.height as f32);
        let scale = 2.0 * filter_width;

        // Images of the screen x and y unit vectors in texel space
        let e0 = (d.ds[0] * w * scale, d.dt[0] * h * scale);
        let e1 = (d.ds[1] * w * scale, d.dt[1] * h * scale);

        // Covariance of the footprint
        let mut qa = e0.0 * e0.0 + e1.0 * e1.0;
        let mut qb = e0.0 * e0.1 + e1.0 * e1.1;
        let mut qc = e0.1 * e0.1 + e1.1 * e1.1;

        let mean = 0.5 * (qa + qc);
        let root = (0.25 * (qa - qc) * (qa - qc) + qb * qb).sqrt();
        let major = mean + root;
        let minor = (mean - root).max(0.0);

        let min_minor = major / (self.max_eccentricity * self.max_eccentricity);
        let clamped = minor < min_minor;
        if clamped {
            let (vx, vy) = minor_axis(qa, qb, qc, minor);
            let delta = min_minor - minor;
            qa += delta * vx * vx;
            qb += delta * vx * vy;
            qc += delta * vy * vy;
        }

        let lod_x = clamp_lod(
            0.5 * qa.max(EPSILON).log2() - ELLIPSE_TEXELS.log2(),
            header.levels_x,
        );
        let lod_y = clamp_lod(
            0.5 * qc.max(EPSILON).log2() - ELLIPSE_TEXELS.log2(),
            header.levels_y,
        );
        // Rescale to a level and add a unit reconstruction filter
        let at_level = |level_x: u32, level_y: u32| {
            let (rx, ry) = header.resolve_level(level_x, level_y);
            let (lw, lh) = (header.level_width(rx) as f32, header.level_height(ry) as f32);
            let (sx, sy) = (lw / w, lh / h);
            (
                (qa * sx * sx + 1.0, qb * sx * sy, qc * sy * sy + 1.0),
                (lw, lh),
            )
        };
        let fits = |(qa, _, qc): (f32, f32, f32)| {
            qa.sqrt() <= MAX_ELLIPSE_EXTENT && qc.sqrt() <= MAX_ELLIPSE_EXTENT
        };

        let (level_x, level_y) = match header.level_mode {
            LevelMode::RipMap => (lod_x as u32, lod_y as u32),
            LevelMode::MipMap => {
                // The finer axis sets the level unless the major axis would
                // not fit the walk there
                let last = header.levels_x.min(header.levels_y).saturating_sub(1);
                let mut l = (lod_x.min(lod_y) as u32).min(last);
                while l < last && !fits(at_level(l, l).0) {
                    l += 1;
                }
                (l, l)
            }
            LevelMode::One => (0, 0),
        };
        let ((qa, qb, qc), (lw, lh)) = at_level(level_x, level_y);

        let det = qa * qc - qb * qb;
        let inv_det = 1.0 / det.max(EPSILON);

        EllipseFootprint {
            level_x,
            level_y,
            center: (u * lw - 0.5, v * lh - 0.5),
            a: qc * inv_det,
            b: -2.0 * qb * inv_det,
            c: qa * inv_det,
            extent: (
                qa.sqrt().min(MAX_ELLIPSE_EXTENT),
                qc.sqrt().min(MAX_ELLIPSE_EXTENT),
            ),
            clamped,
        }
    }

    /// Weighted average of the texels inside the footprint.
    fn walk<T: TextureLookup + ?Sized>(
        &self,
        texture: &T,
        footprint: &EllipseFootprint,
        u: f32,
        v: f32,
    ) -> Rgba {
        let footprint = footprint.wrapped(texture);
        let (x0, x1, y0, y1) = footprint.texel_bounds();
        let (cx, cy) = footprint.center;

        let mut sum = Rgba::ZERO;
        let mut total = 0.0f32;
        for y in y0..=y1 {
            let dy = y as f32 - cy;
            for x in x0..=x1 {
                let dx = x as f32 - cx;
                let r2 = footprint.radius2(dx, dy);
                if r2 < 1.0 {
                    let weight = self.weight(r2);
                    sum += texture.texel_at(x, y, footprint.level_x, footprint.level_y) * weight;
                    total += weight;
                }
            }
        }

        if total > 0.0 {
            sum * (1.0 / total)
        } else {
            texture.blur(u, v, footprint.level_x, footprint.level_y)
        }
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_ECCENTRICITY)
    }
}

/// Unit eigenvector of the symmetric matrix `[qa qb; qb qc]` for `minor`.
fn minor_axis(qa: f32, qb: f32, qc: f32, minor: f32) -> (f32, f32) {
    let (vx, vy) = (qb, minor - qa);
    let norm = (vx * vx + vy * vy).sqrt();
    if norm > 1e-12 {
        (vx / norm, vy / norm)
    } else if qa <= qc {
        (1.0, 0.0)
    } else {
        (0.0, 1.0)
    }
}

// =============================================================================
// Post-processing
// =============================================================================

/// Apply invert, luminance alpha and gain/offset.
pub fn post_process(color: Rgba, has_alpha: bool, params: &SampleParams) -> Sample {
    let mut c = color;
    if params.invert {
        c = Rgba::new(1.0 - c.r, 1.0 - c.g, 1.0 - c.b, 1.0 - c.a);
    }
    if params.alpha_is_luminance || !has_alpha {
        c.a = c.luminance();
    }

    let gain = params.color_gain;
    let offset = params.color_offset;
    let out = [
        offset[0] + c.r * gain[0],
        offset[1] + c.g * gain[1],
        offset[2] + c.b * gain[2],
    ];

    let alpha = if has_alpha || params.alpha_is_luminance {
        params.alpha_offset + c.a * params.alpha_gain
    } else {
        c.a
    };

    Sample {
        color: out,
        alpha,
        transparency: 1.0 - alpha,
    }
}
