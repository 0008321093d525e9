use std::ops::{Add, AddAssign, Mul};

use serde::Serialize;

/// A linear RGBA value with straight (non-premultiplied) alpha.
///
/// This is both the texel type stored in tile buffers and the type of a
/// filtered sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    /// Transparent black, the sample returned for every failure.
    pub const ZERO: Rgba = Rgba::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn grey(v: f32, a: f32) -> Self {
        Self::new(v, v, v, a)
    }

    /// Linear interpolation, `t = 0` gives `self`.
    #[inline]
    pub fn lerp(self, other: Rgba, t: f32) -> Rgba {
        self * (1.0 - t) + other * t
    }

    /// Mean of the colour channels.
    #[inline]
    pub fn luminance(self) -> f32 {
        (self.r + self.g + self.b) / 3.0
    }
}

impl Add for Rgba {
    type Output = Rgba;

    #[inline]
    fn add(self, rhs: Rgba) -> Rgba {
        Rgba::new(self.r + rhs.r, self.g + rhs.g, self.b + rhs.b, self.a + rhs.a)
    }
}

impl AddAssign for Rgba {
    #[inline]
    fn add_assign(&mut self, rhs: Rgba) {
        *self = *self + rhs;
    }
}

impl Mul<f32> for Rgba {
    type Output = Rgba;

    #[inline]
    fn mul(self, rhs: f32) -> Rgba {
        Rgba::new(self.r * rhs, self.g * rhs, self.b * rhs, self.a * rhs)
    }
}
