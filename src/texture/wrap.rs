//! Texture coordinate wrap policies.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// How integer texel coordinates outside `[0, dim)` are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WrapMode {
    /// Clamp into `[0, dim - 1]`
    #[default]
    Clamp,
    /// Repeat with period `dim`
    Periodic,
    /// Mirrored repeat with period `2 * dim`. Edge texels are duplicated
    /// at each reflection, so `-1` maps to `0` and `dim` to `dim - 1`.
    Mirror,
    /// Transparent black outside the image
    Black,
}

/// Wrap modes a caller may force at open time, overriding the file's hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForcedWrap {
    Periodic,
    Mirror,
}

impl From<ForcedWrap> for WrapMode {
    fn from(forced: ForcedWrap) -> Self {
        match forced {
            ForcedWrap::Periodic => WrapMode::Periodic,
            ForcedWrap::Mirror => WrapMode::Mirror,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownWrapMode(pub String);

impl fmt::Display for UnknownWrapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown wrap mode '{}'", self.0)
    }
}

impl std::error::Error for UnknownWrapMode {}

impl FromStr for WrapMode {
    type Err = UnknownWrapMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clamp" => Ok(WrapMode::Clamp),
            "periodic" => Ok(WrapMode::Periodic),
            "mirror" => Ok(WrapMode::Mirror),
            "black" => Ok(WrapMode::Black),
            _ => Err(UnknownWrapMode(s.trim().to_string())),
        }
    }
}

impl WrapMode {
    /// Resolve `coord` against a dimension of `dim` texels.
    ///
    /// Returns `None` for `Black` outside the image.
    #[inline]
    pub fn apply(self, coord: i64, dim: u32) -> Option<u32> {
        let dim = i64::from(dim.max(1));
        let resolved = match self {
            WrapMode::Clamp => coord.clamp(0, dim - 1),
            WrapMode::Periodic => coord.rem_euclid(dim),
            WrapMode::Mirror => {
                let m = coord.rem_euclid(2 * dim);
                if m < dim {
                    m
                } else {
                    2 * dim - 1 - m
                }
            }
            WrapMode::Black => {
                if !(0..dim).contains(&coord) {
                    return None;
                }
                coord
            }
        };
        Some(resolved as u32)
    }

    /// Bring a continuous texel coordinate into a range where casting to
    /// `i64` cannot overflow, without changing which texels `apply`
    /// resolves for lookups up to `reach` texels away from it.
    ///
    /// Periodic and mirror coordinates are reduced by whole periods of
    /// `2 * dim`; clamp and black coordinates are pinned just past the
    /// edges.
    #[inline]
    pub fn reduce(self, coord: f32, dim: u32, reach: f32) -> f32 {
        let dim = dim.max(1) as f32;
        match self {
            WrapMode::Periodic | WrapMode::Mirror => {
                let period = 2.0 * dim;
                if (-period..2.0 * period).contains(&coord) {
                    coord
                } else {
                    coord.rem_euclid(period)
                }
            }
            WrapMode::Clamp | WrapMode::Black => coord.clamp(-1.0 - reach, dim + 1.0 + reach),
        }
    }
}

/// Parse a per-axis wrap hint such as `"periodic,clamp"`.
///
/// A single value applies to both axes. A missing or malformed hint
/// yields clamp on both axes.
pub fn parse_wrap_hint(hint: Option<&str>) -> (WrapMode, WrapMode) {
    let Some(hint) = hint else {
        return (WrapMode::Clamp, WrapMode::Clamp);
    };

    let parts: Vec<&str> = hint.split(',').collect();
    let parsed = match parts.as_slice() {
        [both] => both.parse().map(|m| (m, m)),
        [s, t] => s.parse().and_then(|s| Ok((s, t.parse()?))),
        _ => Err(UnknownWrapMode(hint.to_string())),
    };
    parsed.unwrap_or((WrapMode::Clamp, WrapMode::Clamp))
}
