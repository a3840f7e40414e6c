//! Colors and multi-stop color ramps.

use serde::{Deserialize, Serialize};

use eco_common::IndexKind;

/// Color value in RGBA format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn transparent() -> Self {
        Self::new(0, 0, 0, 0)
    }

    /// Parse `#rrggbb` (the leading `#` is optional) as an opaque color.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim_start_matches('#');
        if hex.len() != 6 {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        Some(Self::new(r, g, b, 255))
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// Linear color interpolation
pub fn interpolate_color(from: Color, to: Color, t: f32) -> Color {
    let t = t.clamp(0.0, 1.0);
    let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
    Color::new(
        mix(from.r, to.r),
        mix(from.g, to.g),
        mix(from.b, to.b),
        mix(from.a, to.a),
    )
}

/// A color at a position in [0, 1] along a ramp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStop {
    pub position: f32,
    pub color: Color,
}

/// Piecewise-linear mapping from [0, 1] to colors.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorRamp {
    stops: Vec<ColorStop>,
}

impl ColorRamp {
    /// Ramp through `colors` at evenly spaced positions.
    ///
    /// Unparseable entries are skipped; fewer than two colors yield `None`.
    pub fn from_hex(colors: &[&str]) -> Option<Self> {
        let parsed: Vec<Color> = colors.iter().filter_map(|c| Color::from_hex(c)).collect();
        if parsed.len() < 2 {
            return None;
        }
        let last = (parsed.len() - 1) as f32;
        let stops = parsed
            .into_iter()
            .enumerate()
            .map(|(i, color)| ColorStop {
                position: i as f32 / last,
                color,
            })
            .collect();
        Some(Self { stops })
    }

    pub fn stops(&self) -> &[ColorStop] {
        &self.stops
    }

    /// The same ramp run backwards.
    pub fn reversed(&self) -> Self {
        let stops = self
            .stops
            .iter()
            .rev()
            .map(|s| ColorStop {
                position: 1.0 - s.position,
                color: s.color,
            })
            .collect();
        Self { stops }
    }

    /// Color at `t`, clamped to [0, 1].
    pub fn color_at(&self, t: f32) -> Color {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let upper = self
            .stops
            .iter()
            .position(|s| s.position >= t)
            .unwrap_or(self.stops.len() - 1);
        if upper == 0 {
            return self.stops[0].color;
        }
        let lo = self.stops[upper - 1];
        let hi = self.stops[upper];
        let span = hi.position - lo.position;
        let local = if span > 0.0 { (t - lo.position) / span } else { 1.0 };
        interpolate_color(lo.color, hi.color, local)
    }
}

/// Built-in ramps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RampName {
    /// Red, yellow, green diverging
    RdYlGn,
    /// Dark red through yellow to dark green
    Ecological,
    Blues,
    /// RdYlGn reversed: high values red
    Heat,
    Grayscale,
}

const RD_YL_GN: [&str; 11] = [
    "#a50026", "#d73027", "#f46d43", "#fdae61", "#fee08b", "#ffffbf", "#d9ef8b", "#a6d96a",
    "#66bd63", "#1a9850", "#006837",
];

const ECOLOGICAL: [&str; 6] = ["#8b0000", "#ff0000", "#ffa500", "#ffff00", "#00ff00", "#006400"];

const BLUES: [&str; 9] = [
    "#f7fbff", "#deebf7", "#c6dbef", "#9ecae1", "#6baed6", "#4292c6", "#2171b5", "#08519c",
    "#08306b",
];

impl RampName {
    pub fn ramp(&self) -> ColorRamp {
        let build = |colors: &[&str]| {
            ColorRamp::from_hex(colors).unwrap_or_else(|| ColorRamp {
                stops: vec![
                    ColorStop {
                        position: 0.0,
                        color: Color::new(0, 0, 0, 255),
                    },
                    ColorStop {
                        position: 1.0,
                        color: Color::new(255, 255, 255, 255),
                    },
                ],
            })
        };
        match self {
            RampName::RdYlGn => build(&RD_YL_GN),
            RampName::Ecological => build(&ECOLOGICAL),
            RampName::Blues => build(&BLUES),
            RampName::Heat => build(&RD_YL_GN).reversed(),
            RampName::Grayscale => build(&["#000000", "#ffffff"]),
        }
    }

    /// Ramp used for `kind` when none is configured.
    pub fn default_for(kind: IndexKind) -> RampName {
        match kind {
            IndexKind::Ndvi | IndexKind::Greenness => RampName::RdYlGn,
            IndexKind::Ndwi | IndexKind::Ndsi | IndexKind::Wetness => RampName::Blues,
            IndexKind::Ndbi | IndexKind::Dryness | IndexKind::Heat => RampName::Heat,
            IndexKind::Rsei => RampName::Ecological,
        }
    }
}
