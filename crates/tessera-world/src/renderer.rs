//! Entity visuals.
//!
//! A renderer is data describing how its entity is drawn; drawing itself is
//! done by the application through its own renderer implementation.

use glam::DVec2;
use tessera_net::{ByteReader, ByteWriter, DecodeError, EncodeError};

use crate::entity::{Shape, read_vec2, write_vec2};

/// Built-in renderer kind identifiers. Game-defined kinds use low positive
/// integers.
pub mod kind {
    /// Draws nothing.
    pub const NONE: i32 = i32::MAX;
    /// Solid-colored polygon.
    pub const POLY_COLOR: i32 = i32::MAX - 1;
    /// Image-textured polygon.
    pub const POLY_IMAGE: i32 = i32::MAX - 2;
    /// Solid-colored circle.
    pub const CIRCLE_COLOR: i32 = i32::MAX - 3;
}

/// RGB color with components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Color {
    pub const fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    fn decode(r: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let red = r.read_f64()?;
        let green = r.read_f64()?;
        let blue = r.read_f64()?;
        Ok(Self::new(red, green, blue))
    }

    fn encode(self, w: &mut ByteWriter) {
        w.write_f64(self.r);
        w.write_f64(self.g);
        w.write_f64(self.b);
    }
}

/// Visual behavior of an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Renderer {
    /// Draws nothing.
    None,
    /// Fills the polygon with `color`, scaled by `scale`.
    PolyColor { scale: f64, color: Color },
    /// Draws the image `resource` clipped to the polygon.
    PolyImage {
        offset: DVec2,
        width: f64,
        height: f64,
        flip: bool,
        resource: String,
    },
    /// Fills the circle with `color`.
    CircleColor { color: Color },
    /// Game-defined renderer decoded by a registered renderer decoder.
    Custom { kind: i32, params: Vec<f64> },
}

impl Renderer {
    /// Renderer kind identifier.
    pub fn kind(&self) -> i32 {
        match self {
            Renderer::None => kind::NONE,
            Renderer::PolyColor { .. } => kind::POLY_COLOR,
            Renderer::PolyImage { .. } => kind::POLY_IMAGE,
            Renderer::CircleColor { .. } => kind::CIRCLE_COLOR,
            Renderer::Custom { kind, .. } => *kind,
        }
    }

    /// Write `[kind][payload]` for the built-in renderers.
    pub fn encode(&self, w: &mut ByteWriter) -> Result<(), EncodeError> {
        w.write_i32(self.kind());
        match self {
            Renderer::None => {}
            Renderer::PolyColor { scale, color } => {
                w.write_f64(*scale);
                color.encode(w);
            }
            Renderer::PolyImage {
                offset,
                width,
                height,
                flip,
                resource,
            } => {
                write_vec2(w, *offset);
                w.write_f64(*width);
                w.write_f64(*height);
                w.write_bool(*flip);
                w.write_str(resource)?;
            }
            Renderer::CircleColor { color } => color.encode(w),
            Renderer::Custom { kind, .. } => {
                return Err(EncodeError::Unsupported(format!("custom renderer kind {kind}")));
            }
        }
        Ok(())
    }
}

fn require_polygon(host: &Shape, renderer: &str) -> Result<(), DecodeError> {
    match host {
        Shape::Polygon(_) => Ok(()),
        other => Err(DecodeError::malformed(format!(
            "{renderer} renderer on non-polygon entity kind {}",
            other.kind()
        ))),
    }
}

pub fn decode_none(_: &mut ByteReader<'_>, _: &Shape) -> Result<Renderer, DecodeError> {
    Ok(Renderer::None)
}

/// `f64 scale, f64 r, f64 g, f64 b`
pub fn decode_poly_color(r: &mut ByteReader<'_>, host: &Shape) -> Result<Renderer, DecodeError> {
    require_polygon(host, "poly-color")?;
    let scale = r.read_f64()?;
    let color = Color::decode(r)?;
    Ok(Renderer::PolyColor { scale, color })
}

/// `f64 offX, f64 offY, f64 width, f64 height, bool flip, string key`
pub fn decode_poly_image(r: &mut ByteReader<'_>, host: &Shape) -> Result<Renderer, DecodeError> {
    require_polygon(host, "poly-image")?;
    let offset = read_vec2(r)?;
    let width = r.read_f64()?;
    let height = r.read_f64()?;
    let flip = r.read_bool()?;
    let resource = r.read_str()?;
    Ok(Renderer::PolyImage {
        offset,
        width,
        height,
        flip,
        resource,
    })
}

/// `f64 r, f64 g, f64 b`
pub fn decode_circle_color(r: &mut ByteReader<'_>, host: &Shape) -> Result<Renderer, DecodeError> {
    if !matches!(host, Shape::Circle { .. }) {
        return Err(DecodeError::malformed(format!(
            "circle-color renderer on non-circle entity kind {}",
            host.kind()
        )));
    }
    Ok(Renderer::CircleColor {
        color: Color::decode(r)?,
    })
}
