//! Mirrored entities and their geometry.

use glam::DVec2;
use tessera_net::{ByteReader, ByteWriter, DecodeError, EncodeError};

use crate::renderer::Renderer;

/// Built-in entity kind identifiers. Game-defined kinds use low positive
/// integers.
pub mod kind {
    /// Polygon with a vertex list.
    pub const POLYGON: i32 = i32::MAX;
    /// Circle with a radius.
    pub const CIRCLE: i32 = i32::MAX - 1;
}

// ---------------------------------------------------------------------------
// EntityUuid
// ---------------------------------------------------------------------------

/// 128-bit entity identity, sent on the wire as two `i64` words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityUuid(pub u128);

impl EntityUuid {
    /// Build from the high and low wire words.
    pub fn from_words(hi: i64, lo: i64) -> Self {
        Self(((hi as u64 as u128) << 64) | lo as u64 as u128)
    }

    /// High word as sent on the wire.
    pub fn hi(self) -> i64 {
        (self.0 >> 64) as u64 as i64
    }

    /// Low word as sent on the wire.
    pub fn lo(self) -> i64 {
        self.0 as u64 as i64
    }

    /// Read `hi` then `lo`.
    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let hi = r.read_i64()?;
        let lo = r.read_i64()?;
        Ok(Self::from_words(hi, lo))
    }

    /// Write `hi` then `lo`.
    pub fn encode(self, w: &mut ByteWriter) {
        w.write_i64(self.hi());
        w.write_i64(self.lo());
    }
}

impl std::fmt::Display for EntityUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Shape
// ---------------------------------------------------------------------------

/// Polygon whose vertices are stored relative to its area centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    vertices: Vec<DVec2>,
}

impl Polygon {
    /// Build a polygon, moving its centroid to the origin.
    pub fn new(vertices: Vec<DVec2>) -> Self {
        let centroid = centroid(&vertices);
        Self {
            vertices: vertices.into_iter().map(|v| v - centroid).collect(),
        }
    }

    /// Vertices relative to the centroid.
    pub fn vertices(&self) -> &[DVec2] {
        &self.vertices
    }
}

/// Area centroid of a simple polygon. Degenerate polygons (no area) fall
/// back to the vertex average.
fn centroid(vertices: &[DVec2]) -> DVec2 {
    if vertices.is_empty() {
        return DVec2::ZERO;
    }
    let mut doubled_area = 0.0;
    let mut acc = DVec2::ZERO;
    for (i, &a) in vertices.iter().enumerate() {
        let b = vertices[(i + 1) % vertices.len()];
        let cross = a.perp_dot(b);
        doubled_area += cross;
        acc += (a + b) * cross;
    }
    if doubled_area.abs() < f64::EPSILON {
        return vertices.iter().copied().sum::<DVec2>() / vertices.len() as f64;
    }
    acc / (3.0 * doubled_area)
}

/// Geometry of an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Built-in polygon.
    Polygon(Polygon),
    /// Built-in circle.
    Circle {
        /// Radius in world units.
        radius: f64,
    },
    /// Game-defined shape decoded by a registered entity decoder.
    Custom {
        /// Entity kind it was registered under.
        kind: i32,
        /// Shape parameters, interpreted by the game.
        params: Vec<f64>,
    },
}

impl Shape {
    /// Entity kind identifier of this shape.
    pub fn kind(&self) -> i32 {
        match self {
            Shape::Polygon(_) => kind::POLYGON,
            Shape::Circle { .. } => kind::CIRCLE,
            Shape::Custom { kind, .. } => *kind,
        }
    }
}

/// What an entity decoder produces: the shape plus its placement.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub shape: Shape,
    pub position: DVec2,
    pub rotation: f64,
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// One mirrored entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub uuid: EntityUuid,
    pub position: DVec2,
    /// Radians.
    pub rotation: f64,
    pub shape: Shape,
    pub renderer: Renderer,
    /// Whether this entity is the player controlled by this client.
    pub is_local: bool,
    pub(crate) pending_removal: bool,
}

impl Entity {
    /// Assemble an entity from decoded parts.
    pub fn new(uuid: EntityUuid, geometry: Geometry, renderer: Renderer, is_local: bool) -> Self {
        Self {
            uuid,
            position: geometry.position,
            rotation: geometry.rotation,
            shape: geometry.shape,
            renderer,
            is_local,
            pending_removal: false,
        }
    }

    /// Whether a removal has been received but not yet reconciled.
    pub fn is_pending_removal(&self) -> bool {
        self.pending_removal
    }

    /// Polygon vertices in world coordinates, rotated around the position.
    /// Empty for non-polygon shapes.
    pub fn absolute_vertices(&self) -> Vec<DVec2> {
        let Shape::Polygon(polygon) = &self.shape else {
            return Vec::new();
        };
        let rotation = DVec2::from_angle(self.rotation);
        polygon
            .vertices()
            .iter()
            .map(|&v| self.position + rotation.rotate(v))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Built-in geometry codecs
// ---------------------------------------------------------------------------

pub(crate) fn read_vec2(r: &mut ByteReader<'_>) -> Result<DVec2, DecodeError> {
    let x = r.read_f64()?;
    let y = r.read_f64()?;
    Ok(DVec2::new(x, y))
}

pub(crate) fn write_vec2(w: &mut ByteWriter, v: DVec2) {
    w.write_f64(v.x);
    w.write_f64(v.y);
}

/// `i32 n, n × (f64 x, f64 y), f64 px, f64 py, f64 rot`
pub fn decode_polygon(r: &mut ByteReader<'_>) -> Result<Geometry, DecodeError> {
    let count = r.read_i32()?;
    if count < 0 {
        return Err(DecodeError::malformed(format!("negative vertex count {count}")));
    }
    // Each vertex takes 16 bytes; reject counts the buffer cannot hold before
    // allocating.
    let count = count as usize;
    if count.saturating_mul(16) > r.remaining() {
        return Err(DecodeError::Truncated {
            needed: count.saturating_mul(16),
            available: r.remaining(),
        });
    }
    let mut vertices = Vec::with_capacity(count);
    for _ in 0..count {
        vertices.push(read_vec2(r)?);
    }
    let position = read_vec2(r)?;
    let rotation = r.read_f64()?;
    Ok(Geometry {
        shape: Shape::Polygon(Polygon::new(vertices)),
        position,
        rotation,
    })
}

/// `f64 px, f64 py, f64 rot, f64 radius`
pub fn decode_circle(r: &mut ByteReader<'_>) -> Result<Geometry, DecodeError> {
    let position = read_vec2(r)?;
    let rotation = r.read_f64()?;
    let radius = r.read_f64()?;
    Ok(Geometry {
        shape: Shape::Circle { radius },
        position,
        rotation,
    })
}

/// Write the geometry part of an entity body for the built-in shapes.
pub fn encode_geometry(w: &mut ByteWriter, entity: &Entity) -> Result<(), EncodeError> {
    match &entity.shape {
        Shape::Polygon(polygon) => {
            let count = i32::try_from(polygon.vertices().len())
                .map_err(|_| EncodeError::Unsupported("polygon with > i32::MAX vertices".into()))?;
            w.write_i32(count);
            for &v in polygon.vertices() {
                write_vec2(w, v);
            }
            write_vec2(w, entity.position);
            w.write_f64(entity.rotation);
        }
        Shape::Circle { radius } => {
            write_vec2(w, entity.position);
            w.write_f64(entity.rotation);
            w.write_f64(*radius);
        }
        Shape::Custom { kind, .. } => {
            return Err(EncodeError::Unsupported(format!("custom entity kind {kind}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(center: DVec2) -> Vec<DVec2> {
        [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)]
            .into_iter()
            .map(|(x, y)| center + DVec2::new(x, y))
            .collect()
    }

    #[test]
    fn test_uuid_words_round_trip() {
        let uuid = EntityUuid::from_words(-2, 0x1234);
        assert_eq!(uuid.hi(), -2);
        assert_eq!(uuid.lo(), 0x1234);
        assert_eq!(uuid.0 >> 64, 0xFFFF_FFFF_FFFF_FFFE);
    }

    #[test]
    fn test_polygon_centroid_moved_to_origin() {
        let polygon = Polygon::new(square(DVec2::new(10.0, -4.0)));
        assert_eq!(polygon.vertices(), square(DVec2::ZERO).as_slice());
    }

    #[test]
    fn test_triangle_centroid() {
        let c = centroid(&[DVec2::new(0.0, 0.0), DVec2::new(3.0, 0.0), DVec2::new(0.0, 3.0)]);
        assert!((c - DVec2::new(1.0, 1.0)).length() < 1e-12);
    }

    #[test]
    fn test_degenerate_polygon_uses_vertex_average() {
        let c = centroid(&[DVec2::new(0.0, 0.0), DVec2::new(2.0, 0.0), DVec2::new(4.0, 0.0)]);
        assert_eq!(c, DVec2::new(2.0, 0.0));
    }

    #[test]
    fn test_absolute_vertices_rotate_around_position() {
        let entity = Entity::new(
            EntityUuid(1),
            Geometry {
                shape: Shape::Polygon(Polygon::new(square(DVec2::ZERO))),
                position: DVec2::new(5.0, 5.0),
                rotation: std::f64::consts::FRAC_PI_2,
            },
            Renderer::None,
            false,
        );
        let vertices = entity.absolute_vertices();
        // (-1, -1) rotated a quarter turn is (1, -1).
        assert!((vertices[0] - DVec2::new(6.0, 4.0)).length() < 1e-12);
    }

    #[test]
    fn test_polygon_rejects_negative_count() {
        let mut w = ByteWriter::new();
        w.write_i32(-3);
        let result = decode_polygon(&mut ByteReader::new(w.as_slice()));
        assert!(matches!(result, Err(DecodeError::MalformedBody(_))));
    }

    #[test]
    fn test_polygon_count_beyond_buffer_is_truncated() {
        let mut w = ByteWriter::new();
        w.write_i32(1_000_000);
        w.write_f64(1.0);
        let result = decode_polygon(&mut ByteReader::new(w.as_slice()));
        assert!(matches!(result, Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn test_circle_geometry_layout() {
        let mut w = ByteWriter::new();
        for v in [1.5, -2.5, 0.25, 3.0] {
            w.write_f64(v);
        }
        let geometry = decode_circle(&mut ByteReader::new(w.as_slice())).unwrap();
        assert_eq!(geometry.position, DVec2::new(1.5, -2.5));
        assert_eq!(geometry.rotation, 0.25);
        assert_eq!(geometry.shape, Shape::Circle { radius: 3.0 });
    }
}
