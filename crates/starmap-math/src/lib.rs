//! Geometry primitives for the tile pyramid: spherical coordinate conversion,
//! geodesic midpoints, enclosing bounding spheres, view-frustum planes and
//! screen-space projection.
//!
//! Everything here is pure math in f64. Positions live on (or near) the unit
//! sphere with +Y towards the north pole.

mod bounds;
mod frustum;
mod screen;
mod spherical;

pub use bounds::BoundingSphere;
pub use frustum::{Frustum, Intersection, Plane};
pub use screen::{Viewport, max_edge_length_px, project_to_screen};
pub use spherical::{
    MAX_MERCATOR_LAT, TangentFrame, geodesic_midpoint, lat_lng_to_vector, mercator_lat,
    mercator_y, ra_dec_to_vector, vector_to_lat_lng,
};
