//! Square-grid coordinate math — distances, discs, Bresenham lines, cones.
//!
//! Positions serialize as `[x, y]` to match the scenario wire format.
//! Enumeration helpers return tiles in a fixed row-major order so every
//! consumer iterates deterministically.

use serde::{Deserialize, Serialize};

/// A tile coordinate on the battle grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(i32, i32)", into = "(i32, i32)")]
pub struct TilePos {
    pub x: i32,
    pub y: i32,
}

impl TilePos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance |dx| + |dy|.
    pub fn manhattan(self, other: Self) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    /// Chebyshev distance max(|dx|, |dy|).
    pub fn chebyshev(self, other: Self) -> i32 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }

    /// The four orthogonal neighbors, in scan order (north, west, east, south).
    pub fn neighbors4(self) -> [Self; 4] {
        [
            Self::new(self.x, self.y - 1),
            Self::new(self.x - 1, self.y),
            Self::new(self.x + 1, self.y),
            Self::new(self.x, self.y + 1),
        ]
    }

    /// String key for per-tile maps ("x,y").
    pub fn key(self) -> String {
        format!("{},{}", self.x, self.y)
    }
}

impl From<(i32, i32)> for TilePos {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

impl From<TilePos> for (i32, i32) {
    fn from(p: TilePos) -> Self {
        (p.x, p.y)
    }
}

impl std::fmt::Display for TilePos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// All tiles with Manhattan distance ≤ r from the center, row-major order.
pub fn radius(center: TilePos, r: i32) -> Vec<TilePos> {
    let mut out = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            if dx.abs() + dy.abs() <= r {
                out.push(TilePos::new(center.x + dx, center.y + dy));
            }
        }
    }
    out
}

/// Classic Bresenham line from (x0,y0) to (x1,y1), both endpoints included,
/// in traversal order.
pub fn line(from: TilePos, to: TilePos) -> Vec<TilePos> {
    let mut out = Vec::new();
    let dx = (to.x - from.x).abs();
    let dy = -(to.y - from.y).abs();
    let sx = if from.x < to.x { 1 } else { -1 };
    let sy = if from.y < to.y { 1 } else { -1 };
    let mut err = dx + dy;
    let (mut x, mut y) = (from.x, from.y);

    loop {
        out.push(TilePos::new(x, y));
        if x == to.x && y == to.y {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
    out
}

/// All tiles within Euclidean distance `len` of the origin whose direction
/// lies inside a 90° cone toward `facing` (dot product with the facing unit
/// vector ≥ cos 45°). If facing equals the origin, returns just the origin.
pub fn cone(origin: TilePos, facing: TilePos, len: i32) -> Vec<TilePos> {
    if facing == origin {
        return vec![origin];
    }
    let fx = (facing.x - origin.x) as f64;
    let fy = (facing.y - origin.y) as f64;
    let fmag = (fx * fx + fy * fy).sqrt();
    let cos45 = std::f64::consts::FRAC_1_SQRT_2;

    let mut out = Vec::new();
    for dy in -len..=len {
        for dx in -len..=len {
            let dist = ((dx * dx + dy * dy) as f64).sqrt();
            if dist > len as f64 {
                continue;
            }
            if dx == 0 && dy == 0 {
                out.push(origin);
                continue;
            }
            let dot = (dx as f64 * fx + dy as f64 * fy) / (dist * fmag);
            if dot >= cos45 - 1e-9 {
                out.push(TilePos::new(origin.x + dx, origin.y + dy));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manhattan_and_chebyshev() {
        let a = TilePos::new(1, 1);
        let b = TilePos::new(4, 3);
        assert_eq!(a.manhattan(b), 5);
        assert_eq!(a.chebyshev(b), 3);
    }

    #[test]
    fn serializes_as_pair() {
        let p = TilePos::new(3, 7);
        assert_eq!(serde_json::to_string(&p).unwrap(), "[3,7]");
        let q: TilePos = serde_json::from_str("[3,7]").unwrap();
        assert_eq!(p, q);
    }

    #[test]
    fn radius_zero_is_center() {
        assert_eq!(radius(TilePos::new(2, 2), 0), vec![TilePos::new(2, 2)]);
    }

    #[test]
    fn radius_one_is_plus_shape() {
        let tiles = radius(TilePos::new(0, 0), 1);
        assert_eq!(tiles.len(), 5);
        assert!(tiles.contains(&TilePos::new(0, -1)));
        assert!(tiles.contains(&TilePos::new(-1, 0)));
        assert!(tiles.contains(&TilePos::new(1, 0)));
        assert!(tiles.contains(&TilePos::new(0, 1)));
        assert!(tiles.contains(&TilePos::new(0, 0)));
    }

    #[test]
    fn line_includes_both_endpoints() {
        let pts = line(TilePos::new(0, 0), TilePos::new(3, 1));
        assert_eq!(pts.first(), Some(&TilePos::new(0, 0)));
        assert_eq!(pts.last(), Some(&TilePos::new(3, 1)));
    }

    #[test]
    fn line_diagonal() {
        let pts = line(TilePos::new(0, 0), TilePos::new(2, 2));
        assert_eq!(
            pts,
            vec![TilePos::new(0, 0), TilePos::new(1, 1), TilePos::new(2, 2)]
        );
    }

    #[test]
    fn line_degenerate_single_point() {
        assert_eq!(line(TilePos::new(4, 4), TilePos::new(4, 4)), vec![TilePos::new(4, 4)]);
    }

    #[test]
    fn cone_facing_origin_is_origin() {
        assert_eq!(cone(TilePos::new(1, 1), TilePos::new(1, 1), 3), vec![TilePos::new(1, 1)]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn line_always_includes_endpoints(
                x0 in -20..20i32, y0 in -20..20i32,
                x1 in -20..20i32, y1 in -20..20i32,
            ) {
                let a = TilePos::new(x0, y0);
                let b = TilePos::new(x1, y1);
                let pts = line(a, b);
                prop_assert_eq!(pts.first(), Some(&a));
                prop_assert_eq!(pts.last(), Some(&b));
                prop_assert!(pts.len() as i32 >= a.chebyshev(b) + 1);
            }

            #[test]
            fn distances_are_symmetric(
                x0 in -50..50i32, y0 in -50..50i32,
                x1 in -50..50i32, y1 in -50..50i32,
            ) {
                let a = TilePos::new(x0, y0);
                let b = TilePos::new(x1, y1);
                prop_assert_eq!(a.manhattan(b), b.manhattan(a));
                prop_assert_eq!(a.chebyshev(b), b.chebyshev(a));
                prop_assert!(a.chebyshev(b) <= a.manhattan(b));
            }
        }
    }

    #[test]
    fn cone_east_contains_axis_and_diagonals() {
        let tiles = cone(TilePos::new(0, 0), TilePos::new(5, 0), 2);
        assert!(tiles.contains(&TilePos::new(1, 0)));
        assert!(tiles.contains(&TilePos::new(2, 0)));
        // 45° edges are inside the cone
        assert!(tiles.contains(&TilePos::new(1, 1)));
        assert!(tiles.contains(&TilePos::new(1, -1)));
        // Behind the origin is not
        assert!(!tiles.contains(&TilePos::new(-1, 0)));
        assert!(!tiles.contains(&TilePos::new(0, 1)));
    }
}
