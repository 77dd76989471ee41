//! Tile line-of-effect and cover grading.
//!
//! LOE walks the Bresenham path; a diagonal step is pinched when both
//! orthogonally adjacent tiles of the step are blocked. The endpoint only
//! needs to be unblocked, so a unit standing on the target tile can be
//! targeted.

use serde::{Deserialize, Serialize};

use sk_types::grid::{line, TilePos};
use sk_types::state::BattleMap;

/// Walk from `src` to `tgt`. Intermediate blocked tiles terminate with
/// false; diagonal corner pinches terminate with false; the endpoint itself
/// only needs to be unblocked.
pub fn has_tile_line_of_effect(map: &BattleMap, src: TilePos, tgt: TilePos) -> bool {
    let path = line(src, tgt);
    for window in path.windows(2) {
        let (prev, cur) = (window[0], window[1]);
        let step_x = cur.x - prev.x;
        let step_y = cur.y - prev.y;

        // Diagonal corner pinch: both orthogonal neighbors of the step blocked.
        if step_x != 0
            && step_y != 0
            && map.is_blocked(TilePos::new(prev.x + step_x, prev.y))
            && map.is_blocked(TilePos::new(prev.x, prev.y + step_y))
        {
            return false;
        }

        if cur == tgt {
            return !map.is_blocked(cur);
        }
        if map.is_blocked(cur) {
            return false;
        }
    }
    // src == tgt
    !map.is_blocked(tgt)
}

/// Cover grade between a shooter and a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverGrade {
    None,
    Standard,
    Greater,
    Blocked,
}

impl CoverGrade {
    /// AC bonus granted by this grade.
    pub fn ac_bonus(self) -> i32 {
        match self {
            CoverGrade::None | CoverGrade::Blocked => 0,
            CoverGrade::Standard => 2,
            CoverGrade::Greater => 4,
        }
    }
}

/// Grade cover by the two perpendicular-adjacent tiles of the target: for
/// axis-aligned shots, perpendicular to the shot axis; for diagonal shots,
/// the two tiles toward the shooter.
pub fn cover_grade(map: &BattleMap, src: TilePos, tgt: TilePos) -> CoverGrade {
    if !has_tile_line_of_effect(map, src, tgt) {
        return CoverGrade::Blocked;
    }
    if src == tgt {
        return CoverGrade::None;
    }

    let dx = src.x - tgt.x;
    let dy = src.y - tgt.y;
    let (a, b) = if dx == 0 {
        // Vertical shot: check east/west of the target.
        (TilePos::new(tgt.x - 1, tgt.y), TilePos::new(tgt.x + 1, tgt.y))
    } else if dy == 0 {
        // Horizontal shot: check north/south of the target.
        (TilePos::new(tgt.x, tgt.y - 1), TilePos::new(tgt.x, tgt.y + 1))
    } else {
        let sx = dx.signum();
        let sy = dy.signum();
        (TilePos::new(tgt.x + sx, tgt.y), TilePos::new(tgt.x, tgt.y + sy))
    };

    match (map.is_blocked(a) as u8) + (map.is_blocked(b) as u8) {
        0 => CoverGrade::None,
        1 => CoverGrade::Standard,
        _ => CoverGrade::Greater,
    }
}

/// Convenience: the AC bonus the target enjoys against this shot.
pub fn cover_bonus(map: &BattleMap, src: TilePos, tgt: TilePos) -> i32 {
    cover_grade(map, src, tgt).ac_bonus()
}
