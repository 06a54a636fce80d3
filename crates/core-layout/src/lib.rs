//! Board layout allocation: where the next name goes.
//!
//! The allocator owns the set of recorded [`Placement`]s and the on-disk
//! file that persists them; nothing else writes that file. Free space is
//! found by scanning a 2 mm candidate grid in *shuffled* order — the
//! shuffle is contractual, it is what makes the board fill evenly instead
//! of clustering at the origin — and a name that does not fit is shrunk
//! by 20 % steps down to a 2 mm floor before the allocator refuses.
//!
//! Invariants on every recorded placement:
//! * `w > 0`, `h > 0`, `x ≥ 0`, `y ≥ 0`
//! * `x + w ≤ active_width`, `y + h ≤ active_height`
//! * any two placements are separated by at least [`PADDING_MM`] on one axis
//!
//! Coordinates are active-area-local millimetres; [`WorkArea::to_machine`]
//! translates to machine space for the compiler.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use core_geom::Rect;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Minimum clearance kept between any two placements, per side.
pub const PADDING_MM: f64 = 1.5;

/// Candidate-origin grid step.
const GRID_STEP_MM: f64 = 2.0;

/// Absolute floor for auto-shrunk text height.
pub const MIN_TEXT_HEIGHT_MM: f64 = 2.0;

/// Height multiplier applied per shrink attempt.
const SHRINK_FACTOR: f64 = 0.8;

/// A recorded occupied rectangle, active-area-local millimetres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub text_height_mm: f64,
    pub timestamp: DateTime<Utc>,
}

impl Placement {
    fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

/// Machine envelope, usable sub-rectangle, and the translation between.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkArea {
    pub machine_width_mm: f64,
    pub machine_height_mm: f64,
    pub active_width_mm: f64,
    pub active_height_mm: f64,
    pub offset_x_mm: f64,
    pub offset_y_mm: f64,
}

impl WorkArea {
    /// Translate an active-local point into machine coordinates.
    pub fn to_machine(&self, x: f64, y: f64) -> (f64, f64) {
        (x + self.offset_x_mm, y + self.offset_y_mm)
    }

    /// The active rectangle must sit inside the machine envelope.
    pub fn is_valid(&self) -> bool {
        self.active_width_mm > 0.0
            && self.active_height_mm > 0.0
            && self.active_width_mm + self.offset_x_mm <= self.machine_width_mm
            && self.active_height_mm + self.offset_y_mm <= self.machine_height_mm
    }
}

impl Default for WorkArea {
    fn default() -> Self {
        Self {
            machine_width_mm: 200.0,
            machine_height_mm: 298.0,
            active_width_mm: 200.0,
            active_height_mm: 298.0,
            offset_x_mm: 0.0,
            offset_y_mm: 0.0,
        }
    }
}

/// A free origin plus the (possibly shrunk) text height it was found at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spot {
    pub x: f64,
    pub y: f64,
    pub text_height_mm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutStats {
    pub count: usize,
    pub coverage_percent: f64,
    pub mean_text_height: f64,
}

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("placement violates the active-area bounds")]
    OutOfBounds,
    #[error("failed to persist placements: {0}")]
    Persist(String),
}

/// On-disk document; schema shared with the operator tooling.
#[derive(Serialize, Deserialize)]
struct PlacementsFile {
    placements: Vec<Placement>,
    width_mm: f64,
    height_mm: f64,
    machine_width_mm: f64,
    machine_height_mm: f64,
    offset_x_mm: f64,
    offset_y_mm: f64,
}

pub struct LayoutAllocator {
    data_file: PathBuf,
    area: WorkArea,
    placements: Vec<Placement>,
    rng: StdRng,
}

impl LayoutAllocator {
    /// Open (or start empty) against the given state file.
    pub fn open(data_file: impl Into<PathBuf>, area: WorkArea) -> Self {
        Self::open_impl(data_file.into(), area, StdRng::from_os_rng())
    }

    /// Deterministic variant for tests: the candidate shuffle is seeded.
    pub fn open_seeded(data_file: impl Into<PathBuf>, area: WorkArea, seed: u64) -> Self {
        Self::open_impl(data_file.into(), area, StdRng::seed_from_u64(seed))
    }

    fn open_impl(data_file: PathBuf, area: WorkArea, rng: StdRng) -> Self {
        let placements = match std::fs::read_to_string(&data_file) {
            Ok(text) => match serde_json::from_str::<PlacementsFile>(&text) {
                Ok(file) => {
                    info!(target: "layout", count = file.placements.len(), "placements_loaded");
                    file.placements
                }
                Err(err) => {
                    warn!(target: "layout", error = %err, "placements_parse_failed_starting_empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Self {
            data_file,
            area,
            placements,
            rng,
        }
    }

    pub fn work_area(&self) -> WorkArea {
        self.area
    }

    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    /// Find a free origin for a `required_width` × `required_height` box
    /// at `text_height_mm`, shrinking in 20 % steps when the board is
    /// crowded. `None` means the board is full even at the minimum height.
    pub fn find_empty_space(
        &mut self,
        mut required_width: f64,
        mut required_height: f64,
        mut text_height_mm: f64,
    ) -> Option<Spot> {
        // Force-fit the width first: a name wider than the board can never
        // place regardless of position.
        while required_width > self.area.active_width_mm && text_height_mm > MIN_TEXT_HEIGHT_MM {
            let new_height = (text_height_mm * SHRINK_FACTOR).max(MIN_TEXT_HEIGHT_MM);
            let scale = new_height / text_height_mm;
            required_width *= scale;
            required_height *= scale;
            text_height_mm = new_height;
            debug!(target: "layout", text_height_mm, "too_wide_shrinking");
        }
        if required_width > self.area.active_width_mm {
            debug!(target: "layout", "refused_minimum_height_still_too_wide");
            return None;
        }

        let max_x = self.area.active_width_mm - required_width;
        let max_y = self.area.active_height_mm - required_height;
        if max_x >= 0.0 && max_y >= 0.0 {
            let mut candidates = Vec::new();
            let mut x = 0.0;
            while x <= max_x + 1e-9 {
                let mut y = 0.0;
                while y <= max_y + 1e-9 {
                    candidates.push((x, y));
                    y += GRID_STEP_MM;
                }
                x += GRID_STEP_MM;
            }
            // Contractual: randomised scan order fills the board evenly.
            candidates.shuffle(&mut self.rng);

            for (x, y) in candidates {
                if self.is_space_empty(x, y, required_width, required_height) {
                    return Some(Spot {
                        x,
                        y,
                        text_height_mm,
                    });
                }
            }
        }

        // Crowded: shrink and retry until the height floor.
        if text_height_mm > MIN_TEXT_HEIGHT_MM {
            let new_height = (text_height_mm * SHRINK_FACTOR).max(MIN_TEXT_HEIGHT_MM);
            let scale = new_height / text_height_mm;
            debug!(target: "layout", from = text_height_mm, to = new_height, "no_space_shrinking");
            return self.find_empty_space(
                required_width * scale,
                required_height * scale,
                new_height,
            );
        }

        None
    }

    fn is_space_empty(&self, x: f64, y: f64, width: f64, height: f64) -> bool {
        let candidate = Rect::new(x, y, width, height);
        self.placements
            .iter()
            .all(|p| !candidate.overlaps_padded(&p.rect(), PADDING_MM))
    }

    /// Record a placement and persist. The in-memory record is kept even
    /// when the disk write fails (the failure is surfaced to the caller).
    pub fn record(&mut self, mut placement: Placement) -> Result<(), LayoutError> {
        let round3 = |v: f64| (v * 1000.0).round() / 1000.0;
        placement.x = round3(placement.x);
        placement.y = round3(placement.y);
        placement.width = round3(placement.width);
        placement.height = round3(placement.height);
        placement.text_height_mm = round3(placement.text_height_mm);

        if placement.width <= 0.0
            || placement.height <= 0.0
            || placement.x < 0.0
            || placement.y < 0.0
            || placement.x + placement.width > self.area.active_width_mm + 1e-6
            || placement.y + placement.height > self.area.active_height_mm + 1e-6
        {
            return Err(LayoutError::OutOfBounds);
        }

        debug!(
            target: "layout",
            name = %placement.name,
            x = placement.x,
            y = placement.y,
            "placement_recorded"
        );
        self.placements.push(placement);
        self.save()
    }

    pub fn clear_all(&mut self) -> Result<(), LayoutError> {
        self.placements.clear();
        info!(target: "layout", "placements_cleared");
        self.save()
    }

    /// Snapshot the current state file to a timestamped sibling, then
    /// clear. Returns the backup path, or `None` when there was nothing
    /// on disk to archive.
    pub fn archive_and_reset(&mut self) -> Result<Option<PathBuf>, LayoutError> {
        let backup = if self.data_file.exists() {
            let stamp = Utc::now().format("%Y%m%d_%H%M%S");
            let file_name = match self.data_file.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => format!("{stem}_archive_{stamp}.json"),
                None => format!("placements_archive_{stamp}.json"),
            };
            let backup = self.data_file.with_file_name(file_name);
            std::fs::copy(&self.data_file, &backup)
                .map_err(|e| LayoutError::Persist(e.to_string()))?;
            info!(target: "layout", backup = %backup.display(), "placements_archived");
            Some(backup)
        } else {
            None
        };
        self.placements.clear();
        self.save()?;
        Ok(backup)
    }

    pub fn stats(&self) -> LayoutStats {
        if self.placements.is_empty() {
            return LayoutStats {
                count: 0,
                coverage_percent: 0.0,
                mean_text_height: 0.0,
            };
        }
        let used: f64 = self.placements.iter().map(|p| p.width * p.height).sum();
        let available = self.area.active_width_mm * self.area.active_height_mm;
        let mean_height: f64 = self
            .placements
            .iter()
            .map(|p| p.text_height_mm)
            .sum::<f64>()
            / self.placements.len() as f64;
        LayoutStats {
            count: self.placements.len(),
            coverage_percent: used / available * 100.0,
            mean_text_height: mean_height,
        }
    }

    fn save(&self) -> Result<(), LayoutError> {
        if let Some(dir) = self.data_file.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir).map_err(|e| LayoutError::Persist(e.to_string()))?;
        }
        let file = PlacementsFile {
            placements: self.placements.clone(),
            width_mm: self.area.active_width_mm,
            height_mm: self.area.active_height_mm,
            machine_width_mm: self.area.machine_width_mm,
            machine_height_mm: self.area.machine_height_mm,
            offset_x_mm: self.area.offset_x_mm,
            offset_y_mm: self.area.offset_y_mm,
        };
        let text = serde_json::to_string_pretty(&file)
            .map_err(|e| LayoutError::Persist(e.to_string()))?;
        std::fs::write(&self.data_file, text).map_err(|e| {
            warn!(target: "layout", error = %e, "placements_save_failed");
            LayoutError::Persist(e.to_string())
        })
    }
}

/// Load just the placement list from a state file (read-only consumers).
pub fn load_placements(path: &Path) -> Option<Vec<Placement>> {
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str::<PlacementsFile>(&text)
        .ok()
        .map(|f| f.placements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn area(active_w: f64, active_h: f64) -> WorkArea {
        WorkArea {
            machine_width_mm: active_w,
            machine_height_mm: active_h,
            active_width_mm: active_w,
            active_height_mm: active_h,
            offset_x_mm: 0.0,
            offset_y_mm: 0.0,
        }
    }

    fn placement(name: &str, x: f64, y: f64, w: f64, h: f64) -> Placement {
        Placement {
            name: name.to_string(),
            x,
            y,
            width: w,
            height: h,
            text_height_mm: h,
            timestamp: Utc::now(),
        }
    }

    fn allocator(dir: &TempDir, a: WorkArea) -> LayoutAllocator {
        LayoutAllocator::open_seeded(dir.path().join("placements.json"), a, 7)
    }

    #[test]
    fn empty_board_returns_origin_in_bounds() {
        let dir = TempDir::new().unwrap();
        let mut alloc = allocator(&dir, area(200.0, 298.0));
        let spot = alloc.find_empty_space(30.0, 10.0, 10.0).unwrap();
        assert!(spot.x >= 0.0 && spot.x <= 170.0);
        assert!(spot.y >= 0.0 && spot.y <= 288.0);
        assert_eq!(spot.text_height_mm, 10.0);
    }

    #[test]
    fn collision_is_avoided_with_padding() {
        let dir = TempDir::new().unwrap();
        let mut alloc = allocator(&dir, area(200.0, 298.0));
        alloc.record(placement("seed", 0.0, 0.0, 40.0, 10.0)).unwrap();

        let spot = alloc.find_empty_space(10.0, 10.0, 10.0).unwrap();
        let found = Rect::new(spot.x, spot.y, 10.0, 10.0);
        let seeded = Rect::new(0.0, 0.0, 40.0, 10.0);
        assert!(!found.overlaps_padded(&seeded, PADDING_MM));
    }

    #[test]
    fn wide_name_shrinks_to_fit() {
        let dir = TempDir::new().unwrap();
        let mut alloc = allocator(&dir, area(50.0, 50.0));
        // 100 mm wide at 10 mm tall: needs two 0.8 shrinks to reach 64→51.2→…
        let spot = alloc.find_empty_space(100.0, 10.0, 10.0).unwrap();
        assert!(spot.text_height_mm < 10.0);
        assert!(spot.text_height_mm >= MIN_TEXT_HEIGHT_MM);
        // The shrunk width must now fit the 50 mm board.
        let shrunk_width = 100.0 * (spot.text_height_mm / 10.0);
        assert!(shrunk_width <= 50.0 + 1e-9);
    }

    #[test]
    fn impossible_fit_is_refused() {
        let dir = TempDir::new().unwrap();
        let mut alloc = allocator(&dir, area(20.0, 20.0));
        // Even at the 2 mm floor this is 200 mm wide.
        assert!(alloc.find_empty_space(1000.0, 10.0, 10.0).is_none());
    }

    #[test]
    fn crowded_board_shrinks_then_refuses() {
        let dir = TempDir::new().unwrap();
        let mut alloc = allocator(&dir, area(40.0, 12.0));
        alloc
            .record(placement("hog", 0.0, 0.0, 40.0, 12.0))
            .unwrap();
        // Board fully occupied: every candidate collides at every height.
        assert!(alloc.find_empty_space(10.0, 10.0, 10.0).is_none());
    }

    #[test]
    fn recorded_placements_respect_mutual_padding() {
        let dir = TempDir::new().unwrap();
        let mut alloc = allocator(&dir, area(100.0, 100.0));
        for i in 0..8 {
            if let Some(spot) = alloc.find_empty_space(20.0, 8.0, 8.0) {
                alloc
                    .record(placement(&format!("n{i}"), spot.x, spot.y, 20.0, 8.0))
                    .unwrap();
            }
        }
        let all = alloc.placements();
        assert!(all.len() >= 2);
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert!(
                    !a.rect().overlaps_padded(&b.rect(), PADDING_MM),
                    "{} and {} overlap",
                    a.name,
                    b.name
                );
            }
        }
    }

    #[test]
    fn out_of_bounds_record_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut alloc = allocator(&dir, area(50.0, 50.0));
        let err = alloc
            .record(placement("oob", 45.0, 0.0, 10.0, 5.0))
            .unwrap_err();
        assert!(matches!(err, LayoutError::OutOfBounds));
        assert!(alloc.placements().is_empty());
    }

    #[test]
    fn placements_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("placements.json");
        let a = area(100.0, 100.0);
        {
            let mut alloc = LayoutAllocator::open_seeded(&path, a, 1);
            alloc.record(placement("kept", 2.0, 4.0, 30.0, 10.0)).unwrap();
        }
        let alloc = LayoutAllocator::open_seeded(&path, a, 2);
        assert_eq!(alloc.placements().len(), 1);
        assert_eq!(alloc.placements()[0].name, "kept");
        assert_eq!(alloc.placements()[0].x, 2.0);
    }

    #[test]
    fn archive_and_reset_backs_up_then_clears() {
        let dir = TempDir::new().unwrap();
        let a = area(100.0, 100.0);
        let mut alloc = allocator(&dir, a);
        alloc.record(placement("old", 0.0, 0.0, 10.0, 5.0)).unwrap();

        let backup = alloc.archive_and_reset().unwrap().unwrap();
        assert!(alloc.placements().is_empty());
        let archived = load_placements(&backup).unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].name, "old");
        // The live file was rewritten empty.
        let live = load_placements(&dir.path().join("placements.json")).unwrap();
        assert!(live.is_empty());
    }

    #[test]
    fn archive_without_file_returns_none() {
        let dir = TempDir::new().unwrap();
        let mut alloc = allocator(&dir, area(100.0, 100.0));
        assert!(alloc.archive_and_reset().unwrap().is_none());
    }

    #[test]
    fn stats_reflect_coverage_and_mean_height() {
        let dir = TempDir::new().unwrap();
        let mut alloc = allocator(&dir, area(100.0, 100.0));
        assert_eq!(alloc.stats().count, 0);

        alloc.record(placement("a", 0.0, 0.0, 50.0, 10.0)).unwrap();
        alloc.record(placement("b", 0.0, 20.0, 50.0, 20.0)).unwrap();
        let stats = alloc.stats();
        assert_eq!(stats.count, 2);
        assert!((stats.coverage_percent - 15.0).abs() < 1e-9);
        assert!((stats.mean_text_height - 15.0).abs() < 1e-9);
    }

    #[test]
    fn seeded_allocators_agree() {
        let dir = TempDir::new().unwrap();
        let a = area(200.0, 298.0);
        let mut x = LayoutAllocator::open_seeded(dir.path().join("x.json"), a, 42);
        let mut y = LayoutAllocator::open_seeded(dir.path().join("y.json"), a, 42);
        assert_eq!(
            x.find_empty_space(30.0, 10.0, 10.0),
            y.find_empty_space(30.0, 10.0, 10.0)
        );
    }
}
