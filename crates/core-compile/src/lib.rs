//! Vector text compiler: string + target height → motion program.
//!
//! Pipeline: per-character layout pass (glyph commands shifted by a
//! running pen position, Y extent tracked over every on-curve and control
//! point), normalization of the measured extent to the requested height,
//! affine placement at the caller's origin with optional Y mirroring,
//! bold emphasis (translate replication or concentric normal offsetting),
//! and an outer pass loop. Curves are handed to the arc fitter *after*
//! the affine transform so arc radii are fitted in machine space.
//!
//! The compiler owns the active [`FontSource`]; swapping the configured
//! font key (or the file behind it) replaces the source wholesale, which
//! is what invalidates the glyph cache. A failing outline load silently
//! falls back to the built-in stroke font (debug-logged) so a bad upload
//! can never stall the queue.

use std::path::PathBuf;

use core_geom::{Point, arc};
use core_glyph::{FontRegistry, FontSource, PathCmd, profiles};
use thiserror::Error;
use tracing::debug;

mod bold;
mod normals;
mod program;

pub use bold::{BoldPattern, concentric_amounts, translate_offsets};
pub use program::MotionProgram;

/// Everything the compiler needs to know about one engraving style.
#[derive(Debug, Clone)]
pub struct EngraveStyle {
    pub power_percent: f64,
    pub feed_mm_min: u32,
    pub spindle_max: u32,
    /// Focus height; 0.0 disables the Z prologue/epilogue entirely.
    pub z_height_mm: f64,
    pub passes: u32,
    pub bold_repeats: u32,
    pub bold_offset_mm: f64,
    pub bold_pattern: BoldPattern,
    pub mirror_y: bool,
    pub font_key: String,
}

impl Default for EngraveStyle {
    fn default() -> Self {
        Self {
            power_percent: 50.0,
            feed_mm_min: 1000,
            spindle_max: 1000,
            z_height_mm: 0.0,
            passes: 1,
            bold_repeats: 1,
            bold_offset_mm: 0.15,
            bold_pattern: BoldPattern::Cross,
            mirror_y: false,
            font_key: profiles::BUILTIN_KEY.to_string(),
        }
    }
}

impl EngraveStyle {
    /// Spindle word for dynamic-power mode: `round(power% · spindle_max)`.
    pub fn spindle_value(&self) -> u32 {
        ((self.power_percent / 100.0) * self.spindle_max as f64).round() as u32
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    /// Every character produced empty geometry.
    #[error("No paths generated")]
    NoPaths,
}

/// Result of the layout pass, in font units.
struct LaidOutText {
    commands: Vec<PathCmd>,
    y_min: f64,
    y_max: f64,
    /// Total pen advance (width before scaling).
    advance: f64,
}

pub struct TextCompiler {
    registry: FontRegistry,
    style: EngraveStyle,
    source: FontSource,
    /// Identity of the active font: resolved outline path, or `None` for
    /// the built-in stroke backend. Drives cache invalidation on reload.
    active_path: Option<PathBuf>,
}

impl TextCompiler {
    pub fn new(registry: FontRegistry, style: EngraveStyle) -> Self {
        let (source, active_path) = Self::open_font(&registry, &style.font_key);
        Self {
            registry,
            style,
            source,
            active_path,
        }
    }

    fn open_font(registry: &FontRegistry, key: &str) -> (FontSource, Option<PathBuf>) {
        let profile = registry.resolve(key);
        match &profile.path {
            None => (FontSource::builtin(), None),
            Some(path) => match FontSource::from_file(path) {
                Ok(source) => (source, Some(path.clone())),
                Err(err) => {
                    debug!(target: "compile", font = %key, error = %err, "font_load_failed_fallback_builtin");
                    (FontSource::builtin(), None)
                }
            },
        }
    }

    /// Apply a new style (and possibly registry) to a live compiler.
    ///
    /// The glyph cache survives only when the resolved font identity is
    /// unchanged; any key or path change swaps the whole source.
    pub fn reload(&mut self, registry: FontRegistry, style: EngraveStyle) {
        let resolved = registry.resolve(&style.font_key).path.clone();
        if resolved != self.active_path {
            debug!(
                target: "compile",
                old = ?self.active_path,
                new = ?resolved,
                "font_changed_cache_purged"
            );
            let (source, active_path) = Self::open_font(&registry, &style.font_key);
            self.source = source;
            self.active_path = active_path;
        }
        self.registry = registry;
        self.style = style;
    }

    pub fn style(&self) -> &EngraveStyle {
        &self.style
    }

    /// The font profiles currently selectable (operator surface).
    pub fn registry(&self) -> &FontRegistry {
        &self.registry
    }

    /// Layout pass: accumulate shifted glyph commands and the Y extent.
    fn lay_out(&self, text: &str) -> LaidOutText {
        let mut commands = Vec::new();
        let mut cursor_x = 0.0;
        let mut y_min = f64::INFINITY;
        let mut y_max = f64::NEG_INFINITY;

        let track = |p: &Point, y_min: &mut f64, y_max: &mut f64| {
            *y_min = y_min.min(p.y);
            *y_max = y_max.max(p.y);
        };

        for ch in text.chars() {
            let glyph = self.source.glyph(ch);
            if glyph.commands.is_empty() && glyph.advance > 0.0 {
                debug!(target: "compile", ch = %ch, "character_without_geometry");
            }
            for cmd in &glyph.commands {
                let shifted = match cmd {
                    PathCmd::MoveTo(p) => PathCmd::MoveTo(Point::new(p.x + cursor_x, p.y)),
                    PathCmd::LineTo(p) => PathCmd::LineTo(Point::new(p.x + cursor_x, p.y)),
                    PathCmd::QuadTo(c, p) => PathCmd::QuadTo(
                        Point::new(c.x + cursor_x, c.y),
                        Point::new(p.x + cursor_x, p.y),
                    ),
                    PathCmd::CubicTo(c1, c2, p) => PathCmd::CubicTo(
                        Point::new(c1.x + cursor_x, c1.y),
                        Point::new(c2.x + cursor_x, c2.y),
                        Point::new(p.x + cursor_x, p.y),
                    ),
                };
                match &shifted {
                    PathCmd::MoveTo(p) | PathCmd::LineTo(p) => track(p, &mut y_min, &mut y_max),
                    PathCmd::QuadTo(c, p) => {
                        track(c, &mut y_min, &mut y_max);
                        track(p, &mut y_min, &mut y_max);
                    }
                    PathCmd::CubicTo(c1, c2, p) => {
                        track(c1, &mut y_min, &mut y_max);
                        track(c2, &mut y_min, &mut y_max);
                        track(p, &mut y_min, &mut y_max);
                    }
                }
                commands.push(shifted);
            }
            cursor_x += glyph.advance;
        }

        LaidOutText {
            commands,
            y_min,
            y_max,
            advance: cursor_x,
        }
    }

    /// Bounding-box size (width, height) in millimetres at `height_mm`,
    /// without emitting any program. `(0, 0)` for empty geometry.
    pub fn estimate(&self, text: &str, height_mm: f64) -> (f64, f64) {
        let laid = self.lay_out(text);
        let raw_height = laid.y_max - laid.y_min;
        if laid.commands.is_empty() || raw_height < 1e-5 {
            return (0.0, 0.0);
        }
        let scale = height_mm / raw_height;
        (laid.advance * scale, height_mm)
    }

    /// Compile `text` into a full motion program anchored at the given
    /// machine-space origin.
    pub fn compile(
        &self,
        text: &str,
        origin_x: f64,
        origin_y: f64,
        height_mm: f64,
        passes: u32,
    ) -> Result<MotionProgram, CompileError> {
        let laid = self.lay_out(text);
        let raw_height = laid.y_max - laid.y_min;
        if laid.commands.is_empty() || raw_height < 1e-5 {
            return Err(CompileError::NoPaths);
        }
        let scale = height_mm / raw_height;
        let style = &self.style;
        let passes = passes.max(1);
        let repeats = style.bold_repeats.max(1);

        let concentric = style.bold_pattern == BoldPattern::Concentric;
        let amounts = if concentric {
            concentric_amounts(repeats, style.bold_offset_mm)
        } else {
            vec![0.0; repeats as usize]
        };
        let offsets = translate_offsets(repeats, style.bold_offset_mm, style.bold_pattern);
        let cmd_normals = concentric.then(|| normals::vertex_normals(&laid.commands));

        let mirror = style.mirror_y;
        let y_min = laid.y_min;
        // Affine placement of one font-space point, including the
        // concentric normal displacement when active.
        let tx = |p: &Point, normal: Point, amt: f64, bx: f64, by: f64| -> Point {
            let mut my = (p.y - y_min) * scale;
            if mirror {
                my = height_mm - my;
            }
            let mut ny = normal.y * amt;
            if mirror {
                ny = -ny;
            }
            Point::new(
                origin_x + p.x * scale + bx + normal.x * amt,
                origin_y + my + by + ny,
            )
        };

        let feed = style.feed_mm_min;
        let mut program = MotionProgram::new();
        program.push(format!("; Engrave: '{}'", text));
        program.push(format!(
            "; Origin: X{:.1} Y{:.1} | Height: {:.2} mm",
            origin_x, origin_y, height_mm
        ));
        program.push(format!(
            "; Passes: {} | Bold: {} ({:?})",
            passes, repeats, style.bold_pattern
        ));
        self.emit_preamble(&mut program);

        for pass in 0..passes {
            for (b_idx, (&(bx, by), &amt)) in offsets.iter().zip(&amounts).enumerate() {
                if passes > 1 || repeats > 1 {
                    if concentric {
                        program.push(format!(
                            "; --- Pass {}/{} | Concentric {}/{} (shift {:+.3} mm) ---",
                            pass + 1,
                            passes,
                            b_idx + 1,
                            repeats,
                            amt
                        ));
                    } else {
                        program.push(format!(
                            "; --- Pass {}/{} | Offset {}/{} (dX {:.3} dY {:.3}) ---",
                            pass + 1,
                            passes,
                            b_idx + 1,
                            repeats,
                            bx,
                            by
                        ));
                    }
                }

                let zero = [Point::default(); 3];
                let mut current: Option<Point> = None;
                for (c_idx, cmd) in laid.commands.iter().enumerate() {
                    let norms = cmd_normals
                        .as_ref()
                        .map(|n| &n[c_idx])
                        .unwrap_or(&zero);
                    match cmd {
                        PathCmd::MoveTo(p) => {
                            let m = tx(p, norms[0], amt, bx, by);
                            program.push(format!("G0 X{:.3} Y{:.3}", m.x, m.y));
                            current = Some(m);
                        }
                        PathCmd::LineTo(p) => {
                            let m = tx(p, norms[0], amt, bx, by);
                            program.push(format!("G1 X{:.3} Y{:.3} F{}", m.x, m.y, feed));
                            current = Some(m);
                        }
                        PathCmd::QuadTo(c, p) => {
                            let mc = tx(c, norms[0], amt, bx, by);
                            let mp = tx(p, norms[1], amt, bx, by);
                            if let Some(from) = current {
                                let mut lines = Vec::new();
                                arc::fit_quadratic(from, mc, mp, feed, &mut lines);
                                program.extend(lines);
                            }
                            current = Some(mp);
                        }
                        PathCmd::CubicTo(c1, c2, p) => {
                            let m1 = tx(c1, norms[0], amt, bx, by);
                            let m2 = tx(c2, norms[1], amt, bx, by);
                            let mp = tx(p, norms[2], amt, bx, by);
                            if let Some(from) = current {
                                let mut lines = Vec::new();
                                arc::fit_cubic(from, m1, m2, mp, feed, &mut lines);
                                program.extend(lines);
                            }
                            current = Some(mp);
                        }
                    }
                }
            }
        }

        self.emit_postamble(&mut program);
        Ok(program)
    }

    /// Fixed program head: units, work-offset reset, absolute mode, the
    /// optional Z approach, and arming the laser in dynamic-power mode.
    fn emit_preamble(&self, program: &mut MotionProgram) {
        let style = &self.style;
        program.push("G21");
        program.push("G10 L2 P1 X0 Y0 Z0");
        program.push("G54");
        program.push("G90");
        if style.z_height_mm != 0.0 {
            program.push("G0 Z0");
            program.push(format!("G0 Z{:.3}", style.z_height_mm));
        }
        program.push(format!("M4 S{}", style.spindle_value()));
    }

    /// Fixed program tail: laser off, Z retract when used, park, end.
    fn emit_postamble(&self, program: &mut MotionProgram) {
        program.push("M5");
        if self.style.z_height_mm != 0.0 {
            program.push("G0 Z0");
        }
        program.push("G0 X0 Y0");
        program.push("M2");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builtin_compiler(style: EngraveStyle) -> TextCompiler {
        TextCompiler::new(FontRegistry::default(), style)
    }

    fn body_points(program: &MotionProgram) -> Vec<(f64, f64)> {
        program
            .commands()
            .filter(|c| c.starts_with("G0 X") || c.starts_with("G1 X"))
            .map(|c| {
                let mut x = f64::NAN;
                let mut y = f64::NAN;
                for w in c.split_whitespace() {
                    if let Some(v) = w.strip_prefix('X') {
                        x = v.parse().unwrap();
                    } else if let Some(v) = w.strip_prefix('Y') {
                        y = v.parse().unwrap();
                    }
                }
                (x, y)
            })
            .collect()
    }

    #[test]
    fn estimate_scales_width_with_height() {
        let c = builtin_compiler(EngraveStyle::default());
        let (w5, h5) = c.estimate("AB", 5.0);
        let (w10, h10) = c.estimate("AB", 10.0);
        assert_eq!(h5, 5.0);
        assert_eq!(h10, 10.0);
        assert!((w10 - 2.0 * w5).abs() < 1e-9);
        assert!(w5 > 0.0);
    }

    #[test]
    fn empty_text_estimates_zero() {
        let c = builtin_compiler(EngraveStyle::default());
        assert_eq!(c.estimate("", 10.0), (0.0, 0.0));
        // Whitespace-only: advances but no geometry.
        assert_eq!(c.estimate("   ", 10.0), (0.0, 0.0));
    }

    #[test]
    fn compile_without_geometry_is_no_paths() {
        let c = builtin_compiler(EngraveStyle::default());
        let err = c.compile("   ", 0.0, 0.0, 10.0, 1).unwrap_err();
        assert!(matches!(err, CompileError::NoPaths));
    }

    #[test]
    fn compiled_height_matches_request() {
        let c = builtin_compiler(EngraveStyle::default());
        let program = c.compile("ABC", 0.0, 0.0, 10.0, 1).unwrap();
        let pts = body_points(&program);
        // Ignore the final park move G0 X0 Y0 — it is the postamble.
        let body = &pts[..pts.len() - 1];
        let y_min = body.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
        let y_max = body.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
        assert!(((y_max - y_min) - 10.0).abs() < 1e-3, "height {}", y_max - y_min);
    }

    #[test]
    fn compile_is_translation_invariant() {
        let c = builtin_compiler(EngraveStyle::default());
        let at_origin = c.compile("HI", 0.0, 0.0, 8.0, 1).unwrap();
        let moved = c.compile("HI", 25.0, 40.0, 8.0, 1).unwrap();
        let a = body_points(&at_origin);
        let b = body_points(&moved);
        assert_eq!(a.len(), b.len());
        // All but the shared park move translate exactly.
        for (p, q) in a[..a.len() - 1].iter().zip(&b[..b.len() - 1]) {
            assert!((q.0 - p.0 - 25.0).abs() < 2e-3);
            assert!((q.1 - p.1 - 40.0).abs() < 2e-3);
        }
    }

    #[test]
    fn program_frame_is_fixed() {
        let style = EngraveStyle {
            power_percent: 50.0,
            spindle_max: 1000,
            ..EngraveStyle::default()
        };
        let c = builtin_compiler(style);
        let program = c.compile("ABC", 0.0, 0.0, 10.0, 1).unwrap();
        let cmds: Vec<&str> = program.commands().collect();

        assert_eq!(cmds[0], "G21");
        assert_eq!(cmds[1], "G10 L2 P1 X0 Y0 Z0");
        assert_eq!(cmds[2], "G54");
        assert_eq!(cmds[3], "G90");
        assert_eq!(cmds[4], "M4 S500");
        assert_eq!(cmds[cmds.len() - 1], "M2");
        assert_eq!(cmds[cmds.len() - 2], "G0 X0 Y0");
        assert_eq!(cmds[cmds.len() - 3], "M5");
        assert_eq!(cmds.iter().filter(|c| **c == "M4 S500").count(), 1);
        assert_eq!(cmds.iter().filter(|c| **c == "M5").count(), 1);
        assert_eq!(cmds.iter().filter(|c| **c == "M2").count(), 1);
        assert!(cmds.iter().any(|c| c.starts_with("G0 X")));
    }

    #[test]
    fn z_height_adds_focus_moves() {
        let style = EngraveStyle {
            z_height_mm: 12.5,
            ..EngraveStyle::default()
        };
        let c = builtin_compiler(style);
        let program = c.compile("A", 0.0, 0.0, 5.0, 1).unwrap();
        let cmds: Vec<&str> = program.commands().collect();
        let zi = cmds.iter().position(|c| *c == "G0 Z0").unwrap();
        assert_eq!(cmds[zi + 1], "G0 Z12.500");
        // Retract before park.
        assert!(cmds[cmds.len() - 4] == "M5" && cmds[cmds.len() - 3] == "G0 Z0");
    }

    #[test]
    fn passes_multiply_the_body() {
        let c = builtin_compiler(EngraveStyle::default());
        let one = c.compile("O", 0.0, 0.0, 6.0, 1).unwrap();
        let three = c.compile("O", 0.0, 0.0, 6.0, 3).unwrap();
        let count = |p: &MotionProgram| p.commands().filter(|c| c.starts_with("G1")).count();
        assert_eq!(count(&three), 3 * count(&one));
    }

    #[test]
    fn bold_translate_replicates_body() {
        let style = EngraveStyle {
            bold_repeats: 3,
            bold_offset_mm: 0.1,
            bold_pattern: BoldPattern::Cross,
            ..EngraveStyle::default()
        };
        let c = builtin_compiler(style);
        let program = c.compile("L", 5.0, 5.0, 6.0, 1).unwrap();
        let moves: Vec<(f64, f64)> = body_points(&program);
        // 'L' is one 3-point polyline: 1 G0 + 2 G1 per repeat + park.
        assert_eq!(moves.len(), 3 * 3 + 1);
        // Second repeat shifted +0.1 in X.
        assert!((moves[3].0 - moves[0].0 - 0.1).abs() < 2e-3);
    }

    #[test]
    fn concentric_bold_offsets_along_normals() {
        let style = EngraveStyle {
            bold_repeats: 2,
            bold_offset_mm: 0.2,
            bold_pattern: BoldPattern::Concentric,
            ..EngraveStyle::default()
        };
        let c = builtin_compiler(style);
        let program = c.compile("I", 0.0, 0.0, 10.0, 1).unwrap();
        let moves = body_points(&program);
        // 'I' is a single vertical stem: repeat 1 at x=0, repeat 2 shifted
        // horizontally by the normal offset (stem normal is ±X; the open
        // endpoints carry the sqrt(2) end-cap miter).
        assert_eq!(moves.len(), 2 * 2 + 1);
        let dx = (moves[2].0 - moves[0].0).abs();
        let expect = 0.2 * std::f64::consts::SQRT_2;
        assert!((dx - expect).abs() < 2e-3, "normal shift was {dx}");
    }

    #[test]
    fn mirror_y_flips_vertically_within_the_box() {
        let plain = builtin_compiler(EngraveStyle::default());
        let mirrored = builtin_compiler(EngraveStyle {
            mirror_y: true,
            ..EngraveStyle::default()
        });
        let a = body_points(&plain.compile("L", 0.0, 0.0, 10.0, 1).unwrap());
        let b = body_points(&mirrored.compile("L", 0.0, 0.0, 10.0, 1).unwrap());
        for (p, q) in a[..a.len() - 1].iter().zip(&b[..b.len() - 1]) {
            assert!((p.0 - q.0).abs() < 1e-9, "X unchanged by mirror");
            assert!((q.1 - (10.0 - p.1)).abs() < 2e-3, "Y reflected about the box");
        }
    }
}
