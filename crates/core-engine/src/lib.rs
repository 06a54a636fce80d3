//! The orchestrator: the serial loop that drains the pending queue.
//!
//! One engine owns every long-lived component — job store, layout
//! allocator, text compiler, controller link — and passes data between
//! them explicitly; there is no module-level state anywhere in the
//! workspace. External collaborators reach the engine through the bounded
//! enqueue channel and the read-only query surface.
//!
//! Per job: claim → (redo fast path: load stored artifact) or
//! (estimate → allocate → compile → store artifact) → notify overlay →
//! stream → record placement on success. A layout refusal returns the
//! job to `pending` and the loop backs off for five seconds so a full
//! board does not spin the CPU.
//!
//! Lock discipline: the layout lock is never held across the streamer
//! call; the engine computes the spot, releases, engraves, then re-locks
//! to record. The engine is the only mutator of the allocator.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use core_compile::{CompileError, MotionProgram, TextCompiler};
use core_config::Config;
use core_events::{EnqueueRequest, OverlayHooks, enqueue_channel};
use core_glyph::FontRegistry;
use core_jobs::{Job, JobSettings, JobStatus, JobStore, JobUpdate};
use core_layout::{LayoutAllocator, LayoutStats, Placement, Spot};
use core_stream::{LaserController, StreamError};

mod settings;

pub use settings::{connection_settings, engrave_style, work_area};

/// Outcome of one `process_next` iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Nothing pending.
    Idle,
    Completed(String),
    Failed(String),
    Stopped(String),
    /// No board space; job returned to pending.
    Requeued(String),
}

/// Live progress of the stream in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct EngraveProgress {
    pub job_id: String,
    pub name: String,
    pub sent: usize,
    pub total: usize,
}

pub struct Engine {
    config: RwLock<Config>,
    store: Mutex<JobStore>,
    layout: RwLock<LayoutAllocator>,
    compiler: RwLock<TextCompiler>,
    controller: LaserController,
    hooks: Box<dyn OverlayHooks>,
    enqueue_tx: Sender<EnqueueRequest>,
    enqueue_rx: Receiver<EnqueueRequest>,
    progress: Mutex<Option<EngraveProgress>>,
}

impl Engine {
    /// Assemble an engine over an already-constructed controller link.
    pub fn new(
        config: Config,
        data_dir: &Path,
        controller: LaserController,
        hooks: Box<dyn OverlayHooks>,
    ) -> Result<Self> {
        let store = JobStore::open(data_dir).context("open job store")?;
        let area = work_area(&config);
        let layout = LayoutAllocator::open(data_dir.join("placements.json"), area);
        let registry = FontRegistry::scan(Path::new(&config.text_settings.fonts_dir));
        let compiler = TextCompiler::new(registry, engrave_style(&config));
        let (enqueue_tx, enqueue_rx) = enqueue_channel();

        info!(
            target: "engine",
            active_w = area.active_width_mm,
            active_h = area.active_height_mm,
            offset_x = area.offset_x_mm,
            offset_y = area.offset_y_mm,
            "engine_ready"
        );
        Ok(Self {
            config: RwLock::new(config),
            store: Mutex::new(store),
            layout: RwLock::new(layout),
            compiler: RwLock::new(compiler),
            controller,
            hooks,
            enqueue_tx,
            enqueue_rx,
            progress: Mutex::new(None),
        })
    }

    /// Handle producers use to queue names.
    pub fn enqueue_handle(&self) -> Sender<EnqueueRequest> {
        self.enqueue_tx.clone()
    }

    pub fn controller(&self) -> &LaserController {
        &self.controller
    }

    /// Swap in a fresh configuration: compiler style and font reload;
    /// the engraving area is fixed at construction (placements reference
    /// it), which matches how the board is physically set up once.
    pub fn apply_config(&self, config: Config) {
        let registry = FontRegistry::scan(Path::new(&config.text_settings.fonts_dir));
        let style = engrave_style(&config);
        self.compiler
            .write()
            .expect("compiler lock")
            .reload(registry, style);
        *self.config.write().expect("config lock") = config;
        info!(target: "engine", "config_applied");
    }

    // ── Read-only query surface ───────────────────────────────────────

    pub fn jobs(&self) -> Vec<Job> {
        self.store.lock().expect("store lock").jobs().to_vec()
    }

    pub fn job(&self, id: &str) -> Option<Job> {
        self.store.lock().expect("store lock").job(id).cloned()
    }

    pub fn placements(&self) -> Vec<Placement> {
        self.layout
            .read()
            .expect("layout lock")
            .placements()
            .to_vec()
    }

    pub fn stats(&self) -> LayoutStats {
        self.layout.read().expect("layout lock").stats()
    }

    pub fn progress(&self) -> Option<EngraveProgress> {
        self.progress.lock().expect("progress lock").clone()
    }

    pub fn artifact(&self, id: &str) -> Option<String> {
        self.store.lock().expect("store lock").artifact(id)
    }

    /// Selectable font keys with display labels (operator surface).
    pub fn fonts(&self) -> Vec<(String, String)> {
        self.compiler
            .read()
            .expect("compiler lock")
            .registry()
            .profiles()
            .map(|(key, profile)| (key.to_string(), profile.label.clone()))
            .collect()
    }

    // ── Operator commands ─────────────────────────────────────────────

    pub fn add_job(
        &self,
        name: &str,
        source: &str,
        settings: Option<JobSettings>,
    ) -> Result<Job> {
        Ok(self
            .store
            .lock()
            .expect("store lock")
            .add(name, source, settings)?)
    }

    pub fn redo(&self, id: &str) -> Result<Job> {
        Ok(self.store.lock().expect("store lock").redo(id)?)
    }

    pub fn stop(&self) -> Result<(), StreamError> {
        self.controller.stop()
    }

    pub fn clear_board(&self) -> Result<()> {
        self.layout
            .write()
            .expect("layout lock")
            .clear_all()
            .context("clear placements")
    }

    pub fn archive_board(&self) -> Result<Option<PathBuf>> {
        self.layout
            .write()
            .expect("layout lock")
            .archive_and_reset()
            .context("archive placements")
    }

    // ── The loop ──────────────────────────────────────────────────────

    /// Run until `shutdown` fires. Idle waits double as enqueue waits.
    pub fn run(&self, shutdown: &Receiver<()>) {
        info!(target: "engine", "orchestrator_running");
        loop {
            if shutdown.try_recv().is_ok() {
                info!(target: "engine", "orchestrator_stopping");
                return;
            }
            match self.process_next() {
                ProcessOutcome::Idle => {
                    // Sleep on the enqueue channel so a new name wakes us.
                    if let Ok(req) = self.enqueue_rx.recv_timeout(Duration::from_secs(1)) {
                        self.accept_request(req);
                    }
                }
                ProcessOutcome::Requeued(_) => {
                    // Board full: back off instead of spinning.
                    std::thread::sleep(Duration::from_secs(5));
                }
                _ => {}
            }
        }
    }

    fn accept_request(&self, req: EnqueueRequest) {
        let settings = req.settings.map(|map| map.into_iter().collect());
        match self.add_job(&req.name, &req.source, settings) {
            Ok(job) => debug!(target: "engine", id = %job.id, name = %job.name, "job_enqueued"),
            Err(err) => warn!(target: "engine", error = %err, "enqueue_failed"),
        }
    }

    /// One orchestration step: drain the enqueue channel, then process at
    /// most one pending job to completion.
    pub fn process_next(&self) -> ProcessOutcome {
        for req in self.enqueue_rx.try_iter().collect::<Vec<_>>() {
            self.accept_request(req);
        }

        let Some(job) = self.store.lock().expect("store lock").next_pending() else {
            return ProcessOutcome::Idle;
        };

        if let Err(err) = self
            .store
            .lock()
            .expect("store lock")
            .update(&job.id, JobUpdate::status(JobStatus::Active))
        {
            warn!(target: "engine", id = %job.id, error = %err, "claim_failed");
            return ProcessOutcome::Idle;
        }
        info!(target: "engine", id = %job.id, name = %job.name, "job_claimed");

        let prepared = match self.prepare(&job) {
            Ok(Some(prepared)) => prepared,
            Ok(None) => {
                // Layout refusal: back to pending, caller backs off.
                let _ = self
                    .store
                    .lock()
                    .expect("store lock")
                    .update(&job.id, JobUpdate::status(JobStatus::Pending));
                info!(target: "engine", id = %job.id, "no_space_requeued");
                return ProcessOutcome::Requeued(job.id);
            }
            Err(err) => {
                warn!(target: "engine", id = %job.id, error = %err, "prepare_failed");
                let _ = self.store.lock().expect("store lock").update(
                    &job.id,
                    JobUpdate::status_with_error(JobStatus::Failed, err.to_string()),
                );
                return ProcessOutcome::Failed(job.id);
            }
        };

        self.engrave(&job, prepared)
    }

    /// Everything needed before the wire: the program plus the placement
    /// to record on success (absent when geometry is unknown, e.g. a redo
    /// of a legacy job without stored geometry).
    fn prepare(&self, job: &Job) -> Result<Option<Prepared>> {
        // Redo fast path: artifact already on disk, geometry in settings.
        if job.artifact_ref.is_some() {
            if let Some(blob) = self.store.lock().expect("store lock").artifact(&job.id) {
                debug!(target: "engine", id = %job.id, "artifact_fast_path");
                return Ok(Some(Prepared {
                    program: MotionProgram::from_text(&blob),
                    placement: placement_from_settings(&job.name, &job.settings),
                }));
            }
        }

        let (initial_height, passes) = {
            let config = self.config.read().expect("config lock");
            (
                config.text_settings.initial_height_mm,
                config.laser_settings.passes,
            )
        };

        let compiler = self.compiler.read().expect("compiler lock");
        let (est_w, _) = compiler.estimate(&job.name, initial_height);
        if est_w <= 0.0 {
            anyhow::bail!("No paths generated");
        }

        // Operator-pinned rectangle beats the allocator.
        let spot = match override_rect(&job.settings) {
            Some(rect) => {
                let mut height = initial_height;
                if let Some(max_w) = rect.width
                    && est_w > max_w
                {
                    height = initial_height * max_w / est_w;
                }
                Spot {
                    x: rect.x,
                    y: rect.y,
                    text_height_mm: height,
                }
            }
            None => {
                let est_h = initial_height;
                let found = self.layout.write().expect("layout lock").find_empty_space(
                    est_w,
                    est_h,
                    initial_height,
                );
                match found {
                    Some(spot) => spot,
                    None => return Ok(None),
                }
            }
        };

        let final_height = spot.text_height_mm;
        let final_width = est_w * final_height / initial_height;
        let area = self.layout.read().expect("layout lock").work_area();
        let (mx, my) = area.to_machine(spot.x, spot.y);
        debug!(
            target: "engine",
            id = %job.id,
            x_local = spot.x,
            y_local = spot.y,
            x_machine = mx,
            y_machine = my,
            height = final_height,
            "placement_chosen"
        );

        let program = match compiler.compile(&job.name, mx, my, final_height, passes) {
            Ok(program) => program,
            Err(CompileError::NoPaths) => anyhow::bail!("No paths generated"),
        };
        drop(compiler);

        let placement = Placement {
            name: job.name.clone(),
            x: spot.x,
            y: spot.y,
            width: final_width,
            height: final_height,
            text_height_mm: final_height,
            timestamp: chrono::Utc::now(),
        };

        // Persist the artifact and the chosen geometry so redo can skip
        // compilation entirely.
        let mut store = self.store.lock().expect("store lock");
        store.save_artifact(&job.id, &program.to_text())?;
        let mut settings = job.settings.clone();
        store_geometry(&mut settings, &placement);
        store.update(
            &job.id,
            JobUpdate {
                settings: Some(settings),
                ..JobUpdate::default()
            },
        )?;

        Ok(Some(Prepared {
            program,
            placement: Some(placement),
        }))
    }

    fn engrave(&self, job: &Job, prepared: Prepared) -> ProcessOutcome {
        self.hooks.on_engrave_start(&job.name);

        let total = prepared.program.command_count();
        *self.progress.lock().expect("progress lock") = Some(EngraveProgress {
            job_id: job.id.clone(),
            name: job.name.clone(),
            sent: 0,
            total,
        });

        let result = {
            let progress = &self.progress;
            let mut on_progress = |sent: usize, total: usize| {
                if let Some(p) = progress.lock().expect("progress lock").as_mut() {
                    p.sent = sent;
                    p.total = total;
                }
            };
            self.controller
                .send_program(prepared.program.lines(), &mut on_progress)
        };
        *self.progress.lock().expect("progress lock") = None;

        let success = result.is_ok();
        self.hooks.on_engrave_finish(&job.name, success);

        match result {
            Ok(sent) => {
                if let Some(placement) = prepared.placement {
                    let recorded = self
                        .layout
                        .write()
                        .expect("layout lock")
                        .record(placement);
                    if let Err(err) = recorded {
                        warn!(target: "engine", id = %job.id, error = %err, "placement_record_failed");
                    }
                }
                let _ = self
                    .store
                    .lock()
                    .expect("store lock")
                    .update(&job.id, JobUpdate::status(JobStatus::Finished));
                info!(target: "engine", id = %job.id, sent, "job_finished");
                ProcessOutcome::Completed(job.id.clone())
            }
            Err(err) => {
                let status = if err.is_stop_like() {
                    JobStatus::Stopped
                } else {
                    JobStatus::Failed
                };
                let _ = self.store.lock().expect("store lock").update(
                    &job.id,
                    JobUpdate::status_with_error(status, err.to_string()),
                );
                warn!(target: "engine", id = %job.id, error = %err, "job_failed");
                if status == JobStatus::Stopped {
                    ProcessOutcome::Stopped(job.id.clone())
                } else {
                    ProcessOutcome::Failed(job.id.clone())
                }
            }
        }
    }
}

struct Prepared {
    program: MotionProgram,
    placement: Option<Placement>,
}

struct OverrideRect {
    x: f64,
    y: f64,
    width: Option<f64>,
}

fn override_rect(settings: &JobSettings) -> Option<OverrideRect> {
    let rect = settings.get("override_rect")?.as_object()?;
    Some(OverrideRect {
        x: rect.get("x")?.as_f64()?,
        y: rect.get("y")?.as_f64()?,
        width: rect.get("width").and_then(|v| v.as_f64()),
    })
}

fn store_geometry(settings: &mut JobSettings, placement: &Placement) {
    settings.insert("x_mm".into(), serde_json::json!(placement.x));
    settings.insert("y_mm".into(), serde_json::json!(placement.y));
    settings.insert("width_mm".into(), serde_json::json!(placement.width));
    settings.insert("height_mm".into(), serde_json::json!(placement.height));
    settings.insert(
        "text_height_mm".into(),
        serde_json::json!(placement.text_height_mm),
    );
}

fn placement_from_settings(name: &str, settings: &JobSettings) -> Option<Placement> {
    let get = |key: &str| settings.get(key).and_then(|v| v.as_f64());
    Some(Placement {
        name: name.to_string(),
        x: get("x_mm")?,
        y: get("y_mm")?,
        width: get("width_mm")?,
        height: get("height_mm")?,
        text_height_mm: get("text_height_mm")?,
        timestamp: chrono::Utc::now(),
    })
}
