// SPDX-License-Identifier: GPL-3.0-only

//! Render worker thread
//!
//! The worker is the only thread that touches the graphics context. It
//! reports startup success/failure through `init_tx`, then drains the command
//! queue until it receives `Quit` or the error policy asks it to stop.

use super::registry::Outcome;
use super::{
    Command, DestinationAttributes, DestinationId, EngineShared, InputSurface, LoopAction,
    Throttle, WorkerErrorPolicy, WorkerState,
};
use crate::callback::{Observer, describe_panic};
use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult, GraphicsError};
use crate::gpu::{
    Color, ContextHandle, DriverContext, GraphicsContext, GraphicsDriver, Mat4, MirrorMode,
    NativeWindow, OutputTarget, TextureKey,
};
use crate::pipelines::still::encode_rgba;
use crate::pipelines::still::request::{CaptureRequest, Completed};
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc::SyncSender;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Parameters moved into the render thread
pub(crate) struct WorkerParams {
    pub driver: Box<dyn GraphicsDriver>,
    pub config: EngineConfig,
    pub shared: Arc<EngineShared>,
    pub observer: Observer,
    pub policy: Box<dyn WorkerErrorPolicy>,
}

/// Reported back to the constructing thread once the worker is ready
#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerInitResult {
    pub context: ContextHandle,
    pub version: u32,
}

/// Main entry point for the render thread
pub(crate) fn render_thread_main(
    params: WorkerParams,
    init_tx: SyncSender<EngineResult<WorkerInitResult>>,
) {
    let shared = Arc::clone(&params.shared);
    let worker = match RenderWorker::start(params) {
        Ok(worker) => worker,
        Err(e) => {
            error!(error = %e, "Render worker failed to start");
            shared.mark_released();
            shared.queue.quit();
            shared.close_waiters();
            shared.set_worker_state(WorkerState::Stopped);
            let _ = init_tx.send(Err(e));
            return;
        }
    };

    shared.mark_running();
    let init = WorkerInitResult {
        context: worker.ctx.handle(),
        version: worker.ctx.version(),
    };
    if init_tx.send(Ok(init)).is_err() {
        warn!("Render worker owner vanished during startup");
    }
    worker.run();
}

struct Master {
    input: InputSurface,
    texture: TextureKey,
}

struct Destination {
    attributes: Arc<DestinationAttributes>,
    target: OutputTarget,
    throttle: Option<Throttle>,
}

impl Destination {
    fn draw(&self, driver: &mut dyn DriverContext, texture: TextureKey) -> Result<(), GraphicsError> {
        self.target.make_current(driver)?;
        driver.clear(Color::TRANSPARENT.to_rgba_f32());
        driver.draw_texture(texture, &self.attributes.transform())?;
        self.target.swap(driver)
    }

    fn fill(&self, driver: &mut dyn DriverContext, color: Color) -> Result<(), GraphicsError> {
        self.target.make_current(driver)?;
        driver.clear(color.to_rgba_f32());
        self.target.swap(driver)
    }

    /// Blank the window, then drop the native surface
    fn retire(mut self, driver: &mut dyn DriverContext) {
        if self.target.is_valid(driver)
            && let Err(e) = self.fill(driver, Color::TRANSPARENT)
        {
            debug!(error = %e, "Could not blank destination before release");
        }
        self.target.release(driver);
    }
}

struct RenderWorker {
    shared: Arc<EngineShared>,
    observer: Observer,
    policy: Box<dyn WorkerErrorPolicy>,
    ctx: GraphicsContext,
    // Kept alive for the lifetime of the context
    _driver: Box<dyn GraphicsDriver>,
    master: Option<Master>,
    destinations: HashMap<DestinationId, Destination>,
    video_size: (u32, u32),
    mirror: MirrorMode,
    rotation: Option<(f32, Option<[f32; 2]>)>,
    /// Sequence numbers of commands the worker queued itself
    self_issued: HashSet<u64>,
}

impl RenderWorker {
    /// `Starting`: context, default target, input surface
    fn start(params: WorkerParams) -> EngineResult<Self> {
        let WorkerParams {
            mut driver,
            config,
            shared,
            observer,
            policy,
        } = params;
        shared.set_worker_state(WorkerState::Starting);

        let ctx = GraphicsContext::create(
            &mut *driver,
            config.max_client_version,
            config.shared_context,
            &config.flags,
        )?;

        let mut worker = Self {
            shared,
            observer,
            policy,
            ctx,
            _driver: driver,
            master: None,
            destinations: HashMap::new(),
            video_size: (config.width, config.height),
            mirror: MirrorMode::Normal,
            rotation: None,
            self_issued: HashSet::new(),
        };
        worker.recreate_master()?;
        worker.shared.set_worker_state(WorkerState::Ready);
        Ok(worker)
    }

    fn run(mut self) {
        info!(
            version = self.ctx.version(),
            width = self.video_size.0,
            height = self.video_size.1,
            "Render worker running"
        );

        loop {
            self.shared.set_worker_state(WorkerState::Idle);
            self.schedule_missed_draw();
            let (seq, command) = self.shared.queue.take();
            if matches!(command, Command::Quit) {
                debug!("Quit received");
                break;
            }

            self.shared.set_worker_state(WorkerState::Processing);
            trace!(seq, ?command, "Processing command");
            let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute(command)));
            let (outcome, failure) = match result {
                Ok(Ok(outcome)) => (outcome, None),
                Ok(Err(e)) => (None, Some(e)),
                Err(payload) => (
                    None,
                    Some(EngineError::WorkerPanicked(describe_panic(payload.as_ref()))),
                ),
            };
            let outcome = if self.self_issued.remove(&seq) {
                None
            } else {
                outcome
            };
            self.shared.registry.complete(seq, outcome);

            if let Some(e) = failure {
                self.observer.error(&e);
                if self.policy.on_error(&e) == LoopAction::Stop {
                    warn!(error = %e, "Error policy stopped the render worker");
                    break;
                }
            }
        }

        self.shutdown();
    }

    fn execute(&mut self, command: Command) -> EngineResult<Option<Outcome>> {
        // A previous command may have left a destination current
        self.ctx.make_default_current()?;

        match command {
            Command::Draw => self.handle_draw().map(|_| None),
            Command::Resize { width, height } => {
                self.handle_resize(width, height);
                Ok(None)
            }
            Command::AddDestination {
                id,
                window,
                max_fps,
            } => Ok(Some(self.handle_add(id, window, max_fps))),
            Command::RemoveDestination { id } => Ok(Some(self.handle_remove(id))),
            Command::RemoveAll => Ok(Some(self.handle_remove_all())),
            Command::RecreateMaster => Ok(Some(match self.recreate_master() {
                Ok(()) => Outcome::Recreated,
                Err(e) => {
                    warn!(error = %e, "Failed to recreate input surface");
                    self.observer.error(&e);
                    Outcome::Failed(e)
                }
            })),
            Command::Mirror(mode) => {
                self.handle_mirror(mode);
                Ok(None)
            }
            Command::Rotate { degrees, pivot } => {
                self.handle_rotate(degrees, pivot);
                Ok(None)
            }
            Command::Clear { id, color } => self.handle_clear(id, color).map(|_| None),
            Command::ClearAll(color) => {
                self.handle_clear_all(color);
                Ok(None)
            }
            Command::SetTransform { id, matrix } => {
                self.handle_set_transform(id, matrix);
                Ok(None)
            }
            Command::Quit => Ok(None),
        }
    }

    fn handle_draw(&mut self) -> EngineResult<()> {
        let master_valid = self
            .master
            .as_ref()
            .is_some_and(|master| master.input.is_valid());
        if !master_valid {
            debug!("Input surface invalid, scheduling recreation");
            self.schedule_recreate();
            if self.master.is_none() {
                // Nothing to read back; fail the capture instead of retrying forever
                self.capture_if_pending();
            }
            return Ok(());
        }

        if self.shared.first_frame.load(Ordering::Acquire) {
            self.latch_frame()?;
            self.draw_destinations();
            self.observer.frame_available();
        }
        self.capture_if_pending();

        self.ctx.make_default_current()?;
        let driver = self.ctx.driver()?;
        driver.clear(Color::TRANSPARENT.to_rgba_f32());
        driver.flush();
        Ok(())
    }

    /// Upload the newest producer frame into the input texture
    fn latch_frame(&mut self) -> EngineResult<()> {
        let Some(master) = &self.master else {
            return Ok(());
        };
        let Some(frame) = master.input.take_latest() else {
            return Ok(());
        };
        let texture = master.texture;
        let driver = self.ctx.driver()?;
        if let Err(e) = driver.upload_texture(texture, frame.width, frame.height, &frame.data) {
            self.schedule_recreate();
            return Err(e.into());
        }
        Ok(())
    }

    /// Queue `RecreateMaster` on our own behalf; nobody waits for its outcome
    fn schedule_recreate(&mut self) {
        match self.shared.queue.offer(Command::RecreateMaster) {
            Ok(seq) => {
                self.self_issued.insert(seq);
            }
            Err(_) => trace!("Queue full, recreation deferred to next draw"),
        }
    }

    /// Once the queue is drained, re-queue a draw that was lost to a full
    /// queue or that a pending capture is still waiting for
    fn schedule_missed_draw(&self) {
        if !self.shared.queue.is_empty() {
            return;
        }
        let missed = self.shared.draw_missed.swap(false, Ordering::AcqRel);
        if (missed || self.shared.capture.is_pending())
            && let Err(e) = self.shared.request_frame()
        {
            trace!(error = %e, "Could not schedule draw");
        }
    }

    fn draw_destinations(&mut self) {
        let Some(texture) = self.master.as_ref().map(|master| master.texture) else {
            return;
        };
        let driver = match self.ctx.driver() {
            Ok(driver) => driver,
            Err(e) => {
                warn!(error = %e, "Draw without context");
                return;
            }
        };

        let mut failed = Vec::new();
        for (&id, dest) in self.destinations.iter_mut() {
            if !dest.attributes.is_enabled() {
                continue;
            }
            if let Some(throttle) = &dest.throttle
                && !throttle.is_due(Instant::now())
            {
                trace!(id, "Destination throttled");
                continue;
            }
            match dest.draw(driver, texture) {
                Ok(()) => {
                    if let Some(throttle) = dest.throttle.as_mut() {
                        throttle.mark_drawn(Instant::now());
                    }
                }
                Err(e) => failed.push((id, e)),
            }
        }

        for (id, e) in failed {
            warn!(id, error = %e, "Destination draw failed");
            let invalid = self
                .destinations
                .get(&id)
                .is_some_and(|dest| !dest.target.is_valid(&*driver));
            if invalid && let Some(dest) = self.destinations.remove(&id) {
                dest.retire(driver);
                self.shared.registry.remove(id);
                info!(id, "Removed destination with lost window");
            }
            self.observer.error(&EngineError::Graphics(e));
        }
    }

    fn capture_if_pending(&mut self) {
        let Some(request) = self.shared.capture.begin() else {
            return;
        };
        let CaptureRequest {
            ticket,
            mut sink,
            format,
            quality,
            blocking,
        } = request;
        info!(ticket, ?format, quality, "Capturing still");

        let result = self.render_still().and_then(|(pixels, width, height)| {
            encode_rgba(&pixels, width, height, format, quality, &mut sink)
                .map_err(EngineError::from)
        });
        match &result {
            Ok(()) => info!(ticket, "Still captured"),
            Err(e) => {
                warn!(ticket, error = %e, "Still capture failed");
                if !blocking {
                    self.observer.error(e);
                }
            }
        }
        self.shared
            .capture
            .finish(ticket, blocking, Completed { result, sink });
    }

    /// Render the input texture at video size and read it back
    fn render_still(&mut self) -> EngineResult<(Vec<u8>, u32, u32)> {
        let (width, height) = self.video_size;
        let texture = self
            .master
            .as_ref()
            .map(|master| master.texture)
            .ok_or(GraphicsError::InvalidTarget)?;
        let mvp = self.mirror.matrix();

        let driver = self.ctx.driver()?;
        let mut target = OutputTarget::offscreen(driver, width, height)?;
        driver.clear(Color::BLACK.to_rgba_f32());
        let drawn = driver.draw_texture(texture, &mvp);

        let synced = self.ctx.sync();
        let driver = self.ctx.driver()?;
        let pixels = drawn
            .and(synced)
            .and_then(|_| driver.read_pixels(width, height));
        target.release(driver);
        Ok((pixels?, width, height))
    }

    fn handle_resize(&mut self, width: u32, height: u32) {
        self.video_size = (width, height);
        if let Some(master) = &self.master {
            master.input.set_default_size(width, height);
        }
        info!(width, height, "Video size changed");
    }

    /// Transform for a newly added destination
    fn base_transform(&self) -> Mat4 {
        let base = match self.rotation {
            Some((degrees, pivot)) => Mat4::rotation_z_about(degrees, pivot.unwrap_or([0.0, 0.0])),
            None => Mat4::IDENTITY,
        };
        base.mirrored(self.mirror)
    }

    fn handle_add(
        &mut self,
        id: DestinationId,
        window: Arc<dyn NativeWindow>,
        max_fps: Option<u32>,
    ) -> Outcome {
        self.prune_invalid();
        if self.destinations.contains_key(&id) {
            warn!(id, "Destination already registered");
            return Outcome::AlreadyPresent;
        }

        let driver = match self.ctx.driver() {
            Ok(driver) => driver,
            Err(e) => return Outcome::Failed(e.into()),
        };
        match OutputTarget::bind_to_window(driver, window) {
            Ok(target) => {
                let attributes =
                    Arc::new(DestinationAttributes::new(self.base_transform(), max_fps));
                self.shared.registry.insert(id, Arc::clone(&attributes));
                self.destinations.insert(
                    id,
                    Destination {
                        attributes,
                        target,
                        throttle: Throttle::from_max_fps(max_fps),
                    },
                );
                info!(id, ?max_fps, "Destination added");
                Outcome::Added
            }
            Err(e) => {
                warn!(id, error = %e, "Failed to bind destination window");
                let err = EngineError::TargetCreationFailed(id);
                self.observer.error(&err);
                Outcome::Failed(err)
            }
        }
    }

    fn handle_remove(&mut self, id: DestinationId) -> Outcome {
        self.prune_invalid();
        let Some(dest) = self.destinations.remove(&id) else {
            return Outcome::NotPresent;
        };
        if let Ok(driver) = self.ctx.driver() {
            dest.retire(driver);
        }
        self.shared.registry.remove(id);
        info!(id, "Destination removed");
        Outcome::Removed(1)
    }

    fn handle_remove_all(&mut self) -> Outcome {
        let removed = self.destinations.len();
        let driver = self.ctx.driver().ok();
        match driver {
            Some(driver) => {
                for (_, dest) in self.destinations.drain() {
                    dest.retire(driver);
                }
            }
            None => self.destinations.clear(),
        }
        self.shared.registry.clear();
        if removed > 0 {
            info!(count = removed, "All destinations removed");
        }
        Outcome::Removed(removed)
    }

    /// Drop destinations whose window went away
    fn prune_invalid(&mut self) {
        let Ok(driver) = self.ctx.driver() else {
            return;
        };
        let stale: Vec<DestinationId> = self
            .destinations
            .iter()
            .filter(|(_, dest)| !dest.target.is_valid(&*driver))
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            if let Some(mut dest) = self.destinations.remove(&id) {
                dest.target.release(driver);
            }
            self.shared.registry.remove(id);
            info!(id, "Pruned destination with invalid target");
        }
    }

    fn handle_mirror(&mut self, mode: MirrorMode) {
        let previous = std::mem::replace(&mut self.mirror, mode);
        for dest in self.destinations.values() {
            dest.attributes
                .update_transform(|m| m.remirror(previous, mode));
        }
        debug!(?mode, "Mirror applied");
    }

    fn handle_rotate(&mut self, degrees: f32, pivot: Option<[f32; 2]>) {
        self.rotation = Some((degrees, pivot));
        let transform = self.base_transform();
        for dest in self.destinations.values() {
            dest.attributes.set_transform(transform);
        }
        debug!(degrees, ?pivot, "Rotation applied");
    }

    fn handle_clear(&mut self, id: DestinationId, color: Color) -> EngineResult<()> {
        let Some(dest) = self.destinations.get(&id) else {
            return Ok(());
        };
        let driver = self.ctx.driver()?;
        if dest.target.is_valid(&*driver) {
            dest.fill(driver, color)?;
        }
        Ok(())
    }

    fn handle_clear_all(&mut self, color: Color) {
        let Ok(driver) = self.ctx.driver() else {
            return;
        };
        for (id, dest) in &self.destinations {
            if dest.target.is_valid(&*driver)
                && let Err(e) = dest.fill(driver, color)
            {
                warn!(id, error = %e, "Clear failed");
            }
        }
    }

    fn handle_set_transform(&mut self, id: DestinationId, matrix: Mat4) {
        match self.destinations.get(&id) {
            Some(dest) => dest.attributes.set_transform(matrix),
            None => debug!(id, "Transform for unknown destination ignored"),
        }
    }

    fn recreate_master(&mut self) -> EngineResult<()> {
        self.release_master();

        let (width, height) = self.video_size;
        let texture = self.ctx.driver()?.create_texture(width, height)?;
        let weak = Arc::downgrade(&self.shared);
        let input = InputSurface::new(
            width,
            height,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.first_frame.store(true, Ordering::Release);
                    if let Err(e) = shared.request_frame() {
                        trace!(error = %e, "Frame arrived after release");
                    }
                }
            }),
        );

        self.shared.first_frame.store(false, Ordering::Release);
        self.shared.set_input(Some(input.clone()));
        self.master = Some(Master {
            input: input.clone(),
            texture,
        });
        info!(width, height, "Input surface created");
        self.observer.master_surface_created(&input);
        Ok(())
    }

    fn release_master(&mut self) {
        if let Some(master) = self.master.take() {
            master.input.release();
            if let Ok(driver) = self.ctx.driver() {
                driver.delete_texture(master.texture);
            }
            self.shared.set_input(None);
            debug!("Input surface released");
        }
    }

    /// `Stopping`: tear down in order, then `Stopped`
    fn shutdown(mut self) {
        self.shared.set_worker_state(WorkerState::Stopping);
        self.shared.mark_released();
        self.shared.queue.quit();
        info!("Render worker stopping");

        if let Err(e) = self.ctx.make_default_current() {
            debug!(error = %e, "Final make-current failed");
        }
        if let Some(request) = self.shared.capture.begin() {
            self.shared.capture.finish(
                request.ticket,
                request.blocking,
                Completed {
                    result: Err(EngineError::AlreadyReleased),
                    sink: request.sink,
                },
            );
        }
        self.release_master();
        self.handle_remove_all();
        self.ctx.release();

        self.shared.close_waiters();
        self.shared.set_worker_state(WorkerState::Stopped);
        info!("Render worker stopped");
        self.observer.destroy();
    }
}
