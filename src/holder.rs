// SPDX-License-Identifier: GPL-3.0-only

//! Distribution facade
//!
//! [`RendererHolder`] is the thread-safe entry point. Every call becomes one
//! or more queued commands for the render worker; registry changes block
//! until the worker has applied them, everything else is fire-and-forget.
//!
//! # Example
//!
//! ```no_run
//! use frame_fanout::gpu::software::{SoftwareDriver, SoftwareWindow};
//! use frame_fanout::{RendererHolder, StillFormat, VideoFrame};
//!
//! let holder = RendererHolder::builder(SoftwareDriver::new()).size(640, 480).build()?;
//! holder.add_destination(1, SoftwareWindow::new(320, 240), None)?;
//! holder
//!     .input_surface()?
//!     .push_frame(VideoFrame::solid(640, 480, [255, 0, 0, 255]))?;
//! let jpeg = holder.capture_still(Vec::new(), StillFormat::Jpeg, 80)?;
//! holder.release();
//! # Ok::<(), frame_fanout::EngineError>(())
//! ```

use crate::callback::{Observer, RenderHolderCallback};
use crate::config::{ContextFlags, EngineConfig};
use crate::constants::clamp_capture_quality;
use crate::errors::{EngineError, EngineResult};
use crate::gpu::{Color, ContextHandle, GraphicsDriver, Mat4, MirrorMode, NativeWindow};
use crate::pipelines::still::request::Completed;
use crate::pipelines::still::{CaptureSink, StillFormat};
use crate::render::registry::Outcome;
use crate::render::worker::{WorkerInitResult, WorkerParams, render_thread_main};
use crate::render::{
    Command, CommandQueue, DestinationId, EngineShared, InputSurface, LogAndContinue, OfferError,
    RunState, WorkerErrorPolicy, WorkerState,
};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Builder for [`RendererHolder`]
pub struct RendererHolderBuilder {
    driver: Box<dyn GraphicsDriver>,
    config: EngineConfig,
    callback: Option<Arc<dyn RenderHolderCallback>>,
    policy: Box<dyn WorkerErrorPolicy>,
}

impl RendererHolderBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.config.width = width;
        self.config.height = height;
        self
    }

    pub fn max_client_version(mut self, version: u32) -> Self {
        self.config.max_client_version = version;
        self
    }

    /// Construction bit mask (depth 0x01, recordable 0x02, stencil 0x04/0x20)
    pub fn flags(mut self, bits: u32) -> Self {
        self.config.flags = ContextFlags::from_bits(bits);
        self
    }

    pub fn shared_context(mut self, context: ContextHandle) -> Self {
        self.config.shared_context = Some(context);
        self
    }

    pub fn callback(mut self, callback: Arc<dyn RenderHolderCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn error_policy(mut self, policy: impl WorkerErrorPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Start the render worker and wait until it is ready
    pub fn build(self) -> EngineResult<RendererHolder> {
        RendererHolder::start(self)
    }
}

struct HolderInner {
    shared: Arc<EngineShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_thread: thread::ThreadId,
    config: EngineConfig,
    context: ContextHandle,
    version: u32,
}

impl HolderInner {
    fn release(&self) {
        let previous = self.shared.mark_released();
        if previous != RunState::Released {
            info!("Releasing renderer holder");
        }
        self.shared.queue.quit();

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if thread::current().id() == self.worker_thread {
            // Called from a callback; the worker finishes teardown on its own
            debug!("Release requested from the render worker");
            self.shared.close_waiters();
            return;
        }
        if let Some(handle) = handle
            && let Err(e) = handle.join()
        {
            error!("Render worker panicked: {:?}", e);
        }
        self.shared.close_waiters();
    }
}

impl Drop for HolderInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// Fans frames written into one input surface out to many destinations
///
/// Cloning is cheap; all clones drive the same engine. The engine is
/// released by [`release`](Self::release) or when the last clone drops.
#[derive(Clone)]
pub struct RendererHolder {
    inner: Arc<HolderInner>,
}

impl std::fmt::Debug for RendererHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererHolder")
            .field("run_state", &self.inner.shared.run_state())
            .field("context", &self.inner.context)
            .field("version", &self.inner.version)
            .field("destinations", &self.destination_count())
            .finish()
    }
}

impl RendererHolder {
    pub fn builder(driver: impl GraphicsDriver) -> RendererHolderBuilder {
        RendererHolderBuilder {
            driver: Box::new(driver),
            config: EngineConfig::default(),
            callback: None,
            policy: Box::new(LogAndContinue),
        }
    }

    /// Engine with default flags (recordable) and version ceiling
    pub fn new(
        driver: impl GraphicsDriver,
        width: u32,
        height: u32,
        callback: Option<Arc<dyn RenderHolderCallback>>,
    ) -> EngineResult<Self> {
        let mut builder = Self::builder(driver).size(width, height);
        builder.callback = callback;
        builder.build()
    }

    fn start(builder: RendererHolderBuilder) -> EngineResult<Self> {
        let RendererHolderBuilder {
            driver,
            config,
            callback,
            policy,
        } = builder;
        let config = config.normalized();
        let shared = Arc::new(EngineShared::new(
            config.command_queue_capacity,
            config.width,
            config.height,
        ));

        let (init_tx, init_rx) = std::sync::mpsc::sync_channel::<EngineResult<WorkerInitResult>>(1);
        let params = WorkerParams {
            driver,
            config: config.clone(),
            shared: Arc::clone(&shared),
            observer: Observer::new(callback),
            policy,
        };

        let worker = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                render_thread_main(params, init_tx);
            })
            .map_err(|e| EngineError::StartFailed(format!("spawn render thread: {}", e)))?;
        let worker_thread = worker.thread().id();

        let init = match init_rx.recv() {
            Ok(Ok(init)) => init,
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(EngineError::StartFailed(
                    "render thread died during initialization".to_string(),
                ));
            }
        };

        info!(
            width = config.width,
            height = config.height,
            version = init.version,
            "Renderer holder started"
        );

        Ok(Self {
            inner: Arc::new(HolderInner {
                shared,
                worker: Mutex::new(Some(worker)),
                worker_thread,
                config,
                context: init.context,
                version: init.version,
            }),
        })
    }

    fn shared(&self) -> &EngineShared {
        &self.inner.shared
    }

    fn retry_interval(&self) -> Duration {
        self.inner.config.registration_retry()
    }

    /// Enqueue, re-trying while the queue is full, then wait for the outcome
    fn offer_and_wait(&self, mut command: Command) -> EngineResult<Option<Outcome>> {
        let shared = self.shared();
        loop {
            shared.check_running()?;
            match shared.queue.offer(command) {
                Ok(seq) => return shared.registry.wait_applied(seq),
                Err(OfferError::Full(rejected)) => {
                    command = rejected;
                    shared.registry.pause(self.retry_interval());
                }
                Err(OfferError::Closed(_)) => return Err(EngineError::AlreadyReleased),
            }
        }
    }

    fn on_worker_thread(&self) -> bool {
        thread::current().id() == self.inner.worker_thread
    }

    /// Enqueue without waiting for the worker, re-trying while the queue is full
    ///
    /// Returns `false` when the command had to be dropped: only a callback
    /// running on the worker itself can hit that, since nothing drains the
    /// queue while it waits.
    fn enqueue(&self, command: Command) -> EngineResult<bool> {
        self.enqueue_with(command, |queue, command| queue.offer(command))
    }

    fn enqueue_with(
        &self,
        mut command: Command,
        offer: impl Fn(&CommandQueue, Command) -> Result<u64, OfferError>,
    ) -> EngineResult<bool> {
        let shared = self.shared();
        loop {
            shared.check_running()?;
            match offer(&shared.queue, command) {
                Ok(_) => return Ok(true),
                Err(OfferError::Closed(_)) => return Err(EngineError::AlreadyReleased),
                Err(OfferError::Full(rejected)) if self.on_worker_thread() => {
                    warn!(
                        command = rejected.name(),
                        "Command queue full on the render worker, request dropped"
                    );
                    return Ok(false);
                }
                Err(OfferError::Full(rejected)) => {
                    trace!(command = rejected.name(), "Command queue full, retrying");
                    command = rejected;
                    shared.registry.pause(self.retry_interval());
                }
            }
        }
    }

    /// Queue a coalesced draw that is never lost to a full queue
    fn enqueue_draw(&self) -> EngineResult<bool> {
        self.enqueue_with(Command::Draw, |queue, command| {
            queue.offer_replacing(command, Command::is_draw)
        })
    }

    pub fn is_running(&self) -> bool {
        self.shared().is_running()
    }

    pub fn run_state(&self) -> RunState {
        self.shared().run_state()
    }

    pub fn worker_state(&self) -> WorkerState {
        self.shared().worker_state()
    }

    /// Native handle of the worker's context; immutable once started
    pub fn context(&self) -> ContextHandle {
        self.inner.context
    }

    /// Graphics API version the context ladder settled on
    pub fn gl_version(&self) -> u32 {
        self.inner.version
    }

    /// Configuration the engine was started with
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Surface the frame producer writes into
    pub fn input_surface(&self) -> EngineResult<InputSurface> {
        self.shared().check_running()?;
        self.shared()
            .current_input()
            .ok_or(EngineError::AlreadyReleased)
    }

    /// Recreate the input surface if the producer invalidated it; blocks until done
    pub fn reset(&self) -> EngineResult<()> {
        self.shared().check_running()?;
        if self
            .shared()
            .current_input()
            .is_some_and(|input| input.is_valid())
        {
            return Ok(());
        }
        match self.offer_and_wait(Command::RecreateMaster)? {
            Some(Outcome::Failed(e)) => Err(e),
            _ => Ok(()),
        }
    }

    /// Register a destination window
    ///
    /// Returns `true` when added, `false` when `id` was already registered
    /// (the first registration is kept). Blocks until the worker applied it.
    pub fn add_destination(
        &self,
        id: DestinationId,
        window: Arc<dyn NativeWindow>,
        max_fps: Option<u32>,
    ) -> EngineResult<bool> {
        self.shared().check_running()?;
        let kind = window.kind();
        if !kind.is_supported() {
            return Err(EngineError::UnsupportedTarget(kind));
        }
        if self.shared().registry.contains(id) {
            return Ok(false);
        }
        let outcome = self.offer_and_wait(Command::AddDestination {
            id,
            window,
            max_fps,
        })?;
        match outcome {
            Some(Outcome::Added) => Ok(true),
            Some(Outcome::AlreadyPresent) => Ok(false),
            Some(Outcome::Failed(e)) => Err(e),
            _ => Ok(self.contains(id)),
        }
    }

    /// Remove a destination; `false` when `id` is unknown
    pub fn remove_destination(&self, id: DestinationId) -> EngineResult<bool> {
        self.shared().check_running()?;
        if !self.shared().registry.contains(id) {
            return Ok(false);
        }
        let outcome = self.offer_and_wait(Command::RemoveDestination { id })?;
        Ok(matches!(outcome, Some(Outcome::Removed(n)) if n > 0))
    }

    /// Remove every destination; returns how many were removed
    pub fn remove_all_destinations(&self) -> EngineResult<usize> {
        match self.offer_and_wait(Command::RemoveAll)? {
            Some(Outcome::Removed(n)) => Ok(n),
            _ => Ok(0),
        }
    }

    pub fn contains(&self, id: DestinationId) -> bool {
        self.shared().registry.contains(id)
    }

    pub fn destination_count(&self) -> usize {
        self.shared().registry.len()
    }

    pub fn destination_ids(&self) -> Vec<DestinationId> {
        self.shared().registry.ids()
    }

    /// `None` for an unknown destination
    pub fn is_enabled(&self, id: DestinationId) -> Option<bool> {
        self.shared()
            .registry
            .get(id)
            .map(|attributes| attributes.is_enabled())
    }

    /// Toggle drawing for one destination; takes effect on the next draw pass
    pub fn set_enabled(&self, id: DestinationId, enabled: bool) -> EngineResult<bool> {
        self.shared().check_running()?;
        match self.shared().registry.get(id) {
            Some(attributes) => {
                attributes.set_enabled(enabled);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn transform(&self, id: DestinationId) -> Option<Mat4> {
        self.shared()
            .registry
            .get(id)
            .map(|attributes| attributes.transform())
    }

    pub fn max_fps(&self, id: DestinationId) -> Option<u32> {
        self.shared()
            .registry
            .get(id)
            .and_then(|attributes| attributes.max_fps())
    }

    /// Ask for a redraw; queued draws collapse into one
    pub fn request_frame(&self) -> EngineResult<()> {
        self.shared().request_frame()
    }

    /// Change the input size; zero or unchanged sizes are ignored
    pub fn resize(&self, width: u32, height: u32) -> EngineResult<()> {
        self.shared().check_running()?;
        if width == 0 || height == 0 {
            return Ok(());
        }
        // Held across the enqueue so the recorded size always matches what
        // the worker will apply
        let mut size = self.shared().size.lock().unwrap_or_else(PoisonError::into_inner);
        if *size == (width, height) {
            return Ok(());
        }
        if self.enqueue(Command::Resize { width, height })? {
            *size = (width, height);
        }
        Ok(())
    }

    pub fn size(&self) -> (u32, u32) {
        *self.shared().size.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_mirror(&self, mode: MirrorMode) -> EngineResult<()> {
        self.shared().check_running()?;
        let mut mirror = self.shared().mirror.lock().unwrap_or_else(PoisonError::into_inner);
        if *mirror == mode {
            return Ok(());
        }
        if self.enqueue(Command::Mirror(mode))? {
            *mirror = mode;
        }
        Ok(())
    }

    pub fn mirror(&self) -> MirrorMode {
        *self.shared().mirror.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rotate every destination about `pivot` (clip space, origin by default)
    pub fn rotate(&self, degrees: f32, pivot: Option<[f32; 2]>) -> EngineResult<()> {
        self.enqueue(Command::Rotate { degrees, pivot }).map(|_| ())
    }

    /// Replace one destination's transform
    pub fn set_transform(&self, id: DestinationId, matrix: Mat4) -> EngineResult<()> {
        self.enqueue(Command::SetTransform { id, matrix }).map(|_| ())
    }

    /// Fill one destination with an ARGB colour and present it
    pub fn clear(&self, id: DestinationId, color: Color) -> EngineResult<()> {
        self.enqueue(Command::Clear { id, color }).map(|_| ())
    }

    pub fn clear_all(&self, color: Color) -> EngineResult<()> {
        self.enqueue(Command::ClearAll(color)).map(|_| ())
    }

    fn submit_still(
        &self,
        sink: Box<dyn CaptureSink>,
        format: StillFormat,
        quality: i32,
        blocking: bool,
    ) -> EngineResult<u64> {
        let shared = self.shared();
        shared.check_running()?;
        let quality = clamp_capture_quality(quality);
        let ticket = shared.capture.submit(sink, format, quality, blocking)?;
        debug!(ticket, ?format, quality, blocking, "Still capture requested");
        // A capture is served by the next draw, so that draw must not be lost.
        // If it is dropped here the worker schedules one once its queue drains.
        self.enqueue_draw()?;
        Ok(ticket)
    }

    /// Capture the next frame into `sink` and hand the sink back
    ///
    /// Blocks until the image was written or the engine stopped. Quality
    /// outside 1..=99 falls back to 90 and is ignored for lossless formats.
    pub fn capture_still<W>(&self, sink: W, format: StillFormat, quality: i32) -> EngineResult<W>
    where
        W: Write + Send + 'static,
    {
        let ticket = self.submit_still(Box::new(sink), format, quality, true)?;
        let Completed { result, sink } = self
            .shared()
            .capture
            .wait(ticket, self.inner.config.capture_poll())?;
        result?;
        sink.into_any()
            .downcast::<W>()
            .map(|sink| *sink)
            .map_err(|_| EngineError::InvalidArgument("capture sink type changed".into()))
    }

    /// Queue a capture and return immediately; failures go to `on_error`
    pub fn request_still<W>(&self, sink: W, format: StillFormat, quality: i32) -> EngineResult<()>
    where
        W: Write + Send + 'static,
    {
        self.submit_still(Box::new(sink), format, quality, false)
            .map(|_| ())
    }

    /// Capture to a file; the format follows the extension
    pub fn capture_still_to_path(&self, path: impl AsRef<Path>, quality: i32) -> EngineResult<()> {
        let path = path.as_ref();
        let format = StillFormat::from_path(path)?;
        self.shared().check_running()?;
        // Reject before the file is created so an existing file is not truncated
        if self.is_capturing() {
            return Err(EngineError::CaptureInProgress);
        }
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        self.capture_still(BufWriter::new(file), format, quality)?;
        info!(path = %path.display(), "Still saved");
        Ok(())
    }

    /// Async wrapper around [`capture_still`](Self::capture_still)
    ///
    /// The blocking wait runs on tokio's blocking pool.
    pub async fn capture_still_async<W>(
        &self,
        sink: W,
        format: StillFormat,
        quality: i32,
    ) -> EngineResult<W>
    where
        W: Write + Send + 'static,
    {
        let holder = self.clone();
        tokio::task::spawn_blocking(move || holder.capture_still(sink, format, quality))
            .await
            .map_err(|e| EngineError::WorkerPanicked(format!("capture task: {}", e)))?
    }

    /// A capture is outstanding
    pub fn is_capturing(&self) -> bool {
        self.shared().capture.is_pending()
    }

    /// Stop the worker and release every resource; later calls do nothing
    ///
    /// Safe to call from any thread, including from inside a callback.
    pub fn release(&self) {
        self.inner.release();
    }
}
