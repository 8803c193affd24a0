// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for destination management and drawing

mod common;

use common::{BLUE, CLEARED, Gate, RED, Recorder, parked_holder, split_frame, wait_for};
use frame_fanout::gpu::software::{AcceptPolicy, SoftwareDriver, SoftwareWindow};
use frame_fanout::render::StopAfter;
use frame_fanout::{
    Color, EngineError, GraphicsError, Mat4, MirrorMode, RendererHolder, RunState,
    VideoFrame, WindowKind, WorkerState,
};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

fn holder_with(recorder: &Arc<Recorder>) -> RendererHolder {
    RendererHolder::builder(SoftwareDriver::new())
        .size(64, 48)
        .callback(recorder.clone())
        .build()
        .unwrap()
}

#[test]
fn test_fanout_to_two_destinations() {
    let recorder = Arc::new(Recorder::default());
    let holder = holder_with(&recorder);
    let small = SoftwareWindow::new(32, 24);
    let full = SoftwareWindow::new(64, 48);

    assert!(holder.add_destination(1, small.clone(), None).unwrap());
    assert!(holder.add_destination(2, full.clone(), None).unwrap());
    assert_eq!(holder.destination_ids(), vec![1, 2]);

    holder
        .input_surface()
        .unwrap()
        .push_frame(VideoFrame::solid(64, 48, RED))
        .unwrap();
    assert!(wait_for(|| small.presented_frames() > 0 && full.presented_frames() > 0));
    assert_eq!(small.last_frame().unwrap().pixel(5, 5), Some(RED));
    assert_eq!(full.last_frame().unwrap().pixel(63, 47), Some(RED));
    assert!(wait_for(|| recorder.frames.load(std::sync::atomic::Ordering::SeqCst) > 0));

    // Removal blanks the window before releasing it
    assert!(holder.remove_destination(1).unwrap());
    assert_eq!(small.last_frame().unwrap().pixel(5, 5), Some(CLEARED));
    assert_eq!(holder.destination_count(), 1);
    assert!(!holder.contains(1));

    holder.release();
    assert_eq!(recorder.destroyed(), 1);
    assert!(recorder.errors().is_empty());
}

#[test]
fn test_duplicate_add_keeps_first_registration() {
    let holder = RendererHolder::new(SoftwareDriver::new(), 32, 32, None).unwrap();
    let first = SoftwareWindow::new(16, 16);
    let second = SoftwareWindow::new(16, 16);

    assert!(holder.add_destination(7, first.clone(), None).unwrap());
    assert!(!holder.add_destination(7, second.clone(), Some(5)).unwrap());
    assert_eq!(holder.destination_count(), 1);
    assert_eq!(holder.max_fps(7), None);

    holder
        .input_surface()
        .unwrap()
        .push_frame(VideoFrame::solid(32, 32, BLUE))
        .unwrap();
    assert!(wait_for(|| first.presented_frames() > 0));
    assert_eq!(second.presented_frames(), 0);
    holder.release();
}

#[test]
fn test_remove_is_idempotent() {
    let holder = RendererHolder::new(SoftwareDriver::new(), 32, 32, None).unwrap();
    assert!(!holder.remove_destination(3).unwrap());

    holder
        .add_destination(3, SoftwareWindow::new(8, 8), None)
        .unwrap();
    assert!(holder.remove_destination(3).unwrap());
    assert!(!holder.remove_destination(3).unwrap());
    assert_eq!(holder.destination_count(), 0);
    holder.release();
}

#[test]
fn test_remove_all_destinations() {
    let holder = RendererHolder::new(SoftwareDriver::new(), 32, 32, None).unwrap();
    for id in 0..5 {
        holder
            .add_destination(id, SoftwareWindow::new(8, 8), None)
            .unwrap();
    }
    assert_eq!(holder.remove_all_destinations().unwrap(), 5);
    assert_eq!(holder.destination_count(), 0);
    assert_eq!(holder.remove_all_destinations().unwrap(), 0);
    holder.release();
}

#[test]
fn test_unsupported_window_kind_rejected() {
    let holder = RendererHolder::new(SoftwareDriver::new(), 32, 32, None).unwrap();
    let other = SoftwareWindow::with_kind(8, 8, WindowKind::Other);
    assert!(matches!(
        holder.add_destination(1, other, None),
        Err(EngineError::UnsupportedTarget(WindowKind::Other))
    ));
    assert!(!holder.contains(1));

    // Producer-consumer and texture-backed windows are fine
    let consumer = SoftwareWindow::with_kind(8, 8, WindowKind::Consumer);
    let texture = SoftwareWindow::with_kind(8, 8, WindowKind::Texture);
    assert!(holder.add_destination(2, consumer, None).unwrap());
    assert!(holder.add_destination(3, texture, None).unwrap());
    holder.release();
}

#[test]
fn test_window_surface_failure_is_reported() {
    let recorder = Arc::new(Recorder::default());
    let driver = SoftwareDriver::with_policy(AcceptPolicy {
        fail_window_surfaces: true,
        ..AcceptPolicy::default()
    });
    let holder = RendererHolder::builder(driver)
        .callback(recorder.clone())
        .build()
        .unwrap();

    let err = holder
        .add_destination(5, SoftwareWindow::new(8, 8), None)
        .unwrap_err();
    assert!(matches!(err, EngineError::TargetCreationFailed(5)));
    assert!(!holder.contains(5));
    assert!(
        recorder
            .errors()
            .iter()
            .any(|e| matches!(e, EngineError::TargetCreationFailed(5)))
    );
    assert!(holder.is_running());
    holder.release();
}

#[test]
fn test_disabled_destination_is_skipped() {
    let holder = RendererHolder::new(SoftwareDriver::new(), 16, 16, None).unwrap();
    let shown = SoftwareWindow::new(16, 16);
    let hidden = SoftwareWindow::new(16, 16);
    holder.add_destination(1, shown.clone(), None).unwrap();
    holder.add_destination(2, hidden.clone(), None).unwrap();

    assert!(holder.set_enabled(2, false).unwrap());
    assert_eq!(holder.is_enabled(2), Some(false));
    assert!(!holder.set_enabled(99, false).unwrap());
    assert_eq!(holder.is_enabled(99), None);

    holder
        .input_surface()
        .unwrap()
        .push_frame(VideoFrame::solid(16, 16, RED))
        .unwrap();
    assert!(wait_for(|| shown.presented_frames() > 0));
    assert_eq!(hidden.presented_frames(), 0);

    holder.set_enabled(2, true).unwrap();
    holder.request_frame().unwrap();
    assert!(wait_for(|| hidden.presented_frames() > 0));
    holder.release();
}

#[test]
fn test_lost_window_is_dropped() {
    let recorder = Arc::new(Recorder::default());
    let holder = holder_with(&recorder);
    let window = SoftwareWindow::new(16, 16);
    holder.add_destination(1, window.clone(), None).unwrap();

    window.destroy();
    holder
        .input_surface()
        .unwrap()
        .push_frame(VideoFrame::solid(64, 48, RED))
        .unwrap();

    assert!(wait_for(|| !holder.contains(1)));
    assert!(wait_for(|| {
        recorder
            .errors()
            .iter()
            .any(|e| matches!(e, EngineError::Graphics(GraphicsError::InvalidTarget)))
    }));
    assert!(holder.is_running());
    holder.release();
}

#[test]
fn test_throttled_destination_respects_ceiling() {
    let holder = RendererHolder::new(SoftwareDriver::new(), 16, 16, None).unwrap();
    let fast = SoftwareWindow::new(16, 16);
    let slow = SoftwareWindow::new(16, 16);
    holder.add_destination(1, fast.clone(), None).unwrap();
    holder.add_destination(2, slow.clone(), Some(10)).unwrap();
    assert_eq!(holder.max_fps(2), Some(10));

    let input = holder.input_surface().unwrap();
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(600) {
        input.push_frame(VideoFrame::solid(16, 16, RED)).unwrap();
        std::thread::sleep(Duration::from_millis(2));
    }
    let slow_count = slow.presented_frames();
    let fast_count = fast.presented_frames();
    let elapsed = start.elapsed().as_secs_f64();

    assert!(slow_count >= 1);
    assert!(slow_count as f64 <= (elapsed * 10.0).floor() + 1.0);
    assert!(fast_count >= slow_count);
    holder.release();
}

#[test]
fn test_frame_bursts_are_coalesced() {
    let gate = Arc::new(Gate::default());
    let holder = RendererHolder::builder(SoftwareDriver::new())
        .size(16, 16)
        .callback(gate.clone())
        .build()
        .unwrap();
    let window = SoftwareWindow::new(16, 16);
    holder.add_destination(1, window.clone(), None).unwrap();

    let input = holder.input_surface().unwrap();
    input.push_frame(VideoFrame::solid(16, 16, RED)).unwrap();
    assert!(gate.wait_entered());
    assert_eq!(window.presented_frames(), 1);

    // The worker is parked; every request below lands on the same queued draw
    for i in 0..50u32 {
        let color = if i == 49 { BLUE } else { RED };
        input.push_frame(VideoFrame::solid(16, 16, color)).unwrap();
        holder.request_frame().unwrap();
    }
    gate.open();

    assert!(wait_for(|| window.presented_frames() == 2));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(window.presented_frames(), 2);
    assert_eq!(window.last_frame().unwrap().pixel(0, 0), Some(BLUE));
    holder.release();
}

#[test]
fn test_mirror_flips_destinations() {
    let holder = RendererHolder::new(SoftwareDriver::new(), 64, 48, None).unwrap();
    let window = SoftwareWindow::new(64, 48);
    holder.add_destination(1, window.clone(), None).unwrap();

    holder.set_mirror(MirrorMode::Horizontal).unwrap();
    assert_eq!(holder.mirror(), MirrorMode::Horizontal);
    holder
        .input_surface()
        .unwrap()
        .push_frame(split_frame(64, 48))
        .unwrap();

    assert!(wait_for(|| window.presented_frames() > 0));
    let frame = window.last_frame().unwrap();
    assert_eq!(frame.pixel(0, 10), Some(BLUE));
    assert_eq!(frame.pixel(63, 10), Some(RED));
    assert_eq!(holder.transform(1).unwrap().get(0, 0), -1.0);

    // Destinations added later inherit the mirror
    holder
        .add_destination(2, SoftwareWindow::new(8, 8), None)
        .unwrap();
    assert_eq!(holder.transform(2).unwrap().get(0, 0), -1.0);

    holder.set_mirror(MirrorMode::Normal).unwrap();
    assert!(wait_for(|| holder.transform(1).unwrap().get(0, 0) == 1.0));
    holder.release();
}

#[test]
fn test_rotation_applies_to_all_destinations() {
    let holder = RendererHolder::new(SoftwareDriver::new(), 32, 32, None).unwrap();
    holder
        .add_destination(1, SoftwareWindow::new(8, 8), None)
        .unwrap();
    holder.rotate(90.0, None).unwrap();

    let expected = Mat4::rotation_z(90.0);
    assert!(wait_for(|| holder.transform(1).unwrap().approx_eq(&expected, 1e-5)));

    holder
        .add_destination(2, SoftwareWindow::new(8, 8), None)
        .unwrap();
    assert!(holder.transform(2).unwrap().approx_eq(&expected, 1e-5));
    holder.release();
}

#[test]
fn test_set_transform_and_clear() {
    let holder = RendererHolder::new(SoftwareDriver::new(), 32, 32, None).unwrap();
    let window = SoftwareWindow::new(32, 32);
    holder.add_destination(1, window.clone(), None).unwrap();

    holder
        .clear(1, Color::from_argb(0xff, 0, 0, 0xff))
        .unwrap();
    assert!(wait_for(|| {
        window
            .last_frame()
            .is_some_and(|frame| frame.pixel(0, 0) == Some(BLUE))
    }));

    let half = Mat4::scale(0.5, 0.5, 1.0);
    holder.set_transform(1, half).unwrap();
    assert!(wait_for(|| holder.transform(1) == Some(half)));
    holder
        .input_surface()
        .unwrap()
        .push_frame(VideoFrame::solid(32, 32, RED))
        .unwrap();
    assert!(wait_for(|| {
        window
            .last_frame()
            .is_some_and(|frame| frame.pixel(16, 16) == Some(RED))
    }));
    let frame = window.last_frame().unwrap();
    assert_eq!(frame.pixel(0, 0), Some(CLEARED));

    holder.clear_all(Color::BLACK).unwrap();
    assert!(wait_for(|| {
        window
            .last_frame()
            .is_some_and(|frame| frame.pixel(16, 16) == Some([0, 0, 0, 255]))
    }));
    holder.release();
}

#[test]
fn test_reset_recreates_input_surface() {
    let recorder = Arc::new(Recorder::default());
    let holder = holder_with(&recorder);
    assert_eq!(recorder.created(), 1);

    let old = holder.input_surface().unwrap();
    holder.reset().unwrap();
    assert_eq!(recorder.created(), 1, "valid surface is kept");

    old.release();
    holder.reset().unwrap();
    let new = holder.input_surface().unwrap();
    assert!(!new.same_surface(&old));
    assert_eq!(recorder.created(), 2);
    assert!(matches!(
        old.push_frame(VideoFrame::solid(64, 48, RED)),
        Err(EngineError::AlreadyReleased)
    ));
    new.push_frame(VideoFrame::solid(64, 48, RED)).unwrap();
    holder.release();
}

#[test]
fn test_release_tears_everything_down() {
    let recorder = Arc::new(Recorder::default());
    let driver = SoftwareDriver::new();
    let stats = driver.stats();
    let holder = RendererHolder::builder(driver)
        .callback(recorder.clone())
        .build()
        .unwrap();
    let window = SoftwareWindow::new(8, 8);
    holder.add_destination(1, window, None).unwrap();
    let input = holder.input_surface().unwrap();

    holder.release();
    assert!(!holder.is_running());
    assert_eq!(holder.run_state(), RunState::Released);
    assert_eq!(holder.worker_state(), WorkerState::Stopped);
    assert_eq!(recorder.destroyed(), 1);
    assert_eq!(stats.live_contexts(), 0);
    assert_eq!(stats.live_surfaces(), 0);
    assert_eq!(stats.live_textures(), 0);
    assert!(!input.is_valid());

    holder.release();
    assert_eq!(recorder.destroyed(), 1);
    assert!(matches!(
        holder.remove_destination(1),
        Err(EngineError::AlreadyReleased)
    ));
}

#[test]
fn test_dropping_last_clone_releases() {
    let recorder = Arc::new(Recorder::default());
    let holder = holder_with(&recorder);
    let clone = holder.clone();
    drop(holder);
    assert!(clone.is_running());
    drop(clone);
    assert_eq!(recorder.destroyed(), 1);
}

#[derive(Default)]
struct ReleaseOnFrame {
    holder: OnceLock<RendererHolder>,
}

impl frame_fanout::RenderHolderCallback for ReleaseOnFrame {
    fn on_frame_available(&self) {
        if let Some(holder) = self.holder.get() {
            holder.release();
        }
    }
}

#[test]
fn test_release_from_callback() {
    let callback = Arc::new(ReleaseOnFrame::default());
    let holder = RendererHolder::builder(SoftwareDriver::new())
        .size(16, 16)
        .callback(callback.clone())
        .build()
        .unwrap();
    let _ = callback.holder.set(holder.clone());

    holder
        .input_surface()
        .unwrap()
        .push_frame(VideoFrame::solid(16, 16, RED))
        .unwrap();
    assert!(wait_for(|| holder.worker_state() == WorkerState::Stopped));
    assert!(!holder.is_running());
    holder.release();
}

#[test]
fn test_no_usable_config_fails_construction() {
    let driver = SoftwareDriver::with_policy(AcceptPolicy {
        reject_all: true,
        ..AcceptPolicy::default()
    });
    let stats = driver.stats();
    let err = RendererHolder::new(driver, 64, 48, None).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Graphics(GraphicsError::NoUsableConfig)
    ));
    assert_eq!(stats.live_contexts(), 0);
}

#[test]
fn test_version_ladder_falls_back() {
    let driver = SoftwareDriver::with_policy(AcceptPolicy {
        max_version: 2,
        reject_recordable: true,
        ..AcceptPolicy::default()
    });
    let holder = RendererHolder::builder(driver)
        .max_client_version(3)
        .flags(0x02)
        .build()
        .unwrap();
    assert_eq!(holder.gl_version(), 2);
    holder.release();
}

#[test]
fn test_registration_waits_for_queue_space() {
    let gate = Arc::new(Gate::default());
    let holder = parked_holder(&gate);

    let adder = {
        let holder = holder.clone();
        thread::spawn(move || holder.add_destination(2, SoftwareWindow::new(8, 8), None))
    };
    thread::sleep(Duration::from_millis(30));
    assert!(!holder.contains(2));
    assert!(!adder.is_finished());

    gate.open();
    assert!(adder.join().unwrap().unwrap());
    assert!(holder.contains(2));
    assert_eq!(holder.destination_count(), 2);

    assert!(holder.remove_destination(2).unwrap());
    holder.release();
}

#[test]
fn test_mirror_and_resize_are_not_lost_on_full_queue() {
    let gate = Arc::new(Gate::default());
    let holder = parked_holder(&gate);
    let input = holder.input_surface().unwrap();

    let caller = {
        let holder = holder.clone();
        thread::spawn(move || {
            holder.set_mirror(MirrorMode::Horizontal).unwrap();
            holder.resize(8, 8).unwrap();
        })
    };
    thread::sleep(Duration::from_millis(30));
    assert!(!caller.is_finished());
    gate.open();
    caller.join().unwrap();

    assert_eq!(holder.mirror(), MirrorMode::Horizontal);
    assert!(wait_for(|| holder.transform(1).unwrap().get(0, 0) == -1.0));
    assert_eq!(holder.size(), (8, 8));
    assert!(wait_for(|| input.default_size() == (8, 8)));

    // Repeating the same values stays a no-op
    holder.set_mirror(MirrorMode::Horizontal).unwrap();
    holder.resize(8, 8).unwrap();
    assert_eq!(holder.transform(1).unwrap().get(0, 0), -1.0);
    holder.release();
}

#[test]
fn test_stop_policy_shuts_the_engine_down() {
    let recorder = Arc::new(Recorder::default());
    let driver = SoftwareDriver::with_policy(AcceptPolicy {
        fail_texture_uploads: true,
        ..AcceptPolicy::default()
    });
    let stats = driver.stats();
    let holder = RendererHolder::builder(driver)
        .size(16, 16)
        .callback(recorder.clone())
        .error_policy(StopAfter::new(1))
        .build()
        .unwrap();
    holder
        .add_destination(1, SoftwareWindow::new(16, 16), None)
        .unwrap();

    holder
        .input_surface()
        .unwrap()
        .push_frame(VideoFrame::solid(16, 16, RED))
        .unwrap();
    assert!(wait_for(|| holder.worker_state() == WorkerState::Stopped));
    assert_eq!(holder.run_state(), RunState::Released);
    assert_eq!(recorder.destroyed(), 1);
    assert!(
        recorder
            .errors()
            .iter()
            .any(|e| matches!(e, EngineError::Graphics(_)))
    );
    assert_eq!(stats.live_contexts(), 0);
    assert!(matches!(
        holder.add_destination(2, SoftwareWindow::new(8, 8), None),
        Err(EngineError::AlreadyReleased)
    ));

    holder.release();
    assert_eq!(recorder.destroyed(), 1);
}
