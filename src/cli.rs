// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for the demo binary
//!
//! This module provides command-line functionality for:
//! - Fanning a synthetic stream out to in-memory windows
//! - Capturing a still from the stream
//! - Printing the effective engine configuration

use frame_fanout::gpu::software::{SoftwareDriver, SoftwareWindow};
use frame_fanout::gpu::wgpu_driver::WgpuDriver;
use frame_fanout::pipelines::still::{default_still_dir, timestamped_path};
use frame_fanout::{EngineConfig, RendererHolder, StillFormat, VideoFrame};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Load the configuration file if one was given
fn load_config(file: Option<&Path>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    match file {
        Some(path) => Ok(EngineConfig::from_json_file(path)?.normalized()),
        None => Ok(EngineConfig::default()),
    }
}

/// Graphics driver used by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Driver {
    /// CPU renderer
    Software,
    /// GPU renderer (Vulkan)
    Wgpu,
}

fn start_engine(
    driver: Driver,
    config: EngineConfig,
) -> Result<RendererHolder, Box<dyn std::error::Error>> {
    let holder = match driver {
        Driver::Software => RendererHolder::builder(SoftwareDriver::new()),
        Driver::Wgpu => RendererHolder::builder(WgpuDriver::new()),
    }
    .config(config)
    .build()?;
    Ok(holder)
}

/// Diagonal colour bands that move with `tick`
fn synthetic_frame(width: u32, height: u32, tick: u64) -> VideoFrame {
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            let band = ((x + y) as u64 + tick * 4) / 16 % 3;
            let shade = ((x * 255) / width.max(1)) as u8;
            let pixel = match band {
                0 => [255, shade, 0, 255],
                1 => [0, 255, shade, 255],
                _ => [shade, 0, 255, 255],
            };
            data.extend_from_slice(&pixel);
        }
    }
    VideoFrame::new(width, height, data)
        .map(|frame| frame.with_timestamp(tick))
        .unwrap_or_else(|_| VideoFrame::solid(width, height, [0, 0, 0, 255]))
}

/// Fan a synthetic stream out to `destinations` windows
pub fn run_demo(
    config_file: Option<PathBuf>,
    driver: Driver,
    destinations: u32,
    fps: u32,
    max_fps: u32,
    seconds: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_file.as_deref())?;
    let (width, height) = (config.width, config.height);
    let holder = start_engine(driver, config)?;
    println!(
        "Engine started: {}x{}, API version {}",
        width,
        height,
        holder.gl_version()
    );

    let mut windows = Vec::new();
    for index in 0..destinations {
        let window = SoftwareWindow::new(width / 2, height / 2);
        // Every other destination is capped
        let cap = (index % 2 == 1 && max_fps > 0).then_some(max_fps);
        holder.add_destination(index as i32, window.clone(), cap)?;
        windows.push((index, cap, window));
    }

    println!();
    println!("Streaming... (press Ctrl+C to stop early)");

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    let input = holder.input_surface()?;
    let frame_interval = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
    let start = Instant::now();
    let target_duration = Duration::from_secs(seconds);
    let mut tick = 0u64;

    while start.elapsed() < target_duration {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }

        input.push_frame(synthetic_frame(width, height, tick))?;
        tick += 1;

        let elapsed = start.elapsed().as_secs();
        print!("\rStreaming: {:02}:{:02}", elapsed / 60, elapsed % 60);
        std::io::Write::flush(&mut std::io::stdout())?;

        std::thread::sleep(frame_interval);
    }
    println!();

    let elapsed = start.elapsed().as_secs_f64();
    holder.release();

    println!("Frames pushed: {}", tick);
    for (index, cap, window) in &windows {
        let presented = window.presented_frames();
        let limit = cap.map(|c| format!("{} fps", c)).unwrap_or_else(|| "none".into());
        println!(
            "  [{}] cap {:>8}  presented {:>5}  ({:.1} fps)",
            index,
            limit,
            presented,
            presented as f64 / elapsed.max(f64::EPSILON)
        );
    }

    Ok(())
}

/// Push one synthetic frame and save a still of it
pub fn capture_still(
    config_file: Option<PathBuf>,
    driver: Driver,
    output: Option<PathBuf>,
    quality: i32,
) -> Result<(), Box<dyn std::error::Error>> {
    let output_path = match output {
        Some(path) if path.is_dir() => timestamped_path(&path, StillFormat::Jpeg),
        Some(path) => path,
        None => timestamped_path(&default_still_dir(), StillFormat::Jpeg),
    };

    let config = load_config(config_file.as_deref())?;
    let (width, height) = (config.width, config.height);
    let holder = start_engine(driver, config)?;

    println!("Capturing...");
    holder
        .input_surface()?
        .push_frame(synthetic_frame(width, height, 0))?;
    let result = holder.capture_still_to_path(&output_path, quality);
    holder.release();
    result?;

    println!("Still saved: {}", output_path.display());
    Ok(())
}

/// Print the effective configuration as JSON
pub fn print_config(config_file: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_file.as_deref())?.normalized();
    println!("{}", config.to_json_pretty()?);
    Ok(())
}
