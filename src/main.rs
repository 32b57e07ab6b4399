//! v4l2-capture binary: capture, convert and optionally save frames.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use image::ExtendedColorType;
use tracing::info;
use v4l2_capture::{logging, CaptureConfig, Error, Picture, PixelFormat, Result, V4L2Capture};

#[derive(Parser, Debug)]
#[command(
    name = "v4l2-capture",
    version,
    about = "Capture frames from a V4L2 device and convert them"
)]
struct Cli {
    /// Capture device node
    #[arg(long, value_name = "PATH", default_value = "/dev/video0")]
    device: PathBuf,

    /// Requested capture width (the driver may adjust it)
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Requested capture height (the driver may adjust it)
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Width of converted frames; defaults to the negotiated width
    #[arg(long)]
    out_width: Option<u32>,

    /// Height of converted frames; defaults to the negotiated height
    #[arg(long)]
    out_height: Option<u32>,

    /// Pixel format of converted frames (rgb24, bgr24, rgba, gray8, yuyv422, yuv420p)
    #[arg(long, value_name = "FORMAT", default_value = "rgb24")]
    out_format: PixelFormat,

    /// Number of frames to capture
    #[arg(long, default_value_t = 30)]
    frames: u32,

    /// Give up when no frame arrives within this many milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Number of kernel buffers in the ring
    #[arg(long, default_value_t = 4)]
    buffers: u32,

    /// Save the last converted frame as PNG (rgb24, rgba and gray8 only)
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Log filter (overridden by V4L2_CAPTURE_LOG)
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, std::io::stderr().is_terminal())?;

    let config = CaptureConfig::default()
        .with_buffer_count(cli.buffers)
        .with_dequeue_timeout(cli.timeout_ms.map(Duration::from_millis));

    let mut device = V4L2Capture::new(config);
    device.init_dev(&cli.device, cli.width, cli.height)?;

    if let Some(caps) = device.capabilities() {
        println!("Device: {}", caps.card);
        println!("Driver: {}", caps.driver);
    }
    for desc in device.formats() {
        println!("Format {}: {} ({})", desc.index, desc.fourcc, desc.description);
    }
    println!("Capture: {}x{}", device.width(), device.height());

    let mut picture = Picture::new(
        cli.out_format,
        cli.out_width.unwrap_or_else(|| device.width()),
        cli.out_height.unwrap_or_else(|| device.height()),
    );

    device.start_stream()?;
    for _ in 0..cli.frames {
        let meta = device.read_frame(&mut picture)?;
        println!(
            "Frame {}: {} bytes, buffer {}, timestamp: {:?}",
            meta.sequence, meta.bytes_used, meta.buffer_index, meta.timestamp
        );
    }
    device.stop_stream()?;

    if let Some(path) = &cli.output {
        save_png(&picture, path)?;
        info!(path = %path.display(), "saved last frame");
    }

    device.close()
}

fn save_png(picture: &Picture, path: &Path) -> Result<()> {
    let color = match picture.format() {
        PixelFormat::Rgb24 => ExtendedColorType::Rgb8,
        PixelFormat::Rgba => ExtendedColorType::Rgba8,
        PixelFormat::Gray8 => ExtendedColorType::L8,
        other => {
            return Err(Error::Config(format!(
                "cannot save {other:?} as PNG, use rgb24, rgba or gray8"
            )))
        }
    };
    let plane = picture
        .plane(0)
        .ok_or_else(|| Error::Conversion("picture has no planes".to_owned()))?;

    // `Picture::new` packs lines tightly, which is what the encoder expects.
    image::save_buffer(path, plane.data(), picture.width(), picture.height(), color)
        .map_err(|e| Error::Conversion(format!("cannot save {}: {e}", path.display())))
}
