//! arucam CLI: lens undistortion and ArUco marker pose tracking.

use arucam::aruco::{render_marker, DetectorParams, Dictionary, DictionarySource, MarkerDetector};
use arucam::detect::{detect_markers_rgb, load_rgb};
use arucam::frames::ImageSequence;
use arucam::io::{write_json, TrackConfig, UndistortConfig};
use arucam::track::{run_tracking, FrameWriter, LoopOptions, MarkerTracker, TrackRecorder, TrackSink};
use arucam::undistort::run_undistort;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "arucam")]
#[command(about = "Undistort camera frames and track the pose of ArUco markers")]
#[command(version)]
struct Cli {
    /// More log output (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit JSON log lines (requires the `tracing` feature).
    #[arg(long, global = true)]
    json_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Undistort one image and write the original/undistorted comparison.
    Undistort(UndistortArgs),

    /// Track one marker id over a recorded frame sequence.
    Track(TrackArgs),

    /// Detect all markers in one image and print them as JSON.
    Detect(DetectArgs),

    /// Generate a marker dictionary and write it as JSON.
    Dictionary(DictionaryArgs),

    /// Render a printable marker image.
    Marker(MarkerArgs),
}

#[derive(Debug, Args)]
struct UndistortArgs {
    /// JSON config; without it the built-in comparison camera is used.
    config: Option<PathBuf>,

    /// Input image (overrides the config).
    #[arg(long)]
    image: Option<PathBuf>,

    /// Free scaling parameter in [0, 1].
    #[arg(long)]
    alpha: Option<f64>,

    /// Output directory.
    #[arg(long)]
    out_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct TrackArgs {
    /// JSON config; without it `--frames` is required.
    config: Option<PathBuf>,

    /// Frame directory or single image.
    #[arg(long)]
    frames: Option<PathBuf>,

    /// Marker id to track.
    #[arg(long)]
    target_id: Option<u32>,

    /// Directory for annotated frames and the report.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<usize>,

    /// Stream to a rerun viewer (requires the `viewer` feature).
    #[arg(long)]
    viewer: bool,
}

#[derive(Debug, Args)]
struct DictionarySelect {
    /// Codes file; the generated default dictionary is used otherwise.
    #[arg(long)]
    dictionary: Option<PathBuf>,
}

impl DictionarySelect {
    fn load(&self) -> CliResult<Dictionary> {
        let source = match &self.dictionary {
            Some(path) => DictionarySource::File(path.clone()),
            None => DictionarySource::default(),
        };
        Ok(source.load()?)
    }
}

#[derive(Debug, Args)]
struct DetectArgs {
    /// Input image.
    image: PathBuf,

    #[command(flatten)]
    dictionary: DictionarySelect,

    /// Write the report here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct DictionaryArgs {
    #[arg(long, default_value = "ARUCAM_7X7_50")]
    name: String,

    /// Number of markers.
    #[arg(long, default_value_t = 50)]
    count: usize,

    /// Inner bits per marker side.
    #[arg(long, default_value_t = 7)]
    size: usize,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct MarkerArgs {
    #[arg(long, default_value_t = 15)]
    id: u32,

    /// Side length of the marker image.
    #[arg(long, default_value_t = 350)]
    pixels: usize,

    /// White quiet zone around the marker.
    #[arg(long, default_value_t = 0)]
    margin: u32,

    #[command(flatten)]
    dictionary: DictionarySelect,

    #[arg(long)]
    out: PathBuf,
}

fn init_logging(verbose: u8, json: bool) {
    let level = match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    #[cfg(feature = "tracing")]
    {
        let _ = tracing_log::LogTracer::init();
        arucam::core::init_tracing(json, &level.to_string().to_lowercase());
    }

    #[cfg(not(feature = "tracing"))]
    {
        if json {
            eprintln!("--json-log needs the `tracing` feature; using plain logs");
        }
        let _ = arucam::core::init_with_level(level);
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_log);

    let result = match cli.command {
        Commands::Undistort(args) => run_undistort_cmd(args),
        Commands::Track(args) => run_track_cmd(args),
        Commands::Detect(args) => run_detect_cmd(args),
        Commands::Dictionary(args) => run_dictionary_cmd(args),
        Commands::Marker(args) => run_marker_cmd(args),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run_undistort_cmd(args: UndistortArgs) -> CliResult<()> {
    let mut cfg = match &args.config {
        Some(path) => UndistortConfig::load_json(path)?,
        None => {
            let image = args
                .image
                .clone()
                .ok_or("an image is required (config file or --image)")?;
            serde_json::from_value(serde_json::json!({ "image_path": image }))?
        }
    };
    if let Some(image) = args.image {
        cfg.image_path = image;
    }
    if let Some(alpha) = args.alpha {
        cfg.alpha = alpha;
    }
    if let Some(dir) = args.out_dir {
        cfg.output_dir = dir;
    }

    let report = run_undistort(&cfg)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_track_cmd(args: TrackArgs) -> CliResult<()> {
    let mut cfg = match (&args.config, &args.frames) {
        (Some(path), _) => TrackConfig::load_json(path)?,
        (None, Some(frames)) => TrackConfig::new(frames.clone()),
        (None, None) => return Err("frames are required (config file or --frames)".into()),
    };
    if let Some(frames) = args.frames {
        cfg.frames = frames;
    }
    if let Some(id) = args.target_id {
        cfg.target_id = id;
    }
    if let Some(dir) = args.out_dir {
        cfg.output_dir = Some(dir);
    }
    if args.max_frames.is_some() {
        cfg.max_frames = args.max_frames;
    }
    cfg.viewer |= args.viewer;

    let tracker = MarkerTracker::from_config(&cfg)?;
    let mut source = ImageSequence::open(&cfg.frames)?;
    log::info!(
        "tracking marker {} over {} frames",
        cfg.target_id,
        source.len()
    );

    let mut sinks: Vec<Box<dyn TrackSink>> = Vec::new();
    if let Some(dir) = &cfg.output_dir {
        sinks.push(Box::new(FrameWriter::new(dir, cfg.axis_length)?));
    }
    sinks.push(Box::new(TrackRecorder::new(
        cfg.target_id,
        cfg.marker_length,
        cfg.report_path(),
    )));
    if cfg.viewer {
        push_viewer(&mut sinks, cfg.axis_length)?;
    }

    let cancel = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler({
        let cancel = cancel.clone();
        move || {
            eprintln!("Received Ctrl-C, stopping after the current frame");
            cancel.store(true, Ordering::SeqCst);
        }
    })?;

    let options = LoopOptions {
        pause: Duration::from_millis(cfg.pause_ms),
        max_frames: cfg.max_frames,
    };
    let summary = run_tracking(&mut source, &tracker, &mut sinks, &cancel, options)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[cfg(feature = "viewer")]
fn push_viewer(sinks: &mut Vec<Box<dyn TrackSink>>, axis_length: f64) -> CliResult<()> {
    let viewer = arucam::viewer::RerunViewer::spawn("arucam marker tracking", axis_length)?;
    sinks.push(Box::new(viewer));
    Ok(())
}

#[cfg(not(feature = "viewer"))]
fn push_viewer(_sinks: &mut Vec<Box<dyn TrackSink>>, _axis_length: f64) -> CliResult<()> {
    log::warn!("built without the `viewer` feature; live plots are disabled");
    Ok(())
}

#[derive(Serialize)]
struct DetectReport {
    image: PathBuf,
    dictionary: String,
    markers: Vec<arucam::aruco::DetectedMarker>,
    rejected: usize,
}

fn run_detect_cmd(args: DetectArgs) -> CliResult<()> {
    let rgb = load_rgb(&args.image)?;
    let dict = args.dictionary.load()?;
    let name = dict.name.clone();
    let detector = MarkerDetector::new(dict, DetectorParams::default());
    let detections = detect_markers_rgb(&rgb, &detector);

    let report = DetectReport {
        image: args.image,
        dictionary: name,
        rejected: detections.rejected.len(),
        markers: detections.markers,
    };
    match args.out {
        Some(path) => write_json(path, &report)?,
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn run_dictionary_cmd(args: DictionaryArgs) -> CliResult<()> {
    let dict = Dictionary::generate(args.name, args.count, args.size, args.seed)?;
    dict.write_json(&args.out)?;
    log::info!(
        "wrote {} ({} markers, min distance {}, corrects {} bits)",
        args.out.display(),
        dict.len(),
        dict.min_distance(),
        dict.max_correction_bits
    );
    Ok(())
}

fn run_marker_cmd(args: MarkerArgs) -> CliResult<()> {
    let dict = args.dictionary.load()?;
    let marker = render_marker(&dict, args.id, args.pixels, 1)?;
    let side = marker.width as u32;
    let mut img = image::GrayImage::from_pixel(
        side + 2 * args.margin,
        side + 2 * args.margin,
        image::Luma([255]),
    );
    for (i, &v) in marker.data.iter().enumerate() {
        let (x, y) = ((i % marker.width) as u32, (i / marker.width) as u32);
        img.put_pixel(x + args.margin, y + args.margin, image::Luma([v]));
    }
    img.save(&args.out)?;
    log::info!("wrote marker {} of {} to {}", args.id, dict.name, args.out.display());
    Ok(())
}
