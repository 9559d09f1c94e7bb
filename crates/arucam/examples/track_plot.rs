//! Live position and orientation plots in a rerun viewer.
//!
//! Run with `--features viewer`.

use arucam::frames::ImageSequence;
use arucam::io::TrackConfig;
use arucam::track::{run_tracking, LoopOptions, MarkerTracker, TrackSink};
use arucam::viewer::RerunViewer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Some(dir) = std::env::args().nth(1) else {
        eprintln!("Usage: track_plot <frames_dir>");
        return Ok(());
    };

    let cfg = TrackConfig::new(dir);
    let tracker = MarkerTracker::from_config(&cfg)?;
    let mut source = ImageSequence::open(&cfg.frames)?;
    let mut sinks: Vec<Box<dyn TrackSink>> =
        vec![Box::new(RerunViewer::spawn("arucam live plots", cfg.axis_length)?)];

    let cancel = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler({
        let cancel = cancel.clone();
        move || cancel.store(true, Ordering::SeqCst)
    })?;

    let summary = run_tracking(
        &mut source,
        &tracker,
        &mut sinks,
        &cancel,
        LoopOptions {
            pause: Duration::from_millis(cfg.pause_ms),
            max_frames: None,
        },
    )?;
    println!("{:?}", summary);
    Ok(())
}
