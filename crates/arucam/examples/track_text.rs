use arucam::aruco::{DetectorParams, DictionarySource, Matcher};
use arucam::core::CameraModel;
use arucam::frames::{FrameSource, ImageSequence};
use arucam::track::MarkerTracker;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Some(dir) = std::env::args().nth(1) else {
        eprintln!("Usage: track_text <frames_dir>");
        return Ok(());
    };

    let dict = DictionarySource::default().load()?;
    let tracker = MarkerTracker::new(
        CameraModel::tracking_default(),
        Matcher::with_correction_rate(dict, 0.6),
        DetectorParams::default(),
        15,
        0.05,
    );

    let mut frames = ImageSequence::open(dir)?;
    while let Some(frame) = frames.next_frame() {
        let frame = frame?;
        let Some(target) = tracker.process_frame(&frame.image).target else {
            continue;
        };
        println!("{}: {}", frame.path.display(), target.rotation_text);
        println!("{}: {}", frame.path.display(), target.translation_text);
    }
    Ok(())
}
