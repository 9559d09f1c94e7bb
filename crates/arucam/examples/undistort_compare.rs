use arucam::core::CameraModel;
use arucam::detect::load_rgb;
use arucam::undistort::{side_by_side, undistort_image};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("Usage: undistort_compare <image_path> [out.png]");
        return Ok(());
    };
    let out = std::env::args()
        .nth(2)
        .unwrap_or_else(|| "comparison.png".to_string());

    let rgb = load_rgb(&path)?;
    let result = undistort_image(&rgb, &CameraModel::comparison_default(), 1.0)?;
    println!("roi: {:?}", result.roi);

    side_by_side(&rgb, &result.cropped).save(&out)?;
    println!("wrote {}", out);
    Ok(())
}
