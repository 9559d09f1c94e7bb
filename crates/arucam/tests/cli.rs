use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

fn arucam() -> Command {
    Command::cargo_bin("arucam").expect("binary")
}

fn render_marker_png(path: &Path, id: u32) {
    arucam()
        .args(["marker", "--id", &id.to_string(), "--pixels", "140", "--margin", "30", "--out"])
        .arg(path)
        .assert()
        .success();
}

#[test]
fn dictionary_command_writes_codes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("dict.json");
    arucam()
        .args(["dictionary", "--count", "12", "--size", "5", "--seed", "4", "--out"])
        .arg(&out)
        .assert()
        .success();

    let raw = std::fs::read_to_string(&out).expect("dictionary file");
    let json: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(json["marker_size"], 5);
    assert_eq!(json["codes"].as_array().map(Vec::len), Some(12));
}

#[test]
fn rendered_marker_is_detected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let png = dir.path().join("marker15.png");
    render_marker_png(&png, 15);

    let img = image::open(&png).expect("png").to_luma8();
    assert_eq!(img.dimensions(), (200, 200));

    arucam()
        .arg("detect")
        .arg(&png)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"id\": 15"));
}

#[test]
fn undistort_reports_missing_image() {
    let dir = tempfile::tempdir().expect("tempdir");
    arucam()
        .args(["undistort", "--image"])
        .arg(dir.path().join("nope.jpg"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("image not found"));
}

#[test]
fn undistort_writes_comparison() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("scene.png");
    image::RgbImage::from_fn(96, 64, |x, y| image::Rgb([(x * 2) as u8, (y * 3) as u8, 90]))
        .save(&input)
        .expect("save");

    let config = dir.path().join("undistort.json");
    let cfg = serde_json::json!({
        "image_path": input,
        "camera": {
            "camera_matrix": [[120.0, 0.0, 47.5], [0.0, 120.0, 31.5], [0.0, 0.0, 1.0]],
            "dist_coeffs": [-0.2, 0.05, 0.0, 0.0, 0.0]
        },
        "output_dir": dir.path().join("out")
    });
    std::fs::write(&config, cfg.to_string()).expect("config");

    arucam()
        .arg("undistort")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"roi\""));

    for name in ["undistorted.png", "cropped.png", "comparison.png", "undistort_report.json"] {
        assert!(dir.path().join("out").join(name).is_file(), "missing {name}");
    }
}

#[test]
fn track_finds_target_in_sequence() {
    let dir = tempfile::tempdir().expect("tempdir");
    let frames = dir.path().join("frames");
    std::fs::create_dir_all(&frames).expect("frames dir");
    render_marker_png(&frames.join("frame_1.png"), 15);
    render_marker_png(&frames.join("frame_2.png"), 3);

    let out = dir.path().join("out");
    let config = dir.path().join("track.json");
    let cfg = serde_json::json!({
        "frames": frames,
        "camera": {
            "camera_matrix": [[400.0, 0.0, 100.0], [0.0, 400.0, 100.0], [0.0, 0.0, 1.0]],
            "dist_coeffs": []
        },
        "output_dir": out,
        "pause_ms": 0
    });
    std::fs::write(&config, cfg.to_string()).expect("config");

    arucam()
        .arg("track")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"frames\": 2"))
        .stdout(predicate::str::contains("\"frames_with_markers\": 2"))
        .stdout(predicate::str::contains("\"frames_with_target\": 1"));

    assert!(out.join("frame_00000.png").is_file());
    let report = std::fs::read_to_string(out.join("track_report.json")).expect("report");
    assert!(report.contains("Trans: ["));
}

#[test]
fn track_without_frames_fails() {
    arucam()
        .arg("track")
        .assert()
        .failure()
        .stderr(predicate::str::contains("frames are required"));
}
