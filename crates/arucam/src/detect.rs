use crate::{aruco, core};
use std::path::{Path, PathBuf};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Errors produced by the high-level facade helpers.
#[derive(thiserror::Error, Debug)]
pub enum ArucamError {
    #[error("image not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    #[error("failed to decode {}: {source}", path.display())]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: ::image::ImageError,
    },

    #[error("invalid grayscale image buffer length (expected {expected} bytes, got {got})")]
    InvalidGrayBuffer { expected: usize, got: usize },

    #[error("no valid undistortion for a {width}x{height} image with this camera")]
    Undistort { width: u32, height: u32 },

    #[error(transparent)]
    Image(#[from] ::image::ImageError),

    #[error(transparent)]
    Camera(#[from] core::CameraError),

    #[error(transparent)]
    Dictionary(#[from] aruco::DictionaryError),

    #[error(transparent)]
    Render(#[from] aruco::RenderError),

    #[error(transparent)]
    Config(#[from] crate::io::IoError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "viewer")]
    #[error(transparent)]
    Viewer(#[from] rerun::RecordingStreamError),
}

/// Convert an `image::GrayImage` into the lightweight `arucam-core` view type.
pub fn gray_view(img: &::image::GrayImage) -> core::GrayImageView<'_> {
    core::GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Wrap a raw row-major 8-bit buffer, checking its length.
pub fn gray_view_from_raw(
    width: usize,
    height: usize,
    data: &[u8],
) -> Result<core::GrayImageView<'_>, ArucamError> {
    core::GrayImageView::new(width, height, data).ok_or(ArucamError::InvalidGrayBuffer {
        expected: width * height,
        got: data.len(),
    })
}

/// Read an image from disk as RGB8.
///
/// A missing file is reported as [`ArucamError::ImageNotFound`] rather than a
/// decoder error.
pub fn load_rgb(path: impl AsRef<Path>) -> Result<::image::RgbImage, ArucamError> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(ArucamError::ImageNotFound(path.to_path_buf()));
    }
    let img = ::image::open(path).map_err(|source| ArucamError::ImageDecode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(img.to_rgb8())
}

/// Luma conversion used before detection.
pub fn to_gray(rgb: &::image::RgbImage) -> ::image::GrayImage {
    ::image::imageops::grayscale(rgb)
}

/// Run the marker detector end-to-end on an RGB frame.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(rgb, detector), fields(width = rgb.width(), height = rgb.height()))
)]
pub fn detect_markers_rgb(
    rgb: &::image::RgbImage,
    detector: &aruco::MarkerDetector,
) -> aruco::MarkerDetections {
    let gray = to_gray(rgb);
    detector.detect(&gray_view(&gray))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_image_is_reported_by_path() {
        let err = load_rgb("/definitely/not/here.png").unwrap_err();
        match err {
            ArucamError::ImageNotFound(p) => assert_eq!(p, PathBuf::from("/definitely/not/here.png")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn raw_view_checks_length() {
        let data = vec![0u8; 11];
        assert!(matches!(
            gray_view_from_raw(3, 4, &data),
            Err(ArucamError::InvalidGrayBuffer {
                expected: 12,
                got: 11
            })
        ));
        assert!(gray_view_from_raw(11, 1, &data).is_ok());
    }

    #[test]
    fn png_round_trip_keeps_pixels() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("frame.png");
        let img = ::image::RgbImage::from_fn(8, 4, |x, y| ::image::Rgb([x as u8 * 10, y as u8, 7]));
        img.save(&path).expect("save");
        assert_eq!(load_rgb(&path).expect("load"), img);
    }
}
