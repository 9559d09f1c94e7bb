//! Frame sources for the tracking loop.

use crate::detect::{load_rgb, ArucamError};
use ::image::RgbImage;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// One decoded frame.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Position in the source, starting at 0.
    pub index: usize,
    pub path: PathBuf,
    pub image: RgbImage,
}

/// Anything that yields frames one by one until exhausted.
pub trait FrameSource {
    /// `None` once the source is exhausted.
    fn next_frame(&mut self) -> Option<Result<Frame, ArucamError>>;

    /// Remaining frame count, when known.
    fn len_hint(&self) -> Option<usize> {
        None
    }
}

/// Frames read from image files in a fixed order.
#[derive(Clone, Debug)]
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    next: usize,
}

impl ImageSequence {
    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self { paths, next: 0 }
    }

    /// All images in `dir`, ordered by file name with digit runs compared
    /// numerically (`frame_2` before `frame_10`). A file path yields a
    /// single-frame sequence.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArucamError> {
        let path = path.as_ref();
        if path.is_file() {
            return Ok(Self::from_paths(vec![path.to_path_buf()]));
        }
        if !path.is_dir() {
            return Err(ArucamError::ImageNotFound(path.to_path_buf()));
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(path)? {
            let p = entry?.path();
            if p.is_file() && has_image_extension(&p) {
                paths.push(p);
            }
        }
        paths.sort_by(|a, b| natural_cmp(&file_name(a), &file_name(b)));
        log::debug!("{} frames in {}", paths.len(), path.display());
        Ok(Self::from_paths(paths))
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Option<Result<Frame, ArucamError>> {
        let path = self.paths.get(self.next)?.clone();
        let index = self.next;
        self.next += 1;
        Some(load_rgb(&path).map(|image| Frame { index, path, image }))
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.paths.len() - self.next)
    }
}

fn has_image_extension(p: &Path) -> bool {
    p.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn file_name(p: &Path) -> String {
    p.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Compare strings treating runs of ASCII digits as numbers.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ai = a.chars().peekable();
    let mut bi = b.chars().peekable();
    loop {
        match (ai.peek().copied(), bi.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) if ca.is_ascii_digit() && cb.is_ascii_digit() => {
                let na = take_digits(&mut ai);
                let nb = take_digits(&mut bi);
                let ord = na
                    .trim_start_matches('0')
                    .len()
                    .cmp(&nb.trim_start_matches('0').len())
                    .then_with(|| na.trim_start_matches('0').cmp(nb.trim_start_matches('0')))
                    .then_with(|| na.len().cmp(&nb.len()));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(ca), Some(cb)) => {
                if ca != cb {
                    return ca.cmp(&cb);
                }
                ai.next();
                bi.next();
            }
        }
    }
}

fn take_digits(it: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut s = String::new();
    while let Some(c) = it.next_if(|c| c.is_ascii_digit()) {
        s.push(c);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_order_compares_numbers() {
        let mut names = vec!["frame_10.png", "frame_2.png", "frame_1.png", "frame_02.png"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["frame_1.png", "frame_2.png", "frame_02.png", "frame_10.png"]);
    }

    #[test]
    fn directory_sequence_skips_non_images() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["f10.png", "f9.png"] {
            RgbImage::new(4, 3).save(dir.path().join(name)).expect("save");
        }
        std::fs::write(dir.path().join("notes.txt"), "x").expect("write");

        let mut seq = ImageSequence::open(dir.path()).expect("open");
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.len_hint(), Some(2));

        let first = seq.next_frame().expect("frame").expect("decoded");
        assert_eq!(first.index, 0);
        assert!(first.path.ends_with("f9.png"));
        assert_eq!(first.image.dimensions(), (4, 3));

        let second = seq.next_frame().expect("frame").expect("decoded");
        assert!(second.path.ends_with("f10.png"));
        assert!(seq.next_frame().is_none());
    }

    #[test]
    fn missing_source_is_an_error() {
        assert!(matches!(
            ImageSequence::open("/no/such/frames"),
            Err(ArucamError::ImageNotFound(_))
        ));
    }
}
