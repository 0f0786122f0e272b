//! Local image-directory frame source.
//!
//! Replays a directory of still frames (JPEG or PNG) in file-name order, e.g.
//! frames dumped from a dashcam. A path naming a single image replays just
//! that image. The source is finite: once every file has been read
//! `next_frame` returns `None`. Files that fail to decode are logged and
//! skipped.
//!
//! A one-frame replay can never serve a dwell; single photos are checked
//! with `pipeline::check_still_image` instead.
//!
//! The source MUST NOT fetch remote URLs.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::{FrameSource, ReplayClock, SourceStats};
use crate::frame::Frame;

const FRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub struct ImageDirSource {
    dir: PathBuf,
    clock: ReplayClock,
    files: Vec<PathBuf>,
    next_index: usize,
    frame_count: u64,
    connected: bool,
    last_error: Option<String>,
}

impl ImageDirSource {
    pub fn new(dir: &Path, target_fps: u32) -> Self {
        Self {
            dir: dir.to_path_buf(),
            clock: ReplayClock::new(target_fps),
            files: Vec::new(),
            next_index: 0,
            frame_count: 0,
            connected: false,
            last_error: None,
        }
    }

    fn is_frame_file(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }
}

/// Decode one image file into a frame stamped with the current instant.
pub fn read_still_frame(path: &Path) -> Result<Frame> {
    let image = image::open(path)
        .with_context(|| format!("failed to decode image {}", path.display()))?
        .to_rgb8();
    Ok(Frame::new(image, Instant::now(), 1))
}

impl FrameSource for ImageDirSource {
    fn connect(&mut self) -> Result<()> {
        if self.dir.is_file() {
            if !Self::is_frame_file(&self.dir) {
                return Err(anyhow!(
                    "{} is not a jpg/png frame",
                    self.dir.display()
                ));
            }
            log::info!("ImageDirSource: connected to {} (1 frame)", self.dir.display());
            self.files = vec![self.dir.clone()];
            self.next_index = 0;
            self.connected = true;
            self.last_error = None;
            return Ok(());
        }

        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to open frame directory {}", self.dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && Self::is_frame_file(&path) {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(anyhow!(
                "frame directory {} contains no jpg/png frames",
                self.dir.display()
            ));
        }
        files.sort();

        log::info!(
            "ImageDirSource: connected to {} ({} frames)",
            self.dir.display(),
            files.len()
        );
        self.files = files;
        self.next_index = 0;
        self.connected = true;
        self.last_error = None;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!(
                "frame directory {} not connected",
                self.dir.display()
            ));
        }
        while let Some(path) = self.files.get(self.next_index) {
            let index = self.next_index;
            self.next_index += 1;
            let image = match image::open(path) {
                Ok(image) => image.to_rgb8(),
                Err(e) => {
                    log::warn!(
                        "ImageDirSource: skipping undecodable frame {}: {}",
                        path.display(),
                        e
                    );
                    self.last_error = Some(e.to_string());
                    continue;
                }
            };

            let captured_at = self.clock.stamp(index as u64);
            self.frame_count += 1;
            return Ok(Some(Frame::new(image, captured_at, self.frame_count)));
        }
        Ok(None)
    }

    fn release(&mut self) {
        if self.connected {
            log::info!("ImageDirSource: released {}", self.dir.display());
        }
        self.connected = false;
        self.files.clear();
    }

    /// Healthy while connected; `last_error` only records skipped files.
    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            location: self.dir.display().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_frame(dir: &Path, name: &str, shade: u8) -> Result<()> {
        RgbImage::from_pixel(8, 6, Rgb([shade, shade, shade])).save(dir.join(name))?;
        Ok(())
    }

    #[test]
    fn replays_frames_in_name_order_then_ends() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_frame(dir.path(), "002.png", 200)?;
        write_frame(dir.path(), "001.png", 10)?;
        std::fs::write(dir.path().join("notes.txt"), "not a frame")?;

        let mut source = ImageDirSource::new(dir.path(), 5);
        source.connect()?;

        let first = source.next_frame()?.expect("first frame");
        assert_eq!(first.image().get_pixel(0, 0), &Rgb([10, 10, 10]));
        let second = source.next_frame()?.expect("second frame");
        assert_eq!(second.image().get_pixel(0, 0), &Rgb([200, 200, 200]));
        assert_eq!(
            second.captured_at() - first.captured_at(),
            std::time::Duration::from_millis(200)
        );
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn undecodable_frame_is_skipped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_frame(dir.path(), "001.png", 10)?;
        std::fs::write(dir.path().join("002.png"), b"not a png")?;
        write_frame(dir.path(), "003.png", 200)?;

        let mut source = ImageDirSource::new(dir.path(), 5);
        source.connect()?;

        let first = source.next_frame()?.expect("first frame");
        let second = source.next_frame()?.expect("frame after the corrupt one");
        assert_eq!(first.image().get_pixel(0, 0), &Rgb([10, 10, 10]));
        assert_eq!(second.image().get_pixel(0, 0), &Rgb([200, 200, 200]));
        assert_eq!(second.sequence(), 2);
        // The skipped file keeps its slot in the replay timeline.
        assert_eq!(
            second.captured_at() - first.captured_at(),
            std::time::Duration::from_millis(400)
        );
        assert!(source.next_frame()?.is_none());
        assert!(source.last_error.is_some());
        assert!(source.is_healthy());
        Ok(())
    }

    #[test]
    fn single_image_path_replays_one_frame() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_frame(dir.path(), "photo.jpg", 120)?;

        let mut source = ImageDirSource::new(&dir.path().join("photo.jpg"), 5);
        source.connect()?;
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());

        let frame = read_still_frame(&dir.path().join("photo.jpg"))?;
        assert_eq!((frame.width(), frame.height()), (8, 6));
        Ok(())
    }

    #[test]
    fn empty_directory_fails_to_connect() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut source = ImageDirSource::new(dir.path(), 5);
        assert!(source.connect().is_err());
        Ok(())
    }

    #[test]
    fn missing_directory_fails_to_connect() {
        let mut source = ImageDirSource::new(Path::new("/nonexistent/plate-frames"), 5);
        assert!(source.connect().is_err());
    }
}
