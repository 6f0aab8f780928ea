//! Frame assets and the frame library.

use super::ComposeError;
use image::RgbaImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Pixels with alpha below this value belong to the photo window.
const WINDOW_ALPHA_THRESHOLD: u8 = 128;

/// Rectangle of the overlay through which the photo shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// An immutable frame overlay.
pub struct Frame {
    name: String,
    asset_path: PathBuf,
    overlay: RgbaImage,
    window: Window,
}

impl Frame {
    /// Loads a frame asset from disk.
    pub fn load(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, ComposeError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ComposeError::FrameAssetMissing(path.to_path_buf()));
        }
        let overlay = image::open(path)
            .map_err(|e| ComposeError::FrameAssetCorrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
            .to_rgba8();
        Self::from_overlay(name, path, overlay)
    }

    /// Builds a frame from an already decoded overlay.
    pub fn from_overlay(
        name: impl Into<String>,
        path: impl AsRef<Path>,
        overlay: RgbaImage,
    ) -> Result<Self, ComposeError> {
        let path = path.as_ref();
        let window = transparent_window(&overlay).ok_or_else(|| ComposeError::FrameAssetCorrupt {
            path: path.to_path_buf(),
            reason: "frame has no transparent window".to_string(),
        })?;

        Ok(Self {
            name: name.into(),
            asset_path: path.to_path_buf(),
            overlay,
            window,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn asset_path(&self) -> &Path {
        &self.asset_path
    }

    pub fn overlay(&self) -> &RgbaImage {
        &self.overlay
    }

    pub fn window(&self) -> Window {
        self.window
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("name", &self.name)
            .field("asset_path", &self.asset_path)
            .field("size", &self.overlay.dimensions())
            .field("window", &self.window)
            .finish()
    }
}

/// Bounding box of the transparent pixels.
fn transparent_window(overlay: &RgbaImage) -> Option<Window> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in overlay.enumerate_pixels() {
        if pixel.0[3] >= WINDOW_ALPHA_THRESHOLD {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }
    bounds.map(|(x0, y0, x1, y1)| Window {
        x: x0,
        y: y0,
        width: x1 - x0 + 1,
        height: y1 - y0 + 1,
    })
}

/// Frames available in the frames directory, referenced by file name.
///
/// Assets are decoded on first use and shared afterwards; a failed load is
/// not cached so a fixed asset is picked up on retry.
pub struct FrameLibrary {
    root: PathBuf,
    cache: Mutex<HashMap<String, Arc<Frame>>>,
}

impl FrameLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Registers an in-memory frame under its name.
    pub fn insert(&self, frame: Frame) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.insert(frame.name().to_string(), Arc::new(frame));
    }

    /// Names of the PNG assets in the frames directory plus registered frames, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| {
                    path.extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
                })
                .filter_map(|path| path.file_name()?.to_str().map(str::to_owned))
                .collect(),
            Err(e) => {
                tracing::debug!(root = %self.root.display(), error = %e, "Frames directory unreadable");
                Vec::new()
            }
        };

        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        names.extend(cache.keys().cloned());
        names.sort();
        names.dedup();
        names
    }

    /// Returns the frame named `name`, loading it if needed.
    pub fn get(&self, name: &str) -> Result<Arc<Frame>, ComposeError> {
        if let Some(frame) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(Arc::clone(frame));
        }

        // Frame names are plain file names inside the frames directory.
        if Path::new(name).components().count() != 1 {
            return Err(ComposeError::FrameAssetMissing(self.root.join(name)));
        }

        let frame = Arc::new(Frame::load(name, self.root.join(name))?);
        tracing::debug!(frame = name, window = ?frame.window(), "Frame loaded");

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(cache.entry(name.to_string()).or_insert(frame)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn window_frame(size: u32, border: u32) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            let inside = x >= border && y >= border && x < size - border && y < size - border;
            if inside {
                Rgba([0, 0, 0, 0])
            } else {
                Rgba([200, 0, 0, 255])
            }
        })
    }

    #[test]
    fn test_window_is_transparent_bounding_box() {
        let frame = Frame::from_overlay("f.png", "f.png", window_frame(20, 5)).unwrap();
        assert_eq!(
            frame.window(),
            Window {
                x: 5,
                y: 5,
                width: 10,
                height: 10
            }
        );
    }

    #[test]
    fn test_opaque_frame_is_corrupt() {
        let overlay = RgbaImage::from_pixel(8, 8, Rgba([1, 2, 3, 255]));
        assert!(matches!(
            Frame::from_overlay("solid.png", "solid.png", overlay),
            Err(ComposeError::FrameAssetCorrupt { .. })
        ));
    }

    #[test]
    fn test_library_loads_and_lists_frames() {
        let dir = tempfile::tempdir().unwrap();
        window_frame(16, 4).save(dir.path().join("classic.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"not a frame").unwrap();

        let library = FrameLibrary::new(dir.path());
        assert_eq!(library.names(), vec!["classic.png".to_string()]);

        let frame = library.get("classic.png").unwrap();
        assert_eq!(frame.name(), "classic.png");
        assert!(Arc::ptr_eq(&frame, &library.get("classic.png").unwrap()));
    }

    #[test]
    fn test_library_missing_and_corrupt_assets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"definitely not png").unwrap();
        let library = FrameLibrary::new(dir.path());

        assert!(matches!(
            library.get("absent.png"),
            Err(ComposeError::FrameAssetMissing(_))
        ));
        assert!(matches!(
            library.get("broken.png"),
            Err(ComposeError::FrameAssetCorrupt { .. })
        ));
        assert!(matches!(
            library.get("../escape.png"),
            Err(ComposeError::FrameAssetMissing(_))
        ));
    }
}
