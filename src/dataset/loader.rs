//! Dataset discovery and image decoding
//!
//! A dataset root contains one subdirectory per class; the explicit class
//! list fixes label-index assignment regardless of directory enumeration
//! order. Images decode to RGB f32 CHW buffers in [0, 255].

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use tracing::info;
use walkdir::WalkDir;

use crate::dataset::augment::PixelBuffer;
use crate::utils::error::{Result, TrainError};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

/// One discovered sample: an on-disk image and its class index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageItem {
    pub path: PathBuf,
    pub label: usize,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Walk `root/<class>/` for each configured class, assigning the class's
/// position in the list as its label index. Files are sorted within each
/// class so discovery order is stable across filesystems.
pub fn scan_class_directories(root: &Path, classes: &[String]) -> Result<Vec<ImageItem>> {
    let mut items = Vec::new();

    for (label, class) in classes.iter().enumerate() {
        let class_dir = root.join(class);
        if !class_dir.is_dir() {
            return Err(TrainError::MissingClassDirectory {
                class: class.clone(),
                root: root.to_path_buf(),
            });
        }

        let mut class_items: Vec<PathBuf> = WalkDir::new(&class_dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_image(e.path()))
            .map(|e| e.into_path())
            .collect();
        class_items.sort();

        info!("class '{}': {} images", class, class_items.len());
        items.extend(
            class_items
                .into_iter()
                .map(|path| ImageItem { path, label }),
        );
    }

    if items.is_empty() {
        return Err(TrainError::Dataset(format!(
            "no images found under {:?}",
            root
        )));
    }
    Ok(items)
}

/// Per-class sample counts, index-aligned with the class list
pub fn class_counts(items: &[ImageItem], n_classes: usize) -> Vec<usize> {
    let mut counts = vec![0usize; n_classes];
    for item in items {
        if item.label < n_classes {
            counts[item.label] += 1;
        }
    }
    counts
}

/// Decode an image, resize to the target geometry, and convert to an
/// RGB f32 CHW buffer in [0, 255].
pub fn load_pixels(path: &Path, target_size: (u32, u32)) -> Result<PixelBuffer> {
    let img = image::open(path)
        .map_err(|e| TrainError::ImageLoad(path.to_path_buf(), e.to_string()))?;

    let (w, h) = target_size;
    let resized = img.resize_exact(w, h, FilterType::Triangle).to_rgb8();

    let (width, height) = (w as usize, h as usize);
    let mut data = vec![0.0f32; 3 * height * width];
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            data[c * height * width + y * width + x] = pixel[c] as f32;
        }
    }
    Ok(PixelBuffer::new(data, 3, height, width))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_image(path: &Path, side: u32, value: u8) {
        let img = RgbImage::from_pixel(side, side, Rgb([value, value, value]));
        img.save(path).unwrap();
    }

    fn make_dataset(root: &Path, counts: &[(&str, usize)]) {
        for (class, n) in counts {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..*n {
                write_image(&dir.join(format!("img_{}.png", i)), 8, 128);
            }
        }
    }

    #[test]
    fn test_scan_assigns_labels_from_class_list_order() {
        let tmp = tempfile::tempdir().unwrap();
        make_dataset(tmp.path(), &[("normal", 3), ("special", 2)]);

        let classes = vec!["normal".to_string(), "special".to_string()];
        let items = scan_class_directories(tmp.path(), &classes).unwrap();

        assert_eq!(items.len(), 5);
        assert_eq!(class_counts(&items, 2), vec![3, 2]);

        // reversed class list flips the label assignment
        let reversed = vec!["special".to_string(), "normal".to_string()];
        let items = scan_class_directories(tmp.path(), &reversed).unwrap();
        assert_eq!(class_counts(&items, 2), vec![2, 3]);
    }

    #[test]
    fn test_scan_fails_on_missing_class_directory() {
        let tmp = tempfile::tempdir().unwrap();
        make_dataset(tmp.path(), &[("normal", 1)]);

        let classes = vec!["normal".to_string(), "special".to_string()];
        let err = scan_class_directories(tmp.path(), &classes).unwrap_err();
        assert!(matches!(
            err,
            TrainError::MissingClassDirectory { ref class, .. } if class == "special"
        ));
    }

    #[test]
    fn test_scan_ignores_non_image_files() {
        let tmp = tempfile::tempdir().unwrap();
        make_dataset(tmp.path(), &[("normal", 2)]);
        std::fs::write(tmp.path().join("normal/notes.txt"), "x").unwrap();

        let classes = vec!["normal".to_string()];
        let items = scan_class_directories(tmp.path(), &classes).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_load_pixels_resizes_and_scales() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("img.png");
        write_image(&path, 16, 200);

        let buffer = load_pixels(&path, (9, 9)).unwrap();
        assert_eq!(buffer.channels, 3);
        assert_eq!(buffer.height, 9);
        assert_eq!(buffer.width, 9);
        // uniform image stays uniform through resize
        assert!(buffer.data.iter().all(|v| (*v - 200.0).abs() < 1.0));
    }

    #[test]
    fn test_load_pixels_missing_file() {
        let err = load_pixels(Path::new("/nonexistent/img.png"), (9, 9)).unwrap_err();
        assert!(matches!(err, TrainError::ImageLoad(..)));
    }
}
