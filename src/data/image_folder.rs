/// Image-folder datasets: `<root>/<class_index>/<file>.{png,jpg,jpeg,bmp,gif}`.
///
/// Images are decoded, resized to `width × height`, converted to grayscale
/// and normalised to [0, 1]. Files are visited in sorted path order so the
/// original indices are stable across runs.

use std::path::{Path, PathBuf};

use crate::data::dataset::{Dataset, ImageShape};
use crate::error::DataError;

const EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "gif"];

/// Decodes image bytes into a flat grayscale row of length `width * height`.
pub fn image_bytes_to_grayscale_input(
    bytes: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<f64>, String> {
    let img = image::load_from_memory(bytes).map_err(|e| e.to_string())?;
    let resized = img.resize_exact(width, height, image::imageops::FilterType::Lanczos3);
    let gray = resized.to_luma8();
    Ok(gray.pixels().map(|p| p.0[0] as f64 / 255.0).collect())
}

/// Loads every image under `root`. The number of classes is one more than the
/// largest class directory name found, or `min_classes` if that is larger.
pub fn load_image_folder(root: &Path, width: u32, height: u32, min_classes: usize) -> Result<Dataset, DataError> {
    let mut entries: Vec<(usize, PathBuf)> = Vec::new();

    for class_dir in sorted_children(root)? {
        if !class_dir.is_dir() {
            continue;
        }
        let name = class_dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let class: usize = name.parse().map_err(|_| DataError::Parse {
            source_name: root.display().to_string(),
            message: format!("class directory '{}' is not a class index", name),
        })?;
        for file in sorted_children(&class_dir)? {
            let ext = file.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase());
            if ext.map_or(false, |e| EXTENSIONS.contains(&e.as_str())) {
                entries.push((class, file));
            }
        }
    }

    if entries.is_empty() {
        return Err(DataError::Parse {
            source_name: root.display().to_string(),
            message: "no images found".into(),
        });
    }

    let mut inputs = Vec::with_capacity(entries.len());
    let mut labels = Vec::with_capacity(entries.len());
    for (class, path) in &entries {
        let bytes = std::fs::read(path)?;
        let row = image_bytes_to_grayscale_input(&bytes, width, height)
            .map_err(|message| DataError::Image { path: path.display().to_string(), message })?;
        inputs.push(row);
        labels.push(*class);
    }

    let n_classes = labels.iter().max().map_or(0, |m| m + 1).max(min_classes);
    let shape = ImageShape { channels: 1, height: height as usize, width: width as usize };
    Ok(Dataset::new(inputs, labels, n_classes).with_shape(Some(shape)))
}

fn sorted_children(dir: &Path) -> Result<Vec<PathBuf>, DataError> {
    let mut paths = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    paths.sort();
    Ok(paths)
}
