/// Parser for IDX binary file pairs (image + label) as used by MNIST and its
/// derivatives (Fashion-MNIST, EMNIST, …).
///
/// # IDX3 image file layout
/// ```text
/// bytes  0-1:   0x00 0x00   (reserved, must be zero)
/// byte   2:     0x08        (dtype = uint8)
/// byte   3:     0x03        (number of dimensions = 3)
/// bytes  4-7:   N           (number of images, big-endian u32)
/// bytes  8-11:  rows        (image height in pixels, big-endian u32)
/// bytes 12-15:  cols        (image width in pixels, big-endian u32)
/// bytes 16..:   N * rows * cols bytes, row-major, uint8
/// ```
///
/// # IDX1 label file layout
/// ```text
/// bytes  0-1:   0x00 0x00   (reserved, must be zero)
/// byte   2:     0x08        (dtype = uint8)
/// byte   3:     0x01        (number of dimensions = 1)
/// bytes  4-7:   N           (number of labels, big-endian u32)
/// bytes  8..:   N bytes, each a class index in [0, n_classes)
/// ```

use std::path::Path;

use crate::data::dataset::{Dataset, ImageShape};
use crate::error::DataError;

/// Parses an image/label IDX pair into a `Dataset` with pixels scaled to
/// `[0, 1]` and class-index labels.
pub fn parse_idx_pair(
    image_bytes: &[u8],
    label_bytes: &[u8],
    n_classes: usize,
) -> Result<Dataset, DataError> {
    let err = |message: String| DataError::Parse { source_name: "idx".into(), message };

    // ── Image file validation ───────────────────────────────────────────────

    check_header(image_bytes, 16, 0x03, "image").map_err(err)?;

    let n_items = be_u32(&image_bytes[4..8]);
    let rows = be_u32(&image_bytes[8..12]);
    let cols = be_u32(&image_bytes[12..16]);

    let n_pixels = rows.checked_mul(cols).ok_or_else(|| {
        err(format!("image file: rows * cols overflows usize (rows={}, cols={}).", rows, cols))
    })?;
    let data_len = n_items.checked_mul(n_pixels).ok_or_else(|| {
        err(format!(
            "image file: n_items * n_pixels overflows usize (n_items={}, n_pixels={}).",
            n_items, n_pixels
        ))
    })?;

    if image_bytes.len() < 16 + data_len {
        return Err(err(format!(
            "image file too short: header declares {} items of {}×{} pixels \
             ({} data bytes needed after header), but file is only {} bytes total.",
            n_items, rows, cols, data_len, image_bytes.len()
        )));
    }

    // ── Label file validation ───────────────────────────────────────────────

    check_header(label_bytes, 8, 0x01, "label").map_err(err)?;

    let label_count = be_u32(&label_bytes[4..8]);
    if label_count != n_items {
        return Err(err(format!(
            "image file declares {} items but label file declares {}.",
            n_items, label_count
        )));
    }
    if label_bytes.len() < 8 + n_items {
        return Err(err(format!(
            "label file too short: header declares {} labels but file is only {} bytes.",
            n_items, label_bytes.len()
        )));
    }

    // ── Build rows ──────────────────────────────────────────────────────────

    let inputs: Vec<Vec<f64>> = image_bytes[16..16 + data_len]
        .chunks_exact(n_pixels.max(1))
        .map(|chunk| chunk.iter().map(|&px| px as f64 / 255.0).collect())
        .collect();

    let mut labels = Vec::with_capacity(n_items);
    for (i, &class_idx) in label_bytes[8..8 + n_items].iter().enumerate() {
        let class = class_idx as usize;
        if class >= n_classes {
            return Err(err(format!(
                "label at index {}: class index {} is out of range for n_classes={}.",
                i, class, n_classes
            )));
        }
        labels.push(class);
    }

    let shape = ImageShape { channels: 1, height: rows, width: cols };
    Ok(Dataset::new(inputs, labels, n_classes).with_shape(Some(shape)))
}

/// Reads `<dir>/<prefix>-images-idx3-ubyte` and `<dir>/<prefix>-labels-idx1-ubyte`.
pub fn load_idx_split(dir: &Path, prefix: &str, n_classes: usize) -> Result<Dataset, DataError> {
    let images = std::fs::read(dir.join(format!("{prefix}-images-idx3-ubyte")))?;
    let labels = std::fs::read(dir.join(format!("{prefix}-labels-idx1-ubyte")))?;
    parse_idx_pair(&images, &labels, n_classes)
}

fn check_header(bytes: &[u8], header_len: usize, dims: u8, what: &str) -> Result<(), String> {
    if bytes.len() < header_len {
        return Err(format!(
            "{} file too short: expected at least {} header bytes, got {}.",
            what, header_len, bytes.len()
        ));
    }
    if bytes[0] != 0x00 || bytes[1] != 0x00 {
        return Err(format!(
            "{} file: bytes 0-1 must be 0x00 0x00 (reserved), got 0x{:02X} 0x{:02X}.",
            what, bytes[0], bytes[1]
        ));
    }
    if bytes[2] != 0x08 {
        return Err(format!("{} file: byte 2 (dtype) must be 0x08 (uint8), got 0x{:02X}.", what, bytes[2]));
    }
    if bytes[3] != dims {
        return Err(format!("{} file: byte 3 (dimensions) must be {}, got {}.", what, dims, bytes[3]));
    }
    Ok(())
}

fn be_u32(bytes: &[u8]) -> usize {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
}
