//! Rendering batches into PNG grids.

use std::path::Path;

use image::{Rgb, RgbImage};

use crate::types::{ImageBatch, SourceError};

/// Pixels of padding between tiles.
const GAP: u32 = 2;

/// Lay batches out as columns: row `i` holds image `i` of every batch.
///
/// All columns must share image shape and length. Grayscale images are
/// replicated to three channels.
pub fn render_grid(columns: &[ImageBatch]) -> Result<RgbImage, SourceError> {
    let Some(first) = columns.first() else {
        return Ok(RgbImage::new(0, 0));
    };
    let shape = first.shape();
    let rows = first.len();
    for (column, batch) in columns.iter().enumerate() {
        if batch.shape() != shape || batch.len() != rows {
            return Err(SourceError::GridMismatch {
                column,
                expected: format!("{rows} x {shape}"),
                got: format!("{} x {}", batch.len(), batch.shape()),
            });
        }
    }

    let tile_w = shape.width as u32;
    let tile_h = shape.height as u32;
    let width = columns.len() as u32 * (tile_w + GAP) + GAP;
    let height = rows as u32 * (tile_h + GAP) + GAP;
    let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));

    for (col, batch) in columns.iter().enumerate() {
        for row in 0..rows {
            let Some(pixels) = batch.image(row) else {
                continue;
            };
            let x0 = GAP + col as u32 * (tile_w + GAP);
            let y0 = GAP + row as u32 * (tile_h + GAP);
            for y in 0..shape.height {
                for x in 0..shape.width {
                    let base = (y * shape.width + x) * shape.channels;
                    let rgb = if shape.channels == 1 {
                        let v = to_u8(pixels[base]);
                        [v, v, v]
                    } else {
                        [to_u8(pixels[base]), to_u8(pixels[base + 1]), to_u8(pixels[base + 2])]
                    };
                    canvas.put_pixel(x0 + x as u32, y0 + y as u32, Rgb(rgb));
                }
            }
        }
    }
    Ok(canvas)
}

/// Render and write a grid as PNG, creating parent directories.
pub fn save_grid(path: &Path, columns: &[ImageBatch]) -> Result<(), SourceError> {
    let canvas = render_grid(columns)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| SourceError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    canvas.save(path).map_err(|source| SourceError::Encode {
        path: path.to_path_buf(),
        source,
    })
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}
