//! Volume storage as a directory of 2D slice images plus a JSON sidecar.
//!
//! Layout:
//!
//! ```text
//! volume_dir/
//!   volume.json       spacing, unit, bit depth, dimensions
//!   slice_0000.png    8-bit (L8) or 16-bit (L16) slices
//!   slice_0001.png
//!   ...
//! ```
//!
//! 32-bit volumes are written as `slice_NNNN.exr` with the value replicated in
//! every RGB channel.

use image::{DynamicImage, ImageBuffer, Luma, Rgb};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::volume::{BitDepth, Calibration, Dims, Volume};
use crate::error::{RegistrationError, Result};

pub const SIDECAR_NAME: &str = "volume.json";

/// Metadata stored next to the slices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub dims: Dims,
    pub calibration: Calibration,
    pub bit_depth: BitDepth,
}

impl VolumeInfo {
    pub fn of(volume: &Volume) -> Self {
        Self {
            dims: volume.dims(),
            calibration: volume.calibration().clone(),
            bit_depth: volume.bit_depth(),
        }
    }
}

fn image_error(path: &Path, source: image::ImageError) -> RegistrationError {
    RegistrationError::Image {
        path: path.to_path_buf(),
        source,
    }
}

fn slice_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| RegistrationError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| RegistrationError::io(dir, e))?.path();
        let is_slice = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("slice_"))
            .unwrap_or(false);
        let is_image = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("png") | Some("tif") | Some("tiff") | Some("exr")
        );
        if is_slice && is_image {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read_sidecar(dir: &Path) -> Result<Option<VolumeInfo>> {
    let path = dir.join(SIDECAR_NAME);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path).map_err(|e| RegistrationError::io(&path, e))?;
    let info = serde_json::from_str(&content).map_err(|e| {
        RegistrationError::io(
            &path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })?;
    Ok(Some(info))
}

fn depth_of(image: &DynamicImage) -> BitDepth {
    match image {
        DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA16(_)
        | DynamicImage::ImageRgb16(_)
        | DynamicImage::ImageRgba16(_) => BitDepth::Sixteen,
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => BitDepth::ThirtyTwo,
        _ => BitDepth::Eight,
    }
}

fn slice_values(image: &DynamicImage, bit_depth: BitDepth) -> Vec<f32> {
    match bit_depth {
        BitDepth::Eight => image.to_luma8().pixels().map(|p| p[0] as f32).collect(),
        BitDepth::Sixteen => image.to_luma16().pixels().map(|p| p[0] as f32).collect(),
        BitDepth::ThirtyTwo => image.to_luma32f().pixels().map(|p| p[0]).collect(),
    }
}

/// Load a volume from a slice directory.
///
/// Slices are read in file-name order. Without a sidecar the bit depth is taken
/// from the first slice and spacing defaults to 1.
pub fn load_volume<P: AsRef<Path>>(dir: P) -> Result<Volume> {
    let dir = dir.as_ref();
    let files = slice_files(dir)?;
    if files.is_empty() {
        return Err(RegistrationError::io(
            dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "no slice images found"),
        ));
    }
    let info = read_sidecar(dir)?;

    let mut bit_depth = info.as_ref().map(|i| i.bit_depth);
    let mut shape: Option<(usize, usize)> = None;
    let mut values = Vec::new();

    for path in &files {
        let image = image::open(path).map_err(|e| image_error(path, e))?;
        let depth = *bit_depth.get_or_insert_with(|| depth_of(&image));
        let (w, h) = (image.width() as usize, image.height() as usize);
        match shape {
            None => shape = Some((w, h)),
            Some(expected) if expected != (w, h) => {
                return Err(RegistrationError::invalid_dimensions(format!(
                    "slice {} is {}x{}, expected {}x{}",
                    path.display(),
                    w,
                    h,
                    expected.0,
                    expected.1
                )));
            }
            Some(_) => {}
        }
        values.extend(slice_values(&image, depth));
    }

    let (w, h) = shape.unwrap_or((0, 0));
    let data = Array3::from_shape_vec((files.len(), h, w), values)
        .map_err(|e| RegistrationError::invalid_dimensions(e.to_string()))?;
    let calibration = info.as_ref().map(|i| i.calibration.clone()).unwrap_or_default();

    let volume = Volume::new(data, calibration, bit_depth.unwrap_or(BitDepth::Eight))?;
    if let Some(expected) = info.as_ref().map(|i| i.dims) {
        if expected != volume.dims() {
            return Err(RegistrationError::invalid_dimensions(format!(
                "{} records {} but the slices hold {}",
                dir.join(SIDECAR_NAME).display(),
                expected,
                volume.dims()
            )));
        }
    }
    tracing::debug!(
        path = %dir.display(),
        dims = %volume.dims(),
        bit_depth = %volume.bit_depth(),
        "Loaded volume"
    );
    Ok(volume)
}

/// Write a volume as a slice directory, creating it if needed.
///
/// Slices left over from an earlier volume in the same directory are removed
/// first.
pub fn save_volume<P: AsRef<Path>>(volume: &Volume, dir: P) -> Result<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|e| RegistrationError::io(dir, e))?;
    for stale in slice_files(dir)? {
        fs::remove_file(&stale).map_err(|e| RegistrationError::io(&stale, e))?;
    }

    let (w, h) = (volume.width() as u32, volume.height() as u32);
    for z in 0..volume.depth() {
        let slice = volume.slice(z);
        match volume.bit_depth() {
            BitDepth::Eight => {
                let path = dir.join(format!("slice_{:04}.png", z));
                let img = ImageBuffer::from_fn(w, h, |x, y| {
                    Luma([BitDepth::Eight.quantize(slice[[y as usize, x as usize]]) as u8])
                });
                img.save(&path).map_err(|e| image_error(&path, e))?;
            }
            BitDepth::Sixteen => {
                let path = dir.join(format!("slice_{:04}.png", z));
                let img = ImageBuffer::from_fn(w, h, |x, y| {
                    Luma([BitDepth::Sixteen.quantize(slice[[y as usize, x as usize]]) as u16])
                });
                img.save(&path).map_err(|e| image_error(&path, e))?;
            }
            BitDepth::ThirtyTwo => {
                let path = dir.join(format!("slice_{:04}.exr", z));
                let img: ImageBuffer<Rgb<f32>, Vec<f32>> = ImageBuffer::from_fn(w, h, |x, y| {
                    let v = slice[[y as usize, x as usize]];
                    Rgb([v, v, v])
                });
                img.save(&path).map_err(|e| image_error(&path, e))?;
            }
        }
    }

    let path = dir.join(SIDECAR_NAME);
    let json = serde_json::to_string_pretty(&VolumeInfo::of(volume)).map_err(|e| {
        RegistrationError::io(
            &path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })?;
    fs::write(&path, json).map_err(|e| RegistrationError::io(&path, e))?;

    tracing::debug!(path = %dir.display(), slices = volume.depth(), "Saved volume");
    Ok(())
}
