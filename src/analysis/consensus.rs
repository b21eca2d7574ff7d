//! Consensus ("intersection") of registered label volumes.

use ndarray::Zip;

use crate::data::{ensure_same_dims, BitDepth, Volume};
use crate::error::{RegistrationError, Result};

/// Pairwise AND fold over `volumes`.
///
/// Integer volumes are combined bitwise, so binary 0/255 masks stay 0/255.
/// Float volumes are combined logically: a voxel is 1 where every input is
/// non-zero. All volumes must share dimensions; the output takes the first
/// volume's calibration and bit depth.
pub fn intersection(volumes: &[Volume]) -> Result<Volume> {
    if volumes.len() < 2 {
        return Err(RegistrationError::invalid_configuration(format!(
            "intersection needs at least 2 volumes, got {}",
            volumes.len()
        )));
    }
    ensure_same_dims(volumes)?;

    let first = &volumes[0];
    let bit_depth = first.bit_depth();
    let mut data = first.data().clone();
    if bit_depth == BitDepth::ThirtyTwo {
        data.mapv_inplace(|v| if v != 0.0 { 1.0 } else { 0.0 });
    }

    for volume in &volumes[1..] {
        Zip::from(&mut data).and(volume.data()).for_each(|acc, &v| {
            *acc = match bit_depth {
                BitDepth::ThirtyTwo => {
                    if *acc != 0.0 && v != 0.0 {
                        1.0
                    } else {
                        0.0
                    }
                }
                _ => ((*acc as u32) & (bit_depth.quantize(v) as u32)) as f32,
            };
        });
    }

    let result = first.with_data(data)?;
    tracing::debug!(
        volumes = volumes.len(),
        voxels = result.count_nonzero(),
        "Computed intersection"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Dims;

    fn mask(values: &[f32], bit_depth: BitDepth) -> Volume {
        Volume::from_fn(Dims::new(values.len(), 1, 1), bit_depth, |x, _, _| values[x]).unwrap()
    }

    #[test]
    fn test_bitwise_and() {
        let a = mask(&[255.0, 255.0, 0.0, 12.0], BitDepth::Eight);
        let b = mask(&[255.0, 0.0, 255.0, 10.0], BitDepth::Eight);
        let out = intersection(&[a, b]).unwrap();
        assert_eq!(
            out.data().iter().copied().collect::<Vec<_>>(),
            vec![255.0, 0.0, 0.0, 8.0]
        );
    }

    #[test]
    fn test_logical_and_for_float() {
        let a = mask(&[0.5, 2.0, 0.0], BitDepth::ThirtyTwo);
        let b = mask(&[3.0, 0.0, 1.0], BitDepth::ThirtyTwo);
        let c = mask(&[1.0, 1.0, 1.0], BitDepth::ThirtyTwo);
        let out = intersection(&[a, b, c]).unwrap();
        assert_eq!(out.data().iter().copied().collect::<Vec<_>>(), vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_requires_two_matching_volumes() {
        let a = mask(&[1.0, 1.0], BitDepth::Eight);
        assert!(intersection(std::slice::from_ref(&a)).is_err());

        let b = mask(&[1.0, 1.0, 1.0], BitDepth::Eight);
        assert!(matches!(
            intersection(&[a, b]),
            Err(RegistrationError::DimensionMismatch { .. })
        ));
    }
}
