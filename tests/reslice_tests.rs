use atlas_registration::data::{BitDepth, Calibration, Dims, Reslicer, Volume};

fn unique_volume(dims: Dims) -> Volume {
    Volume::from_fn(dims, BitDepth::Sixteen, |x, y, z| {
        (x + dims.x * (y + dims.y * z)) as f32
    })
    .unwrap()
    .with_calibration(Calibration::new(0.5, 0.75, 2.0, "um"))
}

#[test]
fn test_reslice_moves_axes() {
    let volume = unique_volume(Dims::new(4, 6, 8));
    let resliced = Reslicer::reslice(&volume).unwrap();

    assert_eq!(resliced.dims(), Dims::new(6, 8, 4));
    for z in 0..8 {
        for y in 0..6 {
            for x in 0..4 {
                // new (x', y', z') = old (y, z, x)
                assert_eq!(resliced.get(y, z, x), volume.get(x, y, z));
            }
        }
    }
}

#[test]
fn test_three_reslices_restore_volume() {
    let volume = unique_volume(Dims::new(4, 6, 8));

    let once = Reslicer::reslice(&volume).unwrap();
    let twice = Reslicer::reslice(&once).unwrap();
    let thrice = Reslicer::reslice(&twice).unwrap();

    assert_eq!(twice.dims(), Dims::new(8, 4, 6));
    assert_eq!(thrice, volume);
    assert_eq!(thrice.calibration(), volume.calibration());
}

#[test]
fn test_calibration_follows_axes() {
    let volume = unique_volume(Dims::new(4, 6, 8));
    let resliced = Reslicer::reslice(&volume).unwrap();
    let cal = resliced.calibration();
    assert_eq!((cal.x, cal.y, cal.z), (0.75, 2.0, 0.5));
    assert_eq!(cal.unit, "um");
}

#[test]
fn test_reslice_times_and_inverse() {
    let volume = unique_volume(Dims::new(3, 5, 7));
    for n in 0..3 {
        let forward = Reslicer::reslice_times(volume.clone(), n).unwrap();
        let back = Reslicer::reslice_times(forward, Reslicer::inverse_count(n)).unwrap();
        assert_eq!(back, volume);
    }
}

#[test]
fn test_bit_depth_preserved() {
    let volume = Volume::from_fn(Dims::new(2, 3, 4), BitDepth::Eight, |x, _, _| x as f32).unwrap();
    let resliced = Reslicer::reslice(&volume).unwrap();
    assert_eq!(resliced.bit_depth(), BitDepth::Eight);
}
