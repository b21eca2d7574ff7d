use atlas_registration::data::{load_volume, save_volume, BitDepth, Calibration, Dims, Volume, SIDECAR_NAME};
use atlas_registration::RegistrationError;
use tempfile::TempDir;

fn gradient(bit_depth: BitDepth, scale: f32) -> Volume {
    Volume::from_fn(Dims::new(5, 4, 3), bit_depth, |x, y, z| {
        ((x + 5 * y + 20 * z) as f32) * scale
    })
    .unwrap()
    .with_calibration(Calibration::new(0.4, 0.4, 1.6, "um"))
}

#[test]
fn test_eight_bit_round_trip() {
    let dir = TempDir::new().unwrap();
    let volume = gradient(BitDepth::Eight, 4.0);

    save_volume(&volume, dir.path()).unwrap();
    assert!(dir.path().join(SIDECAR_NAME).exists());
    assert!(dir.path().join("slice_0000.png").exists());
    assert!(dir.path().join("slice_0002.png").exists());

    let loaded = load_volume(dir.path()).unwrap();
    assert_eq!(loaded, volume);
}

#[test]
fn test_sixteen_bit_round_trip() {
    let dir = TempDir::new().unwrap();
    let volume = gradient(BitDepth::Sixteen, 1000.0);

    save_volume(&volume, dir.path()).unwrap();
    let loaded = load_volume(dir.path()).unwrap();

    assert_eq!(loaded.bit_depth(), BitDepth::Sixteen);
    assert_eq!(loaded.calibration(), volume.calibration());
    assert_eq!(loaded, volume);
}

#[test]
fn test_float_round_trip() {
    let dir = TempDir::new().unwrap();
    let volume = gradient(BitDepth::ThirtyTwo, 0.125);

    save_volume(&volume, dir.path()).unwrap();
    let loaded = load_volume(dir.path()).unwrap();

    assert_eq!(loaded.bit_depth(), BitDepth::ThirtyTwo);
    assert_eq!(loaded.dims(), volume.dims());
    for (a, b) in loaded.data().iter().zip(volume.data().iter()) {
        assert!((a - b).abs() <= 1e-3 * b.abs().max(1.0));
    }
}

#[test]
fn test_out_of_range_values_are_clamped_on_save() {
    let dir = TempDir::new().unwrap();
    let mut volume = Volume::zeros(Dims::new(2, 2, 1), BitDepth::Eight).unwrap();
    volume.set(0, 0, 0, 300.0);
    volume.set(1, 0, 0, -5.0);
    volume.set(0, 1, 0, 12.6);

    save_volume(&volume, dir.path()).unwrap();
    let loaded = load_volume(dir.path()).unwrap();
    assert_eq!(loaded.get(0, 0, 0), 255.0);
    assert_eq!(loaded.get(1, 0, 0), 0.0);
    assert_eq!(loaded.get(0, 1, 0), 13.0);
}

#[test]
fn test_empty_directory_rejected() {
    let dir = TempDir::new().unwrap();
    let err = load_volume(dir.path()).unwrap_err();
    assert!(matches!(err, RegistrationError::Io { .. }));
}

#[test]
fn test_saving_smaller_volume_replaces_old_slices() {
    let dir = TempDir::new().unwrap();
    let deep = Volume::from_fn(Dims::new(4, 4, 8), BitDepth::Eight, |x, y, z| (x + y + z) as f32).unwrap();
    let shallow = Volume::from_fn(Dims::new(4, 4, 3), BitDepth::Eight, |x, y, z| (x * y + z) as f32).unwrap();

    save_volume(&deep, dir.path()).unwrap();
    save_volume(&shallow, dir.path()).unwrap();
    assert!(!dir.path().join("slice_0003.png").exists());
    assert!(!dir.path().join("slice_0007.png").exists());

    let loaded = load_volume(dir.path()).unwrap();
    assert_eq!(loaded.dims(), Dims::new(4, 4, 3));
    assert_eq!(loaded, shallow);
}

#[test]
fn test_float_save_replaces_integer_slices() {
    let dir = TempDir::new().unwrap();
    save_volume(&gradient(BitDepth::Eight, 1.0), dir.path()).unwrap();
    save_volume(&gradient(BitDepth::ThirtyTwo, 0.5), dir.path()).unwrap();

    assert!(!dir.path().join("slice_0000.png").exists());
    let loaded = load_volume(dir.path()).unwrap();
    assert_eq!(loaded.bit_depth(), BitDepth::ThirtyTwo);
    assert_eq!(loaded.dims(), Dims::new(5, 4, 3));
}

#[test]
fn test_missing_slice_disagrees_with_sidecar() {
    let dir = TempDir::new().unwrap();
    save_volume(&gradient(BitDepth::Eight, 4.0), dir.path()).unwrap();
    std::fs::remove_file(dir.path().join("slice_0002.png")).unwrap();

    let err = load_volume(dir.path()).unwrap_err();
    assert!(matches!(err, RegistrationError::InvalidDimensions(_)));
}
