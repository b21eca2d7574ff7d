use atlas_registration::algorithms::{ElasticParams, ImagePair, RegistrationPrimitive};
use atlas_registration::analysis::intersection;
use atlas_registration::config::Config;
use atlas_registration::data::{BitDepth, Dims, Volume};
use atlas_registration::pipeline::progress::{channel, HistorySink, ProgressEvent};
use atlas_registration::pipeline::{Cohort, GroupwiseScheduler, WorkerPool};
use atlas_registration::transform::{DeformationField, OrthogonalPlane};
use atlas_registration::{PhaseCorrelationRegistration, RegistrationError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Returns the identity field for every pair and counts its calls.
#[derive(Default)]
struct IdentityPrimitive {
    calls: AtomicUsize,
}

impl RegistrationPrimitive for IdentityPrimitive {
    fn register_pair(&self, pair: &ImagePair<'_>, params: &ElasticParams) -> Result<DeformationField> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (height, width) = pair.source.dim();
        DeformationField::identity(params.intervals(), width, height)
    }

    fn name(&self) -> &'static str {
        "Identity"
    }
}

/// Identity primitive that records how many calls overlap in time.
#[derive(Default)]
struct ConcurrencyTracker {
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ConcurrencyTracker {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(10));
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn max(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl RegistrationPrimitive for ConcurrencyTracker {
    fn register_pair(&self, pair: &ImagePair<'_>, params: &ElasticParams) -> Result<DeformationField> {
        self.enter();
        let (height, width) = pair.source.dim();
        DeformationField::identity(params.intervals(), width, height)
    }

    fn name(&self) -> &'static str {
        "ConcurrencyTracker"
    }
}

/// 8x8x8 volume holding a 255-valued cube of edge 4 starting at `origin`.
fn cube(origin: (usize, usize, usize)) -> Volume {
    let (ox, oy, oz) = origin;
    let inside = |c: usize, o: usize| c >= o && c < o + 4;
    Volume::from_fn(Dims::new(8, 8, 8), BitDepth::Eight, |x, y, z| {
        if inside(x, ox) && inside(y, oy) && inside(z, oz) {
            255.0
        } else {
            0.0
        }
    })
    .unwrap()
}

/// Asymmetric test volume with distinct structure along every axis.
fn ramp_blob(shift: usize) -> Volume {
    Volume::from_fn(Dims::new(12, 10, 8), BitDepth::Eight, |x, y, z| {
        let inside = x >= 2 + shift && x < 7 + shift && y >= 3 && y < 8 && z >= 1 && z < 6;
        if inside {
            (40 + 10 * x + 5 * y + 3 * z) as f32
        } else {
            0.0
        }
    })
    .unwrap()
}

fn config(iterations: usize) -> Config {
    let mut config = Config::default();
    config.schedule.iterations = iterations;
    config.concurrency.core_budget = Some(4);
    config
}

#[test]
fn test_identity_cohort_end_to_end() {
    let inputs = vec![cube((2, 2, 2)), cube((3, 2, 2)), cube((2, 3, 3))];
    let primitive = Arc::new(IdentityPrimitive::default());
    let scheduler = GroupwiseScheduler::new(primitive.clone(), &config(1)).unwrap();

    let outcome = scheduler.register(inputs.clone()).unwrap();

    assert_eq!(outcome.members.len(), 3);
    for (member, input) in outcome.members.iter().zip(&inputs) {
        assert_eq!(&member.volume, input);
        assert!(member.sequence.is_complete());
        assert_eq!(member.sequence.populated_count(), 3);
        assert_eq!(member.sequence.dimensions(), Dims::new(8, 8, 8));
    }
    assert_eq!(outcome.members[0].label, "volume_0");

    // 3 planes x 3 sources x 3 targets
    assert_eq!(primitive.calls.load(Ordering::SeqCst), 27);
    assert_eq!(outcome.report.primitive_calls, 27);
    assert_eq!(outcome.report.planes.len(), 3);
    assert_eq!(outcome.report.primitive, "Identity");

    let registered: Vec<Volume> = outcome.volumes().cloned().collect();
    let consensus = intersection(&registered).unwrap();
    // the three cubes share a 3x3x3 block
    assert_eq!(consensus.count_nonzero(), 27);
}

#[test]
fn test_disjoint_cohort_has_empty_consensus() {
    let inputs = vec![cube((0, 0, 0)), cube((4, 4, 4))];
    let scheduler =
        GroupwiseScheduler::new(Arc::new(IdentityPrimitive::default()), &config(1)).unwrap();
    let outcome = scheduler.register(inputs).unwrap();

    let registered: Vec<Volume> = outcome.volumes().cloned().collect();
    assert_eq!(intersection(&registered).unwrap().count_nonzero(), 0);
}

#[test]
fn test_every_first_plane_visits_all_planes() {
    for first_plane in OrthogonalPlane::ORDER {
        let mut config = config(2);
        config.schedule.first_plane = first_plane;
        let scheduler =
            GroupwiseScheduler::new(Arc::new(IdentityPrimitive::default()), &config).unwrap();

        let inputs = vec![ramp_blob(0), ramp_blob(1)];
        let outcome = scheduler.register(inputs.clone()).unwrap();

        assert_eq!(outcome.report.first_plane, first_plane);
        let visited: Vec<OrthogonalPlane> =
            outcome.report.planes.iter().map(|p| p.plane).collect();
        let order = first_plane.pass_order();
        assert_eq!(visited, [order, order].concat());
        for (member, input) in outcome.members.iter().zip(&inputs) {
            assert_eq!(member.sequence.first_plane(), first_plane);
            assert_eq!(member.volume.dims(), input.dims());
            assert_eq!(&member.volume, input);
        }
    }
}

#[test]
fn test_dimension_mismatch_makes_no_primitive_calls() {
    let primitive = Arc::new(IdentityPrimitive::default());
    let scheduler = GroupwiseScheduler::new(primitive.clone(), &config(1)).unwrap();

    let odd = Volume::zeros(Dims::new(8, 8, 9), BitDepth::Eight).unwrap();
    let err = scheduler
        .register(vec![cube((0, 0, 0)), cube((1, 1, 1)), odd])
        .unwrap_err();

    match err {
        RegistrationError::DimensionMismatch { index, expected, actual } => {
            assert_eq!(index, 2);
            assert_eq!(expected, Dims::new(8, 8, 8));
            assert_eq!(actual, Dims::new(8, 8, 9));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(primitive.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_single_volume_rejected() {
    let primitive = Arc::new(IdentityPrimitive::default());
    let scheduler = GroupwiseScheduler::new(primitive.clone(), &config(1)).unwrap();
    assert!(scheduler.register(vec![cube((0, 0, 0))]).is_err());
    assert!(Cohort::from_volumes(Vec::new()).is_err());
    assert_eq!(primitive.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_without_self_pair() {
    let mut config = config(1);
    config.schedule.include_self_pair = false;
    let primitive = Arc::new(IdentityPrimitive::default());
    let scheduler = GroupwiseScheduler::new(primitive.clone(), &config).unwrap();

    let outcome = scheduler
        .register(vec![cube((0, 0, 0)), cube((1, 1, 1)), cube((2, 2, 2))])
        .unwrap();

    // 3 planes x 3 sources x 2 targets
    assert_eq!(primitive.calls.load(Ordering::SeqCst), 18);
    assert!(!outcome.report.include_self_pair);
}

#[test]
fn test_pool_never_exceeds_budget() {
    let tracker = ConcurrencyTracker::default();
    let pool = WorkerPool::new(10, 4).unwrap();
    assert_eq!(pool.threads(), 4);

    let out = pool
        .fork_join("track", (0..10).collect(), |_, i: usize| {
            tracker.enter();
            Ok(i)
        })
        .unwrap();

    assert_eq!(out, (0..10).collect::<Vec<_>>());
    assert!(tracker.max() <= 4);
    assert!(tracker.max() >= 1);
}

#[test]
fn test_scheduler_threads_bounded_by_cohort_size() {
    let tracker = Arc::new(ConcurrencyTracker::default());
    let mut config = config(1);
    config.concurrency.core_budget = Some(8);
    let scheduler = GroupwiseScheduler::new(tracker.clone(), &config).unwrap();
    assert_eq!(scheduler.thread_count(2), 2);

    let outcome = scheduler.register(vec![cube((0, 0, 0)), cube((1, 1, 1))]).unwrap();
    assert_eq!(outcome.report.threads, 2);
    assert!(tracker.max() <= 2);
}

#[test]
fn test_identical_volumes_are_left_unchanged() {
    let inputs = vec![ramp_blob(1), ramp_blob(1), ramp_blob(1)];
    let scheduler =
        GroupwiseScheduler::new(Arc::new(PhaseCorrelationRegistration), &config(1)).unwrap();

    let outcome = scheduler.register(inputs.clone()).unwrap();
    for (member, input) in outcome.members.iter().zip(&inputs) {
        assert_eq!(&member.volume, input);
    }
    for plane in &outcome.report.planes {
        assert!(plane.mean_displacement.iter().all(|&d| d.abs() < 1e-9));
    }
}

#[test]
fn test_progress_reaches_monitor() {
    let (reporter, monitor) = channel();
    let sink = HistorySink::new();
    let handle = monitor.spawn(sink.clone());

    let scheduler = GroupwiseScheduler::new(Arc::new(IdentityPrimitive::default()), &config(1))
        .unwrap()
        .with_progress(reporter);
    scheduler.register(vec![cube((0, 0, 0)), cube((1, 1, 1))]).unwrap();
    drop(scheduler);
    handle.join().unwrap();

    let events = sink.events();
    let advances = events
        .iter()
        .filter(|e| {
            matches!(e, ProgressEvent::Advance { stage, current, .. } if stage == "register" && *current > 0)
        })
        .count();
    // 3 planes x 2 sources x 2 targets
    assert_eq!(advances, 12);
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::Status { text, .. } if text == "finished"
    )));
}
