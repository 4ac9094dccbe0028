use focuslock_core::mocks::{MemoryStage, StaticCamera};
use focuslock_core::{Roi, SweepError, SweepPlan, SweepProgress, auto_calibrate};
use focuslock_hardware::{SimulatedCamera, SimulatedScene, SimulatedStage};
use focuslock_traits::{Camera, Image};
use rstest::rstest;

fn dark_camera() -> StaticCamera {
    StaticCamera::new(Image::filled(64, 64, 0.0).unwrap())
}

fn roi() -> Roi {
    Roi::new(20, 20, 24, 24)
}

#[test]
fn skips_rejected_moves() {
    let mut stage = MemoryStage::new(0.0).rejecting(|z| z > 0.2);
    let samples = auto_calibrate(
        &mut dark_camera(),
        &mut stage,
        roi(),
        &SweepPlan::new(-0.2, 0.4, 4),
        || false,
        |_| {},
    )
    .unwrap();

    // Both directions repeat the two reachable positions.
    assert_eq!(samples.len(), 4);
    assert!(samples.iter().all(|s| s.z_um <= 0.2));
}

#[test]
fn fails_clearly_when_every_move_fails() {
    let mut stage = MemoryStage::new(0.0).rejecting(|_| true);
    let err = auto_calibrate(
        &mut dark_camera(),
        &mut stage,
        roi(),
        &SweepPlan::new(-0.2, 0.2, 3),
        || false,
        |_| {},
    )
    .unwrap_err();

    let msg = format!("{err:#}");
    assert!(msg.contains("could not collect enough valid points"), "{msg}");
    assert!(msg.contains("0 succeeded, 6 failed"), "{msg}");
    assert!(msg.contains("First failed move at z=-0.200 um"), "{msg}");
    match err.downcast_ref::<SweepError>() {
        Some(SweepError::InsufficientCalibrationData {
            succeeded, failed, ..
        }) => {
            assert_eq!((*succeeded, *failed), (0, 6));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn single_success_is_not_enough() {
    let mut stage = MemoryStage::new(0.0).rejecting(|z| z > -0.1);
    let err = auto_calibrate(
        &mut dark_camera(),
        &mut stage,
        roi(),
        &SweepPlan::new(-0.2, 0.2, 3).one_way(),
        || false,
        |_| {},
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SweepError>(),
        Some(SweepError::InsufficientCalibrationData {
            succeeded: 1,
            failed: 2,
            ..
        })
    ));
}

#[test]
fn can_be_cancelled() {
    let mut stage = MemoryStage::new(0.0);
    let err = auto_calibrate(
        &mut dark_camera(),
        &mut stage,
        roi(),
        &SweepPlan::new(-0.2, 0.2, 3),
        || true,
        |_| {},
    )
    .unwrap_err();

    assert!(err.to_string().contains("cancelled"));
    assert_eq!(
        err.downcast_ref::<SweepError>(),
        Some(&SweepError::Cancelled { completed: 0 })
    );
    assert!(stage.moves.is_empty());
}

#[test]
fn cancellation_mid_sweep_drops_partial_results() {
    let mut polls = 0;
    let mut stage = MemoryStage::new(0.0);
    let err = auto_calibrate(
        &mut dark_camera(),
        &mut stage,
        roi(),
        &SweepPlan::new(-0.2, 0.2, 3),
        || {
            polls += 1;
            polls > 2
        },
        |_| {},
    )
    .unwrap_err();
    assert_eq!(
        err.downcast_ref::<SweepError>(),
        Some(&SweepError::Cancelled { completed: 2 })
    );
    assert_eq!(stage.moves.len(), 2);
}

#[rstest]
#[case::bidirectional(true, 6)]
#[case::one_way(false, 3)]
fn reports_step_progress(#[case] bidirectional: bool, #[case] expected: usize) {
    let mut plan = SweepPlan::new(-0.2, 0.2, 3);
    plan.bidirectional = bidirectional;
    let mut events: Vec<SweepProgress> = Vec::new();
    auto_calibrate(
        &mut dark_camera(),
        &mut MemoryStage::new(0.0),
        roi(),
        &plan,
        || false,
        |p| events.push(*p),
    )
    .unwrap();

    assert_eq!(events.len(), expected);
    assert_eq!(
        events.iter().map(|e| e.index).collect::<Vec<_>>(),
        (1..=expected).collect::<Vec<_>>()
    );
    assert!(events.iter().all(|e| e.total == expected && e.success));
    assert!(events
        .iter()
        .all(|e| e.measured_z_um == Some(e.target_um)));
}

#[test]
fn failed_moves_are_reported_without_measurement() {
    let mut events = Vec::new();
    auto_calibrate(
        &mut dark_camera(),
        &mut MemoryStage::new(0.0).rejecting(|z| z > 0.1),
        roi(),
        &SweepPlan::new(-0.2, 0.2, 3),
        || false,
        |p| events.push(*p),
    )
    .unwrap();
    let failed: Vec<_> = events.iter().filter(|e| !e.success).collect();
    assert_eq!(failed.len(), 2);
    assert!(failed.iter().all(|e| e.measured_z_um.is_none()));
}

#[test]
fn read_back_failure_falls_back_to_target() {
    let mut stage = MemoryStage::new(0.0).fail_reads();
    let samples = auto_calibrate(
        &mut dark_camera(),
        &mut stage,
        roi(),
        &SweepPlan::new(-0.2, 0.2, 3).one_way(),
        || false,
        |_| {},
    )
    .unwrap();
    let zs: Vec<f64> = samples.iter().map(|s| s.z_um).collect();
    assert_eq!(zs, vec![-0.2, 0.0, 0.2]);
}

#[rstest]
#[case::too_few_steps(SweepPlan::new(-0.2, 0.2, 1))]
#[case::empty_range(SweepPlan::new(0.2, 0.2, 5))]
#[case::reversed(SweepPlan::new(0.4, -0.4, 5))]
#[case::nan(SweepPlan::new(f64::NAN, 0.4, 5))]
fn rejects_invalid_plans(#[case] plan: SweepPlan) {
    let err = auto_calibrate(
        &mut dark_camera(),
        &mut MemoryStage::new(0.0),
        roi(),
        &plan,
        || false,
        |_| {},
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SweepError>(),
        Some(SweepError::InvalidSweepRange(_))
    ));
}

#[test]
fn centered_plan_visits_up_then_down() {
    let targets = SweepPlan::centered(1.0, 0.5, 3).targets().unwrap();
    assert_eq!(targets, vec![0.5, 1.0, 1.5, 1.5, 1.0, 0.5]);
}

#[test]
fn simulated_sweep_produces_monotonic_error() {
    let stage = SimulatedStage::new(0.0);
    let mut camera = SimulatedCamera::new(stage.clone(), SimulatedScene::default());
    camera.start().unwrap();
    let mut stage = stage;

    let samples = auto_calibrate(
        &mut camera,
        &mut stage,
        roi(),
        &SweepPlan::centered(0.0, 0.75, 7).one_way(),
        || false,
        |_| {},
    )
    .unwrap();

    assert_eq!(samples.len(), 7);
    assert!(samples.windows(2).all(|w| w[1].error > w[0].error));
    assert!(samples.iter().all(|s| s.weight > 0.0));
}
