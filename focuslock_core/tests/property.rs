use focuslock_core::{
    AutofocusConfig, AutofocusController, FocusCalibration, Roi, astigmatic_error_signal,
};
use focuslock_hardware::{SimulatedCamera, SimulatedScene, SimulatedStage};
use focuslock_traits::{Camera, Image};
use proptest::prelude::*;

prop_compose! {
    fn patch_strategy()(
        w in 1usize..24,
        h in 1usize..24,
    )(
        pixels in proptest::collection::vec(0.0f64..4096.0, w * h),
        w in Just(w),
        h in Just(h),
    ) -> Image {
        Image::from_vec(w, h, pixels).unwrap()
    }
}

prop_compose! {
    fn loop_config()(
        kp in 0.0f64..3.0,
        ki in 0.0f64..3.0,
        max_step_um in 0.01f64..1.0,
        integral_limit_um in 0.0f64..2.0,
        lo in -1.0f64..0.0,
        span in 0.05f64..2.0,
        error_alpha in 0.0f64..1.0,
    ) -> AutofocusConfig {
        AutofocusConfig {
            kp,
            ki,
            max_step_um,
            integral_limit_um,
            error_alpha,
            stage_min_um: Some(lo),
            stage_max_um: Some(lo + span),
            max_abs_excursion_um: Some(0.5),
            ..AutofocusConfig::default()
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn anisotropy_is_bounded(img in patch_strategy()) {
        let roi = Roi::new(0, 0, 64, 64);
        let e = astigmatic_error_signal(&img, roi).unwrap();
        prop_assert!((-1.0..=1.0).contains(&e), "e={}", e);
    }

    #[test]
    fn commands_stay_inside_every_limit(
        cfg in loop_config(),
        start_frac in 0.0f64..=1.0,
        slope in -5.0f64..5.0,
        focus in -1.0f64..1.0,
    ) {
        let lo = cfg.stage_min_um.unwrap();
        let hi = cfg.stage_max_um.unwrap();
        let start = lo + start_frac * (hi - lo);
        let stage = SimulatedStage::new(start);
        let scene = SimulatedScene { focal_plane_um: focus, ..SimulatedScene::default() };
        let mut camera = SimulatedCamera::new(stage.clone(), scene);
        camera.start().unwrap();
        let mut ctrl = AutofocusController::new(
            camera,
            stage,
            cfg,
            FocusCalibration::new(0.0, slope),
        )
        .unwrap();

        for _ in 0..10 {
            let s = ctrl.run_step(None).unwrap();
            prop_assert!(s.commanded_z_um >= lo - 1e-12 && s.commanded_z_um <= hi + 1e-12);
            prop_assert!((s.commanded_z_um - start).abs() <= 0.5 + 1e-12);
            prop_assert!((s.commanded_z_um - s.stage_z_um).abs() <= cfg.max_step_um + 1e-12);
            prop_assert!(ctrl.integral_um().abs() <= cfg.integral_limit_um + 1e-12);
        }
    }
}
