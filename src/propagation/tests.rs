use super::*;
use crate::backend::{AcceleratedBackend, HostBackend};
use crate::systems::Generic;
use crate::testing::{generate_hamiltonian, random_multi_det};
use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn setup() -> (Generic, GenericHamiltonian, MultiSlater) {
    let mut rng = StdRng::seed_from_u64(7);
    let sys = Generic::new(2, 1);
    let ham = generate_hamiltonian(3, 6, &mut rng).unwrap();
    let mut trial = random_multi_det(&sys, 3, 5, &mut rng).unwrap();
    trial.half_rotate(&sys, &ham).unwrap();
    (sys, ham, trial)
}

fn run(mode: PropagationMode, backend: Arc<dyn NumericBackend>, nsteps: usize) -> WalkerBatch {
    let (sys, ham, trial) = setup();
    let prop = Propagator::new(&ham, &trial, 0.005, PropagatorOptions::default(), mode, backend).unwrap();
    let mut walkers = WalkerBatch::new(&sys, &trial, 6).unwrap();
    let mut rng = RandomStream::new(7, 0);
    for step in 1..=nsteps {
        prop.propagate(&mut walkers, &ham, &trial, -1.0, &mut rng).unwrap();
        if step % 5 == 0 {
            walkers.reortho();
        }
    }
    walkers
}

fn assert_batches_agree(a: &WalkerBatch, b: &WalkerBatch) {
    for iw in 0..a.nwalkers {
        assert_relative_eq!(a.weight[iw], b.weight[iw], epsilon = 1e-10, max_relative = 1e-10);
        assert_relative_eq!(a.ovlp[iw].re, b.ovlp[iw].re, epsilon = 1e-10, max_relative = 1e-10);
        assert_relative_eq!(a.ovlp[iw].im, b.ovlp[iw].im, epsilon = 1e-10, max_relative = 1e-10);
        for (x, y) in a.phia[iw].iter().zip(b.phia[iw].iter()) {
            assert_relative_eq!(x.re, y.re, epsilon = 1e-10);
            assert_relative_eq!(x.im, y.im, epsilon = 1e-10);
        }
    }
}

#[test]
fn test_batched_and_reference_modes_agree() {
    let batched = run(PropagationMode::Batched, Arc::new(HostBackend), 12);
    let reference = run(PropagationMode::Reference, Arc::new(HostBackend), 12);
    assert_batches_agree(&batched, &reference);
}

#[test]
fn test_accelerated_backend_matches_host() {
    let host = run(PropagationMode::Batched, Arc::new(HostBackend), 8);
    let accel = run(PropagationMode::Batched, Arc::new(AcceleratedBackend), 8);
    assert_batches_agree(&host, &accel);
}

#[test]
fn test_weights_stay_finite_and_non_negative() {
    let walkers = run(PropagationMode::Batched, Arc::new(HostBackend), 20);
    for w in walkers.weight.iter() {
        assert!(w.is_finite());
        assert!(*w >= 0.0);
    }
    // the overlap is tracked consistently with the amplitudes
    let (_, _, trial) = setup();
    for iw in 0..walkers.nwalkers {
        if walkers.weight[iw] > 0.0 {
            let fresh = trial.overlap(&walkers.phia[iw], &walkers.phib[iw]);
            assert_relative_eq!(fresh.re, walkers.ovlp[iw].re, epsilon = 1e-10, max_relative = 1e-8);
        }
    }
}

#[test]
fn test_walker_with_vanishing_overlap_is_killed() {
    let (sys, ham, trial) = setup();
    let prop = Propagator::new(
        &ham,
        &trial,
        0.01,
        PropagatorOptions::default(),
        PropagationMode::Reference,
        Arc::new(HostBackend),
    )
    .unwrap();
    let mut walkers = WalkerBatch::new(&sys, &trial, 3).unwrap();
    walkers.ovlp[1] = Complex64::new(0.0, 0.0);
    let mut rng = RandomStream::new(1, 0);
    prop.propagate(&mut walkers, &ham, &trial, 0.0, &mut rng).unwrap();
    assert_eq!(walkers.weight[1], 0.0);
    assert!(walkers.weight[0] > 0.0);
}

#[test]
fn test_batched_mode_requires_half_rotation() {
    let mut rng = StdRng::seed_from_u64(3);
    let sys = Generic::new(1, 1);
    let ham = generate_hamiltonian(3, 2, &mut rng).unwrap();
    let trial = random_multi_det(&sys, 3, 2, &mut rng).unwrap();
    let err = Propagator::new(
        &ham,
        &trial,
        0.01,
        PropagatorOptions::default(),
        PropagationMode::Batched,
        Arc::new(HostBackend),
    )
    .unwrap_err();
    assert!(matches!(err, AfqmcError::NotHalfRotated));
}

#[test]
fn test_options_default_from_empty_yaml() {
    let opts: PropagatorOptions = serde_yaml::from_str("taylor_order: 8").unwrap();
    assert_eq!(opts.taylor_order, 8);
    assert_relative_eq!(opts.phaseless_tolerance, std::f64::consts::FRAC_PI_2);
    assert!(serde_yaml::from_str::<PropagatorOptions>("taylor: 8").is_err());
}

fn weight_update_fixture(tolerance: f64) -> (Propagator, WalkerBatch) {
    let (sys, ham, trial) = setup();
    let options = PropagatorOptions { phaseless_tolerance: tolerance, ..PropagatorOptions::default() };
    let mut prop =
        Propagator::new(&ham, &trial, 0.01, options, PropagationMode::Reference, Arc::new(HostBackend)).unwrap();
    // the phase change then comes from the overlap ratio alone
    prop.mean_field.mf_core = Complex64::new(0.0, 0.0);
    let walkers = WalkerBatch::new(&sys, &trial, 3).unwrap();
    (prop, walkers)
}

fn quiet_fields(nchol: usize) -> FieldSample {
    FieldSample {
        xshifted: vec![Complex64::new(0.0, 0.0); nchol],
        cfb: Complex64::new(0.0, 0.0),
        cmf: Complex64::new(0.0, 0.0),
    }
}

#[test]
fn test_phase_change_beyond_tolerance_kills_walker() {
    let (prop, mut walkers) = weight_update_fixture(0.1);
    let fields = quiet_fields(prop.vectors.len());
    let rotated = walkers.ovlp[0] * Complex64::from_polar(1.0, 0.3);
    let scaled = walkers.ovlp[1] * 1.01;
    prop.update_weight(&mut walkers, 0, rotated, &fields, 0.0);
    prop.update_weight(&mut walkers, 1, scaled, &fields, 0.0);
    assert_eq!(walkers.weight[0], 0.0);
    assert!(walkers.weight[1] > 0.0);
    assert_relative_eq!(walkers.phase[1].re, 1.0, epsilon = 1e-12);
    assert_relative_eq!(walkers.phase[1].im, 0.0, epsilon = 1e-12);
    assert_eq!(walkers.weight[2], 1.0);
}

#[test]
fn test_phase_within_tolerance_projects_weight() {
    let (prop, mut walkers) = weight_update_fixture(std::f64::consts::FRAC_PI_2);
    let fields = quiet_fields(prop.vectors.len());
    let old = walkers.ovlp[0];
    let new = old * Complex64::from_polar(1.0, 0.3);
    prop.update_weight(&mut walkers, 0, new, &fields, 0.0);

    let hybrid = walkers.hybrid_energy[0];
    assert_relative_eq!(hybrid.im, -0.3 / 0.01, epsilon = 1e-8);
    let expected = (-hybrid.re * 0.01).exp() * 0.3_f64.cos();
    assert_relative_eq!(walkers.weight[0], expected, epsilon = 1e-12);
    assert_relative_eq!(walkers.phase[0].re, 0.3_f64.cos(), epsilon = 1e-12);
    assert_relative_eq!(walkers.phase[0].im, 0.3_f64.sin(), epsilon = 1e-12);
    assert_relative_eq!(walkers.ovlp[0].re, new.re, epsilon = 1e-14);
    assert_relative_eq!(walkers.ovlp[0].im, new.im, epsilon = 1e-14);
}
