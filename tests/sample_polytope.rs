use std::sync::Arc;

use anyhow::Result;
use approx::assert_relative_eq;
use arrow::array::{Array, Float64Array, StructArray};
use conc_sampler::{
    test_polytopes::{cut_square, fixed_pool, unit_box, VertexSolver},
    AchrSampler, Columns, ConcSampler, OptGpSampler, Problem, SamplerError, SamplerSettings,
    Strategy, WarmupSolver, WarmupStrategy,
};
use faer::Mat;
use pretty_assertions::assert_eq;

fn column<'a>(table: &'a StructArray, name: &str) -> &'a Float64Array {
    table
        .column_by_name(name)
        .expect("Missing column")
        .as_any()
        .downcast_ref::<Float64Array>()
        .expect("Not a float column")
}

fn column_means(samples: &Mat<f64>) -> Vec<f64> {
    let rows = samples.nrows() as f64;
    (0..samples.ncols())
        .map(|j| samples.col(j).iter().sum::<f64>() / rows)
        .collect()
}

#[test]
fn box_mean_converges() -> Result<()> {
    for strategy in [Strategy::ArtificialCentering, Strategy::OptimizedParallel] {
        let problem = Arc::new(unit_box(2));
        let solver = VertexSolver::for_box(&problem);
        let settings = SamplerSettings {
            strategy,
            thinning: 1,
            seed: Some(2024),
            processes: Some(4),
            ..Default::default()
        };
        let mut sampler = ConcSampler::new(problem, &settings, solver)?;
        let table = sampler.sample(1000, Columns::Concentrations)?;
        assert_eq!(table.len(), 1000);

        for name in ["m0", "m1"] {
            let values = column(&table, name);
            assert!(values.values().iter().all(|&val| val > 0.));
            let logs: Vec<f64> = values.values().iter().map(|val| val.ln()).collect();
            let bounds = -1. - 1e-7..=1. + 1e-7;
            assert!(logs.iter().all(|val| bounds.contains(val)));
            let mean = logs.iter().sum::<f64>() / logs.len() as f64;
            assert!(mean.abs() < 0.2, "{:?}: {} mean {}", strategy, name, mean);
        }
    }
    Ok(())
}

#[test]
fn all_samples_feasible() -> Result<()> {
    for (strategy, processes) in [
        (Strategy::ArtificialCentering, 1),
        (Strategy::OptimizedParallel, 1),
        (Strategy::OptimizedParallel, 3),
    ] {
        for (problem, solver) in [cut_square(), fixed_pool()] {
            let settings = SamplerSettings {
                strategy,
                thinning: 10,
                seed: Some(77),
                processes: Some(processes),
                ..Default::default()
            };
            let mut sampler = ConcSampler::new(Arc::new(problem), &settings, solver)?;
            let warmup_checks = sampler.base().validate(sampler.base().warmup());
            assert!(warmup_checks.iter().all(|check| check.is_valid()));

            let samples = sampler.sample_log(200)?;
            let checks = sampler.base().validate(samples.as_ref());
            assert!(checks.iter().all(|check| check.is_valid()));
        }
    }
    Ok(())
}

#[test]
fn achr_is_reproducible() -> Result<()> {
    let draw = || -> Result<Mat<f64>> {
        let (problem, solver) = cut_square();
        let settings = SamplerSettings {
            seed: Some(123),
            thinning: 7,
            ..Default::default()
        };
        let mut sampler = AchrSampler::new(Arc::new(problem), &settings, solver)?;
        sampler.sample_log(50)
    };
    assert_eq!(draw()?, draw()?);
    Ok(())
}

#[test]
fn optgp_rounds_up_sample_count() -> Result<()> {
    let problem = Arc::new(unit_box(3));
    let solver = VertexSolver::for_box(&problem);
    let settings = SamplerSettings {
        seed: Some(8),
        thinning: 2,
        processes: Some(3),
        ..Default::default()
    };
    let mut sampler = OptGpSampler::new(problem, &settings, solver)?;
    let table = sampler.sample(8, Columns::Concentrations)?;
    assert_eq!(table.len(), 9);
    assert_eq!(sampler.base().n_samples(), 9);
    Ok(())
}

#[test]
fn table_round_trips_log_space() -> Result<()> {
    let (problem, solver) = cut_square();
    let settings = SamplerSettings {
        seed: Some(5),
        thinning: 5,
        processes: Some(2),
        ..Default::default()
    };
    let mut sampler = OptGpSampler::new(Arc::new(problem), &settings, solver)?;
    let samples = sampler.sample_log(20)?;
    let base = sampler.base();
    let table = base.to_table(samples.as_ref(), Columns::Variables)?;

    for (j, name) in ["atp_c", "adp_c", "ln_keq"].iter().enumerate() {
        let values = column(&table, name);
        for (i, &val) in values.values().iter().enumerate() {
            assert!(val > 0.);
            assert_relative_eq!(val.ln(), samples[(i, j)], epsilon = 1e-12);
        }
    }

    let table = base.to_table(samples.as_ref(), Columns::Concentrations)?;
    assert_eq!(table.num_columns(), 2);
    assert!(table.column_by_name("ln_keq").is_none());
    Ok(())
}

#[test]
fn center_is_mean_of_emitted_samples() -> Result<()> {
    let problem = Arc::new(unit_box(2));
    let solver = VertexSolver::for_box(&problem);
    let settings = SamplerSettings {
        seed: Some(31),
        thinning: 3,
        processes: Some(2),
        ..Default::default()
    };
    let mut sampler = OptGpSampler::new(problem, &settings, solver)?;
    let samples = sampler.sample_log(100)?;
    let means = column_means(&samples);
    let center = sampler.base().center();
    for (center, mean) in center.iter().zip(means.iter()) {
        assert_relative_eq!(center, mean, epsilon = 1e-12);
    }
    Ok(())
}

#[test]
fn variable_extreme_warmup() -> Result<()> {
    let (problem, solver) = cut_square();
    let settings = SamplerSettings {
        strategy: Strategy::ArtificialCentering,
        warmup: WarmupStrategy::VariableExtremes,
        seed: Some(3),
        thinning: 4,
        ..Default::default()
    };
    let mut sampler = ConcSampler::new(Arc::new(problem), &settings, solver)?;
    assert!(sampler.base().n_warmup() >= 2);
    let samples = sampler.sample_log(50)?;
    let checks = sampler.base().validate(samples.as_ref());
    assert!(checks.iter().all(|check| check.is_valid()));
    Ok(())
}

struct NoSolution;

impl WarmupSolver for NoSolution {
    fn maximize(&mut self, _: &Problem, _: &[f64]) -> Result<Option<Box<[f64]>>> {
        Ok(None)
    }
}

#[test]
fn warmup_failure_aborts() {
    let settings = SamplerSettings {
        seed: Some(1),
        max_warmup_tries: 3,
        ..Default::default()
    };
    let Err(err) = ConcSampler::new(Arc::new(unit_box(2)), &settings, NoSolution) else {
        panic!("warmup should fail");
    };
    assert!(matches!(
        err.downcast_ref::<SamplerError>(),
        Some(SamplerError::WarmupExhausted { row: 0, tries: 3 })
    ));
}
