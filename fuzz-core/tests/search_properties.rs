use anyhow::Result;
use scenario_fuzz_core::{
    build_strategy, Bounds, GaParams, Outcome, PsoParams, RewardFunction, SearchConfig,
    SearchMethod, SearchStrategy,
};

fn collision_outcome(run_number: u64) -> Outcome {
    Outcome {
        collision_occurred: true,
        min_time_to_collision: Some(0.4),
        min_distance: Some(0.0),
        ego: None,
        npc: None,
        run_number,
        valid: true,
        failure: None,
    }
}

/// Drive a strategy to convergence with `evaluate`, returning every proposal and reward.
fn drive(
    strategy: &mut dyn SearchStrategy,
    mut evaluate: impl FnMut(&[f64]) -> f64,
) -> Result<Vec<(Vec<f64>, f64)>> {
    let mut seen = Vec::new();
    while let Some(vector) = strategy.propose_next() {
        let reward = evaluate(&vector);
        strategy.absorb(&vector, reward)?;
        seen.push((vector, reward));
    }
    Ok(seen)
}

#[test]
fn random_search_single_dimension_with_collision_stub() -> Result<()> {
    let bounds = Bounds::new(&[(5.0, 25.0)])?;
    let mut strategy = build_strategy(&SearchConfig::new(SearchMethod::Random), bounds, 5, 42)?;

    let mut run = 0;
    let seen = drive(strategy.as_mut(), |_| {
        run += 1;
        RewardFunction::Ttc.score(&collision_outcome(run))
    })?;

    assert_eq!(seen.len(), 5);
    let mut best = f64::INFINITY;
    for (i, (vector, reward)) in seen.iter().enumerate() {
        assert!((5.0..=25.0).contains(&vector[0]));
        assert_eq!(*reward, 0.0);
        if *reward < best {
            best = *reward;
        }
        if i == 0 {
            assert_eq!(best, 0.0);
        }
    }
    Ok(())
}

#[test]
fn pso_positions_stay_clipped_under_aggressive_coefficients() -> Result<()> {
    let ranges = [(0.0, 1.0), (-50.0, -10.0), (3.0, 3.5)];
    let bounds = Bounds::new(&ranges)?;
    let config = SearchConfig {
        method: SearchMethod::Pso,
        pso: PsoParams {
            population_size: 8,
            w: 1.5,
            c1: 4.0,
            c2: 4.0,
        },
        ..SearchConfig::default()
    };
    let mut strategy = build_strategy(&config, bounds.clone(), 12, 9)?;

    let seen = drive(strategy.as_mut(), |v| v.iter().sum::<f64>().abs())?;
    assert_eq!(seen.len(), 8 * 12);
    for (vector, _) in &seen {
        assert!(bounds.contains(vector), "{vector:?} escaped bounds");
    }
    for position in strategy.population() {
        assert!(bounds.contains(&position));
    }
    Ok(())
}

#[test]
fn ga_offspring_stay_clipped_under_heavy_mutation() -> Result<()> {
    let bounds = Bounds::new(&[(10.0, 11.0), (0.0, 1000.0)])?;
    let config = SearchConfig {
        method: SearchMethod::Ga,
        ga: GaParams {
            population_size: 10,
            prob_mut: 1.0,
            mutation_scale: 5.0,
            ..GaParams::default()
        },
        ..SearchConfig::default()
    };
    let mut strategy = build_strategy(&config, bounds.clone(), 8, 17)?;

    let seen = drive(strategy.as_mut(), |v| v[1])?;
    assert_eq!(seen.len(), config.ga.evaluations_for(8));
    for (vector, _) in &seen {
        assert!(bounds.contains(vector), "{vector:?} escaped bounds");
    }
    Ok(())
}

#[test]
fn same_seed_reproduces_proposals() -> Result<()> {
    for method in SearchMethod::ALL {
        let config = SearchConfig {
            method,
            pso: PsoParams {
                population_size: 4,
                ..PsoParams::default()
            },
            ga: GaParams {
                population_size: 4,
                ..GaParams::default()
            },
        };
        let bounds = Bounds::new(&[(0.0, 10.0), (1.0, 2.0)])?;
        let mut a = build_strategy(&config, bounds.clone(), 3, 1234)?;
        let mut b = build_strategy(&config, bounds, 3, 1234)?;
        let first = drive(a.as_mut(), |v| v[0] * v[1])?;
        let second = drive(b.as_mut(), |v| v[0] * v[1])?;
        assert_eq!(first, second, "{method} is not reproducible");
    }
    Ok(())
}

#[test]
fn aborted_strategy_stops_proposing() -> Result<()> {
    let config = SearchConfig {
        method: SearchMethod::Ga,
        ga: GaParams {
            population_size: 30,
            ..GaParams::default()
        },
        ..SearchConfig::default()
    };
    let bounds = Bounds::new(&[(0.0, 1.0)])?;
    let mut strategy = build_strategy(&config, bounds, 5, 42)?;
    for _ in 0..12 {
        let v = strategy.propose_next().expect("budget not exhausted");
        strategy.absorb(&v, 1.0)?;
    }
    strategy.abort();
    assert!(strategy.propose_next().is_none());
    assert!(strategy.absorb(&[0.5], 1.0).is_err());
    Ok(())
}
