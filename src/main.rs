use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use lbm_scheme::{
    BoundaryConfig, BoundaryMethod, Config, Expr, Float, GeometryConfig, Initializer, SchemeConfig,
    Simulation,
};
use log::info;
use std::env;

const GAMMA: Float = 2.0 / 3.0;

/// Riemann data: left state for `x < 0.5`, right state beyond.
fn riemann(left: Float, right: Float) -> Initializer {
    Initializer::function(move |x: &[Float; 3]| if x[0] < 0.5 { left } else { right })
}

/// p-system `ua_t - ub_x = 0`, `ub_t + p(ua)_x = 0` with `p(u) = u^-gamma`,
/// one D1Q2 sub-scheme per unknown.
fn p_system(dx: Float) -> Config {
    let basis = || vec![Expr::constant(1.0), Expr::la() * Expr::x()];
    let ua = || Expr::symbol("ua");
    let ub = || Expr::symbol("ub");

    let schemes = vec![
        SchemeConfig::new(vec![1, 2], basis(), vec![0.0, 1.7], vec![ua(), -ub()])
            .conserved(&["ua"])
            .init(0, riemann(1.50, 1.25)),
        SchemeConfig::new(vec![1, 2], basis(), vec![0.0, 1.7], vec![ub(), ua().powf(-GAMMA)])
            .conserved(&["ub"])
            .init(0, riemann(1.50, 1.00)),
    ];

    let geometry = GeometryConfig { bounds: vec![[0.0, 1.0]], labels: vec![0], elements: vec![] };
    Config::new(geometry, dx, 2.0, schemes)
        .with_boundary(0, BoundaryConfig::uniform(BoundaryMethod::Neumann, 2))
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() > 3 || args.iter().any(|a| a == "-h" || a == "--help") {
        eprintln!("Usage: {} [space_step] [final_time]", args[0]);
        eprintln!("  space_step - lattice spacing (default 1/256)");
        eprintln!("  final_time - simulated time (default 0.25)");
        std::process::exit(1);
    }
    let dx: Float = match args.get(1) {
        Some(a) => a.parse().with_context(|| format!("invalid space step {a:?}"))?,
        None => 1.0 / 256.0,
    };
    let t_final: Float = match args.get(2) {
        Some(a) => a.parse().with_context(|| format!("invalid final time {a:?}"))?,
        None => 0.25,
    };

    let config = p_system(dx);
    info!(
        "p-system: dx = {dx}, la = {}, dt = {}, Tf = {t_final}",
        config.scheme_velocity,
        config.dt()
    );
    let mut sim = Simulation::new(config).context("failed to build the simulation")?;

    let steps = (t_final / sim.dt()).round() as u64;
    let bar = ProgressBar::new(steps);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} t={msg}")
            .context("bad progress template")?,
    );
    while sim.t() < t_final - 0.5 * sim.dt() {
        sim.advance_one_step()?;
        bar.inc(1);
        bar.set_message(format!("{:.4}", sim.t()));
    }
    bar.finish();

    let interior = sim.interior_indices();
    for (k, name) in ["ua", "ub"].iter().enumerate() {
        let values: Vec<Float> = interior.iter().map(|&x| sim.m(k, 0)[x]).collect();
        let min = values.iter().copied().fold(Float::INFINITY, Float::min);
        let max = values.iter().copied().fold(Float::NEG_INFINITY, Float::max);
        let mass: Float = values.iter().sum::<Float>() * sim.domain().dx;
        info!("{name}: min {min:.6}, max {max:.6}, integral {mass:.6}");
    }
    info!("finished {} steps at t = {:.6}", sim.nt(), sim.t());

    Ok(())
}
