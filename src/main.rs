use std::time::Instant;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mlmc_wealth::diagnostics::ConvergenceRates;
use mlmc_wealth::{mlmc, GaussianIncrements, MlmcConfig, MlmcError, WealthParams};

/// Estimate expectation and standard deviation of terminal wealth with MLMC.
#[derive(Parser)]
#[command(name = "mlmc_wealth")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Initial wealth
    #[arg(long, default_value_t = 100.0)]
    w0: f64,

    /// Initial variance
    #[arg(long, default_value_t = 0.0457)]
    v0: f64,

    /// Riskless rate
    #[arg(long, default_value_t = 0.03)]
    r: f64,

    /// Mean-reversion speed
    #[arg(long, default_value_t = 5.07)]
    kappa: f64,

    /// Long-run variance
    #[arg(long, default_value_t = 0.0457)]
    theta: f64,

    /// Market price of variance risk
    #[arg(long, default_value_t = 1.605)]
    xi: f64,

    /// Volatility of variance
    #[arg(long, default_value_t = 0.48)]
    sigma: f64,

    /// Asset/variance correlation
    #[arg(long, default_value_t = -0.767, allow_negative_numbers = true)]
    rho: f64,

    /// Fraction of wealth in the risky asset
    #[arg(long, default_value_t = 0.1)]
    p_opt: f64,

    /// Horizon T
    #[arg(short = 't', long, default_value_t = 10.0)]
    horizon: f64,

    /// Initial paths per level
    #[arg(short = 'n', long, default_value_t = 1000)]
    initial_samples: usize,

    /// Target RMS accuracy
    #[arg(short, long, default_value_t = 0.05)]
    epsilon: f64,

    /// Use the plain two-step scheme instead of the antithetic one
    #[arg(long)]
    plain: bool,

    /// Random seed
    #[arg(short, long, default_value_t = 42)]
    seed: u64,

    /// Also print per-level diagnostics
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), MlmcError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let params = WealthParams {
        w0: cli.w0,
        v0: cli.v0,
        r: cli.r,
        kappa: cli.kappa,
        theta: cli.theta,
        xi: cli.xi,
        sigma: cli.sigma,
        rho: cli.rho,
        p_opt: cli.p_opt,
        horizon: cli.horizon,
    };
    let config = MlmcConfig::builder()
        .initial_samples(cli.initial_samples)
        .epsilon(cli.epsilon)
        .antithetic(!cli.plain)
        .build()?;

    info!(seed = cli.seed, antithetic = config.antithetic(), "starting MLMC");
    let start = Instant::now();
    let result = mlmc(&params, &config, GaussianIncrements::from_seed(cli.seed))?;
    let elapsed = start.elapsed();

    println!("({}, {})", result.estimate, result.std_dev);
    println!("\nRun time:  {:.5} sec", elapsed.as_secs_f64());

    if cli.verbose {
        println!("\nlevel  samples  mean  V_l  Var_l");
        for l in 0..result.samples.len() {
            println!(
                "{:>5}  {:>7}  {:.4e}  {:.4e}  {:.4e}",
                l, result.samples[l], result.means[l], result.variances[l], result.raw_variances[l]
            );
        }
        println!("cost: {:.0}", result.cost);
        match ConvergenceRates::estimate(&result) {
            Ok(rates) => println!(
                "alpha = {:.3}, beta = {:.3}, gamma = {:.3}",
                rates.alpha, rates.beta, rates.gamma
            ),
            Err(reason) => println!("rates unavailable: {reason}"),
        }
    }

    Ok(())
}
