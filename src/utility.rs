/// Ordinary least-squares fit of `y = intercept + slope * x`.
///
/// Used to read convergence rates off `log2` level statistics.
///
/// # Errors
/// Fails when the slices differ in length, hold fewer than two points, or
/// all `x` coincide.
///
/// # Example
/// ```
/// use mlmc_wealth::utility::linear_regression;
///
/// // log2 of level variances that quarter per level
/// let x = vec![1.0, 2.0, 3.0];
/// let y = vec![-2.0, -4.0, -6.0];
/// let (_, slope) = linear_regression(&x, &y).unwrap();
/// assert!((slope + 2.0).abs() < 1e-10);
/// ```
pub fn linear_regression(x: &[f64], y: &[f64]) -> Result<(f64, f64), &'static str> {
    if x.len() != y.len() {
        return Err("x and y must have the same length");
    }
    let n = x.len();
    if n < 2 {
        return Err("Need at least two points for regression");
    }

    let mean_x = x.iter().sum::<f64>() / n as f64;
    let mean_y = y.iter().sum::<f64>() / n as f64;

    let (num, den) = x
        .iter()
        .zip(y)
        .fold((0.0, 0.0), |(num, den), (&xi, &yi)| {
            let dx = xi - mean_x;
            (num + dx * (yi - mean_y), den + dx * dx)
        });

    if den == 0.0 {
        return Err("All x values are identical; cannot fit line");
    }

    let slope = num / den;
    let intercept = mean_y - slope * mean_x;

    Ok((intercept, slope))
}

/// Rounds `value` half away from zero to `digits` decimal places.
pub fn round_to(value: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (value * scale).round() / scale
}
