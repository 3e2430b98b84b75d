/// The upper 5% critical value of the chi-square distribution with `df`
/// degrees of freedom, by the Wilson-Hilferty approximation.
pub fn chi2_critical_95(df: usize) -> f64 {
    let k = df as f64;
    let z = 1.6448536269514722;
    k * (1. - 2. / (9. * k) + z * (2. / (9. * k)).sqrt()).powi(3)
}

/// Chi-square goodness-of-fit of observed category counts against
/// expected probabilities, at the 5% level. Categories with negligible
/// expectation must be empty.
pub fn goodness_of_fit(observed: &[u64], probs: &[f64]) -> bool {
    assert_eq!(observed.len(), probs.len());
    let n: u64 = observed.iter().sum();
    let mut statistic = 0.;
    let mut categories = 0;
    for (&o, &p) in observed.iter().zip(probs) {
        let expected = p * n as f64;
        if expected < 1e-9 {
            assert_eq!(o, 0, "draw landed in a zero-probability category");
            continue;
        }
        statistic += (o as f64 - expected).powi(2) / expected;
        categories += 1;
    }
    statistic < chi2_critical_95(categories - 1)
}
