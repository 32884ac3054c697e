// Fixed-budget binary search over a steal fraction in [0, 1]

/// Find the largest feasible fraction with `rounds` probes
///
/// Each probe at the midpoint either succeeds (lower bound rises, its result
/// becomes the best so far) or fails (upper bound drops). After `rounds`
/// probes the best fraction is within `2^-rounds` of the true threshold.
/// Returns `None` if no probe succeeded.
pub fn search_max_fraction<T, E>(
    rounds: u32,
    mut probe: impl FnMut(f64) -> Result<Option<T>, E>,
) -> Result<Option<(f64, T)>, E> {
    let mut lo = 0.0_f64;
    let mut hi = 1.0_f64;
    let mut best = None;

    for _ in 0..rounds {
        let fraction = 0.5 * (lo + hi);
        match probe(fraction)? {
            Some(found) => {
                lo = fraction;
                best = Some((fraction, found));
            }
            None => hi = fraction,
        }
    }

    Ok(best)
}
