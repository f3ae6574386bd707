use crate::error::Result;

/// Returns the largest `n <= limit` with `fits(n)`, assuming `fits` holds for
/// every count below the first one that fails. `fits(0)` is taken as true and
/// never evaluated.
///
/// The count is doubled from 1 while it fits, then the gap between the last
/// fitting and the first failing count is bisected.
pub fn max_copies<F>(limit: u32, mut fits: F) -> Result<u32>
where
    F: FnMut(u32) -> Result<bool>,
{
    if limit == 0 {
        return Ok(0);
    }

    let mut lo = 0;
    let mut hi = 1;
    while fits(hi)? {
        lo = hi;
        if hi >= limit {
            return Ok(limit);
        }
        hi = hi.saturating_mul(2).min(limit);
    }

    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if fits(mid)? {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Ok(lo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_matches_exhaustive_threshold() {
        for threshold in 0..=40 {
            let found = max_copies(1024, |n| Ok(n <= threshold)).unwrap();
            assert_eq!(found, threshold, "threshold {threshold}");
        }
    }

    #[test]
    fn test_seven_copies_calls() {
        let mut calls = Vec::new();
        let found = max_copies(1024, |n| {
            calls.push(n);
            Ok(n <= 7)
        })
        .unwrap();
        assert_eq!(found, 7);
        assert_eq!(calls, vec![1, 2, 4, 8, 6, 7]);
    }

    #[test]
    fn test_nothing_fits() {
        assert_eq!(max_copies(1024, |_| Ok(false)).unwrap(), 0);
    }

    #[test]
    fn test_always_fits_stops_at_limit() {
        let mut calls = 0;
        let found = max_copies(100, |_| {
            calls += 1;
            Ok(true)
        })
        .unwrap();
        assert_eq!(found, 100);
        // 1, 2, 4, ..., 64, 100
        assert_eq!(calls, 8);
    }

    #[test]
    fn test_error_propagates() {
        let result = max_copies(10, |n| {
            if n > 2 {
                Err(Error::Nesting("boom".to_string()))
            } else {
                Ok(true)
            }
        });
        assert!(matches!(result, Err(Error::Nesting(_))));
    }
}
