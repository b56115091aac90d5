/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use disksum::{SumError, SumResult, MAX_THREADS};

/// Resolve the requested worker count against the machine.
///
/// Zero means "use all physical cores". A request above [`MAX_THREADS`] is a
/// fatal configuration error; a request above the physical core count is
/// clamped with a warning. Hyperthreads are not counted.
pub fn resolve_thread_count(requested: u64) -> SumResult<usize> {
    if requested > MAX_THREADS as u64 {
        return Err(SumError::config(format!(
            "thread count must be at most {MAX_THREADS} (got {requested})"
        )));
    }

    let physical = num_cpus::get_physical().max(1);

    if requested == 0 {
        return Ok(physical.min(MAX_THREADS));
    }

    let requested = requested as usize;
    if requested > physical {
        tracing::warn!(
            requested,
            physical,
            "Desired thread count greater than available cores."
        );
        return Ok(physical);
    }

    Ok(requested)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_means_all_physical_cores() {
        let resolved = resolve_thread_count(0).unwrap();
        assert!(resolved >= 1);
        assert_eq!(resolved, num_cpus::get_physical().min(MAX_THREADS));
    }

    #[test]
    fn small_requests_pass_through() {
        assert_eq!(resolve_thread_count(1).unwrap(), 1);
    }

    #[test]
    fn requests_above_core_count_are_clamped() {
        let physical = num_cpus::get_physical();
        if physical < MAX_THREADS {
            let resolved = resolve_thread_count(physical as u64 + 1).unwrap();
            assert_eq!(resolved, physical);
        }
    }

    #[test]
    fn requests_above_hard_cap_are_fatal() {
        let err = resolve_thread_count(MAX_THREADS as u64 + 1).unwrap_err();
        assert!(err.to_string().contains("thread count must be at most"));
    }
}
