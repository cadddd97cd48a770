//! Stop criteria: epoch budget plus the RMS and Max tolerance families.

use crate::error::Result;
use tracing::debug;

/// Result of checking one tolerance family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyCheck {
    /// No positive tolerance component, so the family does not take part.
    NotConfigured,
    Satisfied,
    Violated,
}

/// Check one tolerance family.
///
/// Dimensions whose tolerance is not positive are ignored; the rest must all
/// hold. Failing to resolve the tolerance or to compute the errors counts as
/// a violation so training continues.
pub fn check_family<F>(tolerance: Result<Option<Vec<f64>>>, errors: F) -> FamilyCheck
where
    F: FnOnce() -> Result<Vec<f64>>,
{
    let tolerance = match tolerance {
        Ok(Some(tol)) if tol.iter().any(|t| *t > 0.0) => tol,
        Ok(_) => return FamilyCheck::NotConfigured,
        Err(e) => {
            debug!(error = %e, "Tolerance unavailable, criterion not met");
            return FamilyCheck::Violated;
        }
    };
    let errors = match errors() {
        Ok(errors) => errors,
        Err(e) => {
            debug!(error = %e, "Error evaluation failed, criterion not met");
            return FamilyCheck::Violated;
        }
    };
    if errors.len() != tolerance.len() {
        return FamilyCheck::Violated;
    }
    let all_within = tolerance
        .iter()
        .zip(&errors)
        .filter(|(tol, _)| **tol > 0.0)
        .all(|(tol, err)| err <= tol);
    if all_within {
        FamilyCheck::Satisfied
    } else {
        FamilyCheck::Violated
    }
}

/// At least one family was checked and none of the checked ones was violated.
pub fn tolerances_met(rms: FamilyCheck, max: FamilyCheck) -> bool {
    let checks = [rms, max];
    let checked = checks.iter().any(|c| *c != FamilyCheck::NotConfigured);
    checked && !checks.contains(&FamilyCheck::Violated)
}

/// Combine the epoch budget with the two tolerance families.
pub fn stop_criteria_met(
    epoch_count: usize,
    max_epochs: usize,
    rms: FamilyCheck,
    max: FamilyCheck,
) -> bool {
    epoch_count >= max_epochs || tolerances_met(rms, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApproxError;

    #[test]
    fn test_family_ignores_non_positive_dimensions() {
        let check = check_family(Ok(Some(vec![0.1, 0.0])), || Ok(vec![0.05, 99.0]));
        assert_eq!(check, FamilyCheck::Satisfied);
        let check = check_family(Ok(Some(vec![0.1, 0.2])), || Ok(vec![0.05, 0.3]));
        assert_eq!(check, FamilyCheck::Violated);
    }

    #[test]
    fn test_family_not_configured() {
        assert_eq!(
            check_family(Ok(None), || Ok(vec![1.0])),
            FamilyCheck::NotConfigured
        );
        assert_eq!(
            check_family(Ok(Some(vec![0.0])), || Ok(vec![1.0])),
            FamilyCheck::NotConfigured
        );
    }

    #[test]
    fn test_family_failures_mean_not_met() {
        let check = check_family(Ok(Some(vec![1.0])), || Err(ApproxError::empty("no points")));
        assert_eq!(check, FamilyCheck::Violated);
        let check = check_family(Err(ApproxError::invalid_config("no bounds")), || {
            Ok(vec![0.0])
        });
        assert_eq!(check, FamilyCheck::Violated);
        let check = check_family(Ok(Some(vec![1.0])), || Ok(vec![f64::NAN]));
        assert_eq!(check, FamilyCheck::Violated);
    }

    #[test]
    fn test_combination() {
        use FamilyCheck::*;
        assert!(stop_criteria_met(100, 100, Violated, Violated));
        assert!(!stop_criteria_met(10, 100, NotConfigured, NotConfigured));
        assert!(stop_criteria_met(10, 100, Satisfied, NotConfigured));
        assert!(stop_criteria_met(10, 100, NotConfigured, Satisfied));
        assert!(stop_criteria_met(10, 100, Satisfied, Satisfied));
        assert!(!stop_criteria_met(10, 100, Satisfied, Violated));
        assert!(!tolerances_met(NotConfigured, Violated));
    }
}
