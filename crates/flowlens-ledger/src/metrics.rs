use crate::step::StepMetrics;

/// Merge two metric snapshots of the same logical invocation.
///
/// The snapshot with the larger `duration_ms` is preferred; a missing
/// duration loses and a tie goes to `next`. Fields the preferred snapshot
/// lacks fall back to the other one. An all-empty result is `None`.
pub fn merge_metrics_prefer_longer(
    prior: Option<&StepMetrics>,
    next: Option<&StepMetrics>,
) -> Option<StepMetrics> {
    let (preferred, other) = match (prior, next) {
        (None, None) => return None,
        (Some(p), None) => (p, None),
        (None, Some(n)) => (n, None),
        (Some(p), Some(n)) => {
            let prior_ms = p.duration_ms.unwrap_or(f64::NEG_INFINITY);
            let next_ms = n.duration_ms.unwrap_or(f64::NEG_INFINITY);
            if prior_ms > next_ms {
                (p, Some(n))
            } else {
                (n, Some(p))
            }
        }
    };

    let merged = match other {
        None => preferred.clone(),
        Some(o) => StepMetrics {
            duration_ms: preferred.duration_ms.or(o.duration_ms),
            input_tokens: preferred.input_tokens.or(o.input_tokens),
            output_tokens: preferred.output_tokens.or(o.output_tokens),
            total_tokens: preferred.total_tokens.or(o.total_tokens),
            cost: preferred.cost.or(o.cost),
        },
    };
    (!merged.is_empty()).then_some(merged)
}
