//! Pass/fail decision over a diff summary.

use crate::differ::DiffSummary;
use serde::{Deserialize, Serialize};

/// How the pixel-count and ratio limits combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyComposition {
    /// Pass when any configured limit holds (the more permissive wins)
    #[default]
    Any,
    /// Pass only when every configured limit holds
    All,
}

/// Why a verdict came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictReason {
    /// No compared pixel differs
    Identical,
    /// Differing pixels at or under `max_diff_pixels`
    WithinPixelLimit,
    /// Differing percentage at or under the ratio limit
    WithinRatioLimit,
    /// Every configured limit holds
    WithinLimits,
    /// Tolerance exceeded
    Exceeded,
}

/// Outcome of applying a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the comparison passes
    pub passed: bool,
    /// Which rule decided it
    pub reason: VerdictReason,
}

impl Verdict {
    const fn pass(reason: VerdictReason) -> Self {
        Self {
            passed: true,
            reason,
        }
    }

    const fn fail() -> Self {
        Self {
            passed: false,
            reason: VerdictReason::Exceeded,
        }
    }
}

/// Tolerance policy
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VerdictPolicy {
    /// Absolute limit on differing pixels
    pub max_diff_pixels: Option<u64>,
    /// Limit on differing pixels as a fraction (0.0-1.0) of compared pixels
    pub max_diff_ratio: Option<f64>,
    /// How limits combine
    pub composition: PolicyComposition,
}

impl VerdictPolicy {
    /// Policy with no tolerance: only identical captures pass
    #[must_use]
    pub fn exact() -> Self {
        Self::default()
    }

    /// Set the absolute pixel limit
    #[must_use]
    pub const fn with_max_diff_pixels(mut self, pixels: u64) -> Self {
        self.max_diff_pixels = Some(pixels);
        self
    }

    /// Set the ratio limit
    #[must_use]
    pub const fn with_max_diff_ratio(mut self, ratio: f64) -> Self {
        self.max_diff_ratio = Some(ratio);
        self
    }

    /// Set how limits combine
    #[must_use]
    pub const fn with_composition(mut self, composition: PolicyComposition) -> Self {
        self.composition = composition;
        self
    }

    /// Decide pass/fail
    #[must_use]
    pub fn evaluate(&self, summary: &DiffSummary) -> Verdict {
        if summary.is_identical() {
            return Verdict::pass(VerdictReason::Identical);
        }

        let pixel_ok = self.max_diff_pixels.map(|max| summary.diff_pixels <= max);
        let ratio_ok = self
            .max_diff_ratio
            .map(|ratio| summary.diff_percentage() <= ratio * 100.0);

        match self.composition {
            PolicyComposition::Any => {
                if pixel_ok == Some(true) {
                    Verdict::pass(VerdictReason::WithinPixelLimit)
                } else if ratio_ok == Some(true) {
                    Verdict::pass(VerdictReason::WithinRatioLimit)
                } else {
                    Verdict::fail()
                }
            }
            PolicyComposition::All => match (pixel_ok, ratio_ok) {
                (None, None) | (Some(false), _) | (_, Some(false)) => Verdict::fail(),
                _ => Verdict::pass(VerdictReason::WithinLimits),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn summary(diff_pixels: u64, total_pixels: u64) -> DiffSummary {
        DiffSummary {
            diff_pixels,
            total_pixels,
            masked_pixels: 0,
            max_delta: 0.0,
        }
    }

    #[test]
    fn test_identical_passes_any_policy() {
        let s = summary(0, 100);
        assert!(VerdictPolicy::exact().evaluate(&s).passed);
        let strict = VerdictPolicy::exact()
            .with_max_diff_pixels(0)
            .with_max_diff_ratio(0.0)
            .with_composition(PolicyComposition::All);
        assert_eq!(strict.evaluate(&s).reason, VerdictReason::Identical);
    }

    #[test]
    fn test_exact_policy_fails_any_difference() {
        let verdict = VerdictPolicy::exact().evaluate(&summary(1, 1_000_000));
        assert!(!verdict.passed);
        assert_eq!(verdict.reason, VerdictReason::Exceeded);
    }

    #[test]
    fn test_or_composition_percentage_rescues_pixel_limit() {
        // 150 of 1,000,000 pixels is 0.015%, under a 10% ratio but over 100 pixels.
        let policy = VerdictPolicy::exact()
            .with_max_diff_pixels(100)
            .with_max_diff_ratio(0.1);
        let verdict = policy.evaluate(&summary(150, 1_000_000));
        assert!(verdict.passed);
        assert_eq!(verdict.reason, VerdictReason::WithinRatioLimit);
    }

    #[test]
    fn test_and_composition_requires_both_limits() {
        let policy = VerdictPolicy::exact()
            .with_max_diff_pixels(100)
            .with_max_diff_ratio(0.1)
            .with_composition(PolicyComposition::All);
        assert!(!policy.evaluate(&summary(150, 1_000_000)).passed);
        assert_eq!(
            policy.evaluate(&summary(50, 1_000_000)).reason,
            VerdictReason::WithinLimits
        );
    }

    #[test]
    fn test_pixel_limit_is_inclusive() {
        let policy = VerdictPolicy::exact().with_max_diff_pixels(10);
        assert!(policy.evaluate(&summary(10, 100)).passed);
        assert!(!policy.evaluate(&summary(11, 100)).passed);
    }

    #[test]
    fn test_ratio_limit_is_inclusive() {
        let policy = VerdictPolicy::exact().with_max_diff_ratio(0.05);
        assert!(policy.evaluate(&summary(5, 100)).passed);
        assert!(!policy.evaluate(&summary(6, 100)).passed);
    }

    #[test]
    fn test_composition_deserializes_lowercase() {
        let c: PolicyComposition = serde_json::from_str("\"all\"").unwrap();
        assert_eq!(c, PolicyComposition::All);
    }

    proptest! {
        #[test]
        fn prop_any_is_at_least_as_permissive_as_all(
            diff in 0u64..1000,
            extra in 0u64..1000,
            max_pixels in 0u64..1000,
            ratio in 0.0f64..=1.0,
        ) {
            let s = summary(diff, diff + extra);
            let any = VerdictPolicy::exact().with_max_diff_pixels(max_pixels).with_max_diff_ratio(ratio);
            let all = any.with_composition(PolicyComposition::All);
            if all.evaluate(&s).passed {
                prop_assert!(any.evaluate(&s).passed);
            }
        }
    }
}
