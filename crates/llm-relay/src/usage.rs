//! Token usage accounting.
//!
//! Every upstream call produces one [`Usage`] record. The record is
//! attached to the message the call produced, and a session keeps a
//! running total that always equals the field-wise sum of the records of
//! its committed calls.
//!
//! [`UsageTracker`] is that running total plus the per-call breakdown and
//! an optional context-window limit for utilization checks.

use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Token counts for a single request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt.
    pub input_tokens: u64,
    /// Tokens produced by the model.
    pub output_tokens: u64,
    /// Total billed tokens as reported by the provider.
    pub total_tokens: u64,
    /// Tokens used for chain-of-thought reasoning, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
}

impl Usage {
    /// A record whose total is `input + output`.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
            reasoning_tokens: None,
        }
    }

    /// `true` if every counter is zero.
    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0 && self.input_tokens == 0 && self.output_tokens == 0
    }
}

fn add_optional(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.saturating_add(y)),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

impl Add for Usage {
    type Output = Self;

    /// Adds two records field by field with saturating arithmetic.
    fn add(mut self, rhs: Self) -> Self {
        self += &rhs;
        self
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        *self += &rhs;
    }
}

impl AddAssign<&Usage> for Usage {
    fn add_assign(&mut self, rhs: &Self) {
        self.input_tokens = self.input_tokens.saturating_add(rhs.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(rhs.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(rhs.total_tokens);
        self.reasoning_tokens = add_optional(self.reasoning_tokens, rhs.reasoning_tokens);
    }
}

impl<'a> std::iter::Sum<&'a Usage> for Usage {
    fn sum<I: Iterator<Item = &'a Usage>>(iter: I) -> Self {
        iter.fold(Usage::default(), |mut acc, u| {
            acc += u;
            acc
        })
    }
}

/// Tracks cumulative token usage across calls.
///
/// ```rust
/// use llm_relay::usage::{Usage, UsageTracker};
///
/// let mut tracker = UsageTracker::with_context_limit(1_000);
/// tracker.record(Usage::new(850, 20));
///
/// assert_eq!(tracker.total().total_tokens, 870);
/// assert!(tracker.is_near_limit(0.8));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageTracker {
    total: Usage,
    by_call: Vec<Usage>,
    context_limit: Option<u64>,
}

impl UsageTracker {
    /// Creates an empty tracker with no context limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracker that knows the model's context window.
    pub fn with_context_limit(limit: u64) -> Self {
        Self {
            context_limit: Some(limit),
            ..Self::default()
        }
    }

    /// Records one call's usage.
    pub fn record(&mut self, usage: Usage) {
        self.total += &usage;
        self.by_call.push(usage);
    }

    /// Records several calls at once, in order.
    pub fn extend(&mut self, usages: impl IntoIterator<Item = Usage>) {
        for usage in usages {
            self.record(usage);
        }
    }

    /// The running total.
    pub fn total(&self) -> &Usage {
        &self.total
    }

    /// Each call's record, in order.
    pub fn calls(&self) -> &[Usage] {
        &self.by_call
    }

    /// How many calls were recorded.
    pub fn call_count(&self) -> usize {
        self.by_call.len()
    }

    /// The context limit, if known.
    pub fn context_limit(&self) -> Option<u64> {
        self.context_limit
    }

    /// Sets or replaces the context limit.
    pub fn set_context_limit(&mut self, limit: u64) {
        self.context_limit = Some(limit);
    }

    /// Input tokens of the latest call divided by the context limit.
    ///
    /// The latest call's prompt already contains the whole history, so it
    /// is the best estimate of how full the window is.
    #[allow(clippy::cast_precision_loss)] // token counts fit the f64 mantissa
    pub fn context_utilization(&self) -> Option<f64> {
        let limit = self.context_limit?;
        if limit == 0 {
            return Some(0.0);
        }
        let latest = self.by_call.last().map_or(0, |u| u.input_tokens);
        Some(latest as f64 / limit as f64)
    }

    /// `true` if utilization is at or above `threshold`.
    pub fn is_near_limit(&self, threshold: f64) -> bool {
        self.context_utilization()
            .is_some_and(|util| util >= threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_computes_total() {
        let u = Usage::new(100, 50);
        assert_eq!(u.total_tokens, 150);
        assert!(!u.is_empty());
        assert!(Usage::default().is_empty());
    }

    #[test]
    fn test_add_is_field_wise() {
        let a = Usage {
            reasoning_tokens: Some(7),
            ..Usage::new(10, 5)
        };
        let b = Usage {
            total_tokens: 40,
            ..Usage::new(20, 10)
        };
        let sum = a + b;
        assert_eq!(sum.input_tokens, 30);
        assert_eq!(sum.output_tokens, 15);
        assert_eq!(sum.total_tokens, 55);
        assert_eq!(sum.reasoning_tokens, Some(7));
    }

    #[test]
    fn test_add_saturates() {
        let mut a = Usage::new(u64::MAX, 0);
        a += Usage::new(1, 0);
        assert_eq!(a.input_tokens, u64::MAX);
    }

    #[test]
    fn test_sum_over_records() {
        let records = [Usage::new(1, 2), Usage::new(3, 4), Usage::new(5, 6)];
        let total: Usage = records.iter().sum();
        assert_eq!(total.total_tokens, 21);
    }

    #[test]
    fn test_tracker_total_equals_sum_of_calls() {
        let mut tracker = UsageTracker::new();
        tracker.extend([Usage::new(10, 1), Usage::new(20, 2), Usage::new(30, 3)]);
        assert_eq!(tracker.call_count(), 3);
        let summed: Usage = tracker.calls().iter().sum();
        assert_eq!(tracker.total(), &summed);
    }

    #[test]
    fn test_tracker_utilization_uses_latest_prompt() {
        let mut tracker = UsageTracker::with_context_limit(100);
        assert_eq!(tracker.context_utilization(), Some(0.0));
        tracker.record(Usage::new(40, 5));
        tracker.record(Usage::new(60, 5));
        let util = tracker.context_utilization().unwrap();
        assert!((util - 0.6).abs() < f64::EPSILON);
        assert!(tracker.is_near_limit(0.5));
        assert!(!tracker.is_near_limit(0.7));
    }

    #[test]
    fn test_tracker_without_limit() {
        let mut tracker = UsageTracker::new();
        tracker.record(Usage::new(1_000_000, 0));
        assert!(tracker.context_utilization().is_none());
        assert!(!tracker.is_near_limit(0.1));
    }
}
