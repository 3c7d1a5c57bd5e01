//! Domain partitioning for low-discrepancy sampling.
//!
//! A parameter's domain is cut into `count` disjoint intervals. Ranges
//! (continuous, integer, log-transformed) are split into equal-width pieces
//! in search coordinates, every piece right-open except the last, which is
//! closed so the upper bound belongs to exactly one interval. Enumerated
//! domains (categorical, grid) are sorted and sliced at proportional
//! fenceposts.

use rand::Rng;
use sg_types::{ParameterKind, ParameterValue, Parameter, SegmentError};

/// Retries before a sample that falls outside its interval is reported.
const MAX_SAMPLE_TRIES: usize = 16;

/// A sub-domain of one parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Interval {
    /// Range in search coordinates (natural log for log-transformed
    /// parameters).
    Range {
        min: f64,
        max: f64,
        min_closed: bool,
        max_closed: bool,
    },
    /// Finite set of enumerated values.
    Set(Vec<ParameterValue>),
}

impl Interval {
    /// Whether `value` (in parameter units) falls in this interval.
    pub fn contains(&self, parameter: &Parameter, value: &ParameterValue) -> bool {
        match self {
            Interval::Range {
                min,
                max,
                min_closed,
                max_closed,
            } => match coordinate(parameter, value) {
                Some(x) => {
                    let above = if *min_closed { x >= *min } else { x > *min };
                    let below = if *max_closed { x <= *max } else { x < *max };
                    above && below
                }
                None => false,
            },
            Interval::Set(values) => values.iter().any(|v| same_value(v, value)),
        }
    }
}

/// Position of `value` on the axis intervals are expressed in.
fn coordinate(parameter: &Parameter, value: &ParameterValue) -> Option<f64> {
    let x = value.as_f64()?;
    if parameter.is_log() {
        (x > 0.0).then(|| x.ln())
    } else {
        Some(x)
    }
}

fn same_value(a: &ParameterValue, b: &ParameterValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Split `parameter`'s domain into `count` intervals (`count == 0` is
/// treated as 1). Enumerated domains with fewer values than `count` yield
/// fewer intervals.
pub fn segmented_intervals(parameter: &Parameter, count: usize) -> Vec<Interval> {
    let count = count.max(1);
    match &parameter.kind {
        ParameterKind::Continuous { min, max } => {
            if parameter.is_log() {
                split_range(min.ln(), max.ln(), count)
            } else {
                split_range(*min, *max, count)
            }
        }
        ParameterKind::Integer { min, max } => split_range(*min as f64, *max as f64, count),
        ParameterKind::Categorical { .. } => {
            let mut names: Vec<&str> = parameter.active_categories();
            names.sort_unstable();
            let values = names
                .into_iter()
                .map(|n| ParameterValue::Categorical(n.to_string()))
                .collect();
            split_set(values, count)
        }
        ParameterKind::Grid { values } => {
            let mut sorted = values.clone();
            sorted.sort_by(f64::total_cmp);
            sorted.dedup();
            split_set(sorted.into_iter().map(ParameterValue::Float).collect(), count)
        }
    }
}

fn split_range(low: f64, high: f64, count: usize) -> Vec<Interval> {
    let width = (high - low) / count as f64;
    (0..count)
        .map(|i| {
            let last = i + 1 == count;
            Interval::Range {
                min: low + width * i as f64,
                max: if last { high } else { low + width * (i + 1) as f64 },
                min_closed: true,
                max_closed: last,
            }
        })
        .collect()
}

fn split_set(values: Vec<ParameterValue>, count: usize) -> Vec<Interval> {
    let n = values.len();
    let fencepost = |i: usize| ((i as f64 / count as f64) * n as f64).round() as usize;
    (0..count)
        .filter_map(|i| {
            let slice = &values[fencepost(i).min(n)..fencepost(i + 1).min(n)];
            (!slice.is_empty()).then(|| Interval::Set(slice.to_vec()))
        })
        .collect()
}

/// Remove the interval containing `value`. Returns whether one was removed;
/// pruning an already-removed interval is a no-op.
pub fn prune_interval(parameter: &Parameter, intervals: &mut Vec<Interval>, value: &ParameterValue) -> bool {
    match intervals.iter().position(|i| i.contains(parameter, value)) {
        Some(index) => {
            intervals.remove(index);
            true
        }
        None => false,
    }
}

/// Remove every interval covered by one of `covering`.
pub fn prune_intervals<'a>(
    parameter: &Parameter,
    intervals: &mut Vec<Interval>,
    covering: impl IntoIterator<Item = &'a ParameterValue>,
) {
    for value in covering {
        if intervals.is_empty() {
            break;
        }
        prune_interval(parameter, intervals, value);
    }
}

/// Closed integer bounds of a range, honouring open ends.
fn integer_bounds(min: f64, max: f64, min_closed: bool, max_closed: bool) -> Option<(i64, i64)> {
    let mut lo = min.ceil();
    if !min_closed && lo == min {
        lo += 1.0;
    }
    let mut hi = max.floor();
    if !max_closed && hi == max {
        hi -= 1.0;
    }
    (lo <= hi).then_some((lo as i64, hi as i64))
}

/// Whether `interval` holds at least one value `parameter` can take.
pub fn has_values(parameter: &Parameter, interval: &Interval) -> bool {
    match (interval, &parameter.kind) {
        (
            Interval::Range {
                min,
                max,
                min_closed,
                max_closed,
            },
            ParameterKind::Integer { .. },
        ) => integer_bounds(*min, *max, *min_closed, *max_closed).is_some(),
        (
            Interval::Range {
                min,
                max,
                min_closed,
                max_closed,
            },
            _,
        ) => min < max || (min == max && *min_closed && *max_closed),
        (Interval::Set(values), _) => !values.is_empty(),
    }
}

/// Draw a value of `parameter` from `interval`.
///
/// The draw is checked against the interval before it is returned.
pub fn sample_from_interval<R: Rng + ?Sized>(
    parameter: &Parameter,
    interval: &Interval,
    rng: &mut R,
) -> Result<ParameterValue, SegmentError> {
    if !has_values(parameter, interval) {
        return Err(SegmentError::EmptyDomain {
            parameter: parameter.name.clone(),
        });
    }

    let mut last = None;
    for _ in 0..MAX_SAMPLE_TRIES {
        let value = draw(parameter, interval, rng)?;
        if interval.contains(parameter, &value) {
            return Ok(value);
        }
        last = Some(value);
    }
    Err(SegmentError::OutsideInterval {
        parameter: parameter.name.clone(),
        value: last.map(|v| v.to_string()).unwrap_or_default(),
    })
}

fn draw<R: Rng + ?Sized>(
    parameter: &Parameter,
    interval: &Interval,
    rng: &mut R,
) -> Result<ParameterValue, SegmentError> {
    match (&parameter.kind, interval) {
        (
            ParameterKind::Continuous { min: low, max: high },
            Interval::Range {
                min,
                max,
                max_closed,
                ..
            },
        ) => {
            let x = if *max_closed || min >= max {
                rng.random_range(*min..=*max)
            } else {
                rng.random_range(*min..*max)
            };
            let value = if parameter.is_log() {
                x.exp().clamp(*low, *high)
            } else {
                x
            };
            Ok(ParameterValue::Float(value))
        }
        (
            ParameterKind::Integer { .. },
            Interval::Range {
                min,
                max,
                min_closed,
                max_closed,
            },
        ) => {
            let (lo, hi) = integer_bounds(*min, *max, *min_closed, *max_closed).ok_or_else(|| {
                SegmentError::EmptyDomain {
                    parameter: parameter.name.clone(),
                }
            })?;
            Ok(ParameterValue::Int(rng.random_range(lo..=hi)))
        }
        (ParameterKind::Categorical { .. } | ParameterKind::Grid { .. }, Interval::Set(values)) => {
            Ok(values[rng.random_range(0..values.len())].clone())
        }
        _ => Err(SegmentError::KindMismatch {
            parameter: parameter.name.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn range(min: f64, max: f64, max_closed: bool) -> Interval {
        Interval::Range {
            min,
            max,
            min_closed: true,
            max_closed,
        }
    }

    #[test]
    fn continuous_split_matches_stencil() {
        let x = Parameter::continuous("x", 0.0, 10.0);
        let intervals = segmented_intervals(&x, 4);
        assert_eq!(
            intervals,
            vec![
                range(0.0, 2.5, false),
                range(2.5, 5.0, false),
                range(5.0, 7.5, false),
                range(7.5, 10.0, true),
            ]
        );
    }

    #[test]
    fn partition_covers_domain_without_overlap() {
        let x = Parameter::continuous("x", -3.0, 7.0);
        for count in 1..12 {
            let intervals = segmented_intervals(&x, count);
            assert_eq!(intervals.len(), count);
            for sample in [-3.0, -1.234, 0.0, 2.0, 5.5, 6.999, 7.0] {
                let hits = intervals
                    .iter()
                    .filter(|i| i.contains(&x, &ParameterValue::Float(sample)))
                    .count();
                assert_eq!(hits, 1, "{sample} with count {count}");
            }
        }
    }

    #[test]
    fn enumerated_partition_covers_active_values_once() {
        let mut c = Parameter::categorical("c", &["f", "b", "d", "a", "e", "c", "gone"]);
        if let ParameterKind::Categorical { values } = &mut c.kind {
            values[6].deleted = true;
        }
        let g = Parameter::grid("g", vec![0.5, 8.0, 2.0, 1.0, 4.0, 2.0]);

        let active_c: Vec<ParameterValue> = c
            .active_categories()
            .into_iter()
            .map(|n| ParameterValue::Categorical(n.to_string()))
            .collect();
        let active_g: Vec<ParameterValue> = [0.5, 1.0, 2.0, 4.0, 8.0]
            .into_iter()
            .map(ParameterValue::Float)
            .collect();

        for (parameter, active) in [(&c, active_c), (&g, active_g)] {
            let n = active.len();
            for count in 1..=n + 2 {
                let intervals = segmented_intervals(parameter, count);
                assert_eq!(intervals.len(), count.min(n), "{} with count {count}", parameter.name);

                let mut union = Vec::new();
                for interval in &intervals {
                    match interval {
                        Interval::Set(values) => {
                            assert!(!values.is_empty());
                            union.extend(values.iter().cloned());
                        }
                        other => panic!("expected a set, got {other:?}"),
                    }
                }
                assert_eq!(union.len(), n, "{} with count {count}", parameter.name);
                for value in &active {
                    let hits = intervals.iter().filter(|i| i.contains(parameter, value)).count();
                    assert_eq!(hits, 1, "{value:?} in {} with count {count}", parameter.name);
                }
            }
        }
        assert!(segmented_intervals(&c, 3)
            .iter()
            .all(|i| !i.contains(&c, &ParameterValue::Categorical("gone".into()))));
    }

    #[test]
    fn upper_bound_only_in_last_interval() {
        let x = Parameter::continuous("x", 0.0, 1.0);
        let intervals = segmented_intervals(&x, 3);
        let top = ParameterValue::Float(1.0);
        assert!(!intervals[1].contains(&x, &top));
        assert!(intervals[2].contains(&x, &top));
    }

    #[test]
    fn log_parameter_splits_in_log_space() {
        let lr = Parameter::continuous("lr", 1e-4, 1.0).with_log_transform();
        let intervals = segmented_intervals(&lr, 4);
        assert!(intervals[0].contains(&lr, &ParameterValue::Float(1e-4)));
        assert!(intervals[0].contains(&lr, &ParameterValue::Float(5e-4)));
        assert!(intervals[1].contains(&lr, &ParameterValue::Float(2e-3)));
        assert!(intervals[3].contains(&lr, &ParameterValue::Float(1.0)));
    }

    #[test]
    fn categorical_fenceposts() {
        let c = Parameter::categorical("c", &["e", "a", "d", "b", "c"]);
        let intervals = segmented_intervals(&c, 2);
        let cat = |s: &str| ParameterValue::Categorical(s.to_string());
        // round(0.5 * 5) = 3 with round-half-away-from-zero.
        assert_eq!(
            intervals,
            vec![
                Interval::Set(vec![cat("a"), cat("b"), cat("c")]),
                Interval::Set(vec![cat("d"), cat("e")]),
            ]
        );
    }

    #[test]
    fn small_sets_drop_empty_slices() {
        let c = Parameter::categorical("c", &["x", "y"]);
        let intervals = segmented_intervals(&c, 5);
        assert_eq!(intervals.len(), 2);
        assert!(intervals.iter().all(|i| has_values(&c, i)));
    }

    #[test]
    fn grid_values_sorted_and_matched_numerically() {
        let g = Parameter::grid("g", vec![64.0, 16.0, 32.0]);
        let intervals = segmented_intervals(&g, 3);
        assert_eq!(intervals[0], Interval::Set(vec![ParameterValue::Float(16.0)]));
        assert!(intervals[1].contains(&g, &ParameterValue::Int(32)));
    }

    #[test]
    fn integer_intervals_without_values() {
        let n = Parameter::integer("n", 0, 2);
        let intervals = segmented_intervals(&n, 4);
        // [0,0.5) [0.5,1) [1,1.5) [1.5,2]
        let with_values: Vec<bool> = intervals.iter().map(|i| has_values(&n, i)).collect();
        assert_eq!(with_values, vec![true, false, true, true]);
    }

    #[test]
    fn integer_open_bounds_adjust() {
        let n = Parameter::integer("n", 0, 10);
        let open = Interval::Range {
            min: 2.0,
            max: 3.0,
            min_closed: false,
            max_closed: false,
        };
        assert!(!has_values(&n, &open));
        let half_open = Interval::Range {
            min: 2.0,
            max: 4.0,
            min_closed: false,
            max_closed: false,
        };
        assert!(has_values(&n, &half_open));
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            assert_eq!(sample_from_interval(&n, &half_open, &mut rng).unwrap(), ParameterValue::Int(3));
        }
    }

    #[test]
    fn prune_is_idempotent() {
        let x = Parameter::continuous("x", 0.0, 10.0);
        let mut intervals = segmented_intervals(&x, 4);
        let three = ParameterValue::Float(3.0);

        assert!(prune_interval(&x, &mut intervals, &three));
        let after_first = intervals.clone();
        assert!(!prune_interval(&x, &mut intervals, &three));
        assert_eq!(intervals, after_first);
        assert!(!intervals.contains(&range(2.5, 5.0, false)));
    }

    #[test]
    fn prune_many_values() {
        let x = Parameter::continuous("x", 0.0, 10.0);
        let mut intervals = segmented_intervals(&x, 4);
        let covering = [ParameterValue::Float(0.1), ParameterValue::Float(0.2), ParameterValue::Float(10.0)];
        prune_intervals(&x, &mut intervals, covering.iter());
        assert_eq!(intervals, vec![range(2.5, 5.0, false), range(5.0, 7.5, false)]);
    }

    #[test]
    fn samples_stay_inside_interval() {
        let mut rng = StdRng::seed_from_u64(11);
        let params = [
            Parameter::continuous("x", -5.0, 5.0),
            Parameter::continuous("lr", 1e-5, 10.0).with_log_transform(),
            Parameter::integer("n", -7, 13),
            Parameter::categorical("c", &["a", "b", "c", "d", "e", "f"]),
            Parameter::grid("g", vec![0.1, 0.2, 0.4, 0.8, 1.6]),
        ];
        for parameter in &params {
            for interval in segmented_intervals(parameter, 4) {
                if !has_values(parameter, &interval) {
                    continue;
                }
                for _ in 0..50 {
                    let value = sample_from_interval(parameter, &interval, &mut rng).unwrap();
                    assert!(interval.contains(parameter, &value), "{value} escaped {interval:?}");
                    assert!(parameter.contains(&value), "{value} outside {}", parameter.name);
                }
            }
        }
    }

    #[test]
    fn mismatched_interval_kind_errors() {
        let c = Parameter::categorical("c", &["a"]);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            sample_from_interval(&c, &range(0.0, 1.0, true), &mut rng),
            Err(SegmentError::KindMismatch { .. })
        ));
    }
}
