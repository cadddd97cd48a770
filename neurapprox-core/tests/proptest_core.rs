//! Property-based tests for the numeric building blocks using proptest.

use proptest::prelude::*;

use neurapprox_core::bounds::{self, BoundingBox, Interval};
use neurapprox_core::metrics;
use neurapprox_core::{Tolerance, ToleranceKind, ToleranceSpec, VerificationIndexSet};

fn interval() -> impl Strategy<Value = Interval> {
    (-1e3f64..1e3, 1e-3f64..1e3).prop_map(|(min, width)| Interval::new(min, min + width))
}

// --- Bounds mapper properties ---

proptest! {
    #[test]
    fn map_round_trip_is_identity(
        from in interval(),
        to in interval(),
        t in 0.0f64..=1.0,
    ) {
        let from = BoundingBox::new(vec![from]);
        let to = BoundingBox::new(vec![to]);
        let value = from.min()[0] + t * from.lengths()[0];
        let mapped = bounds::map(value, &from, &to, 0).unwrap();
        let back = bounds::map_inverse(mapped, &from, &to, 0).unwrap();
        let scale = value.abs().max(from.lengths()[0]);
        prop_assert!((back - value).abs() <= 1e-8 * scale, "{value} -> {mapped} -> {back}");
    }

    #[test]
    fn mapped_values_stay_inside_target(
        from in interval(),
        t in 0.0f64..=1.0,
    ) {
        let from = BoundingBox::new(vec![from]);
        let to = BoundingBox::uniform(1, -1.0, 1.0);
        let value = from.min()[0] + t * from.lengths()[0];
        let mapped = bounds::map(value, &from, &to, 0).unwrap();
        prop_assert!((-1.0 - 1e-9..=1.0 + 1e-9).contains(&mapped));
    }

    #[test]
    fn expanded_box_contains_original(
        from in interval(),
        safety in 1.0f64..4.0,
    ) {
        let bbox = BoundingBox::new(vec![from]);
        let grown = bbox.expanded(safety).unwrap();
        prop_assert!(grown.min()[0] <= bbox.min()[0] + 1e-9);
        prop_assert!(grown.max()[0] >= bbox.max()[0] - 1e-9);
    }
}

// --- Tolerance properties ---

#[derive(Debug, Clone)]
enum Write {
    Absolute(f64),
    RelativeVector(f64),
    RelativeScalar(f64),
}

fn write() -> impl Strategy<Value = Write> {
    prop_oneof![
        (0.0f64..10.0).prop_map(Write::Absolute),
        (0.0f64..1.0).prop_map(Write::RelativeVector),
        (0.0f64..1.0).prop_map(Write::RelativeScalar),
    ]
}

proptest! {
    #[test]
    fn last_tolerance_write_wins(writes in prop::collection::vec(write(), 1..8)) {
        let output = BoundingBox::uniform(2, 0.0, 4.0);
        let mut spec = ToleranceSpec::new(ToleranceKind::Max);
        for w in &writes {
            let tol = match *w {
                Write::Absolute(v) => Tolerance::Absolute(vec![v, v]),
                Write::RelativeVector(v) => Tolerance::RelativeVector(vec![v, v]),
                Write::RelativeScalar(v) => Tolerance::RelativeScalar(v),
            };
            spec.set(tol, 2, Some(&output)).unwrap();
        }
        let (expected_abs, relative) = match *writes.last().unwrap() {
            Write::Absolute(v) => (v, false),
            Write::RelativeVector(v) | Write::RelativeScalar(v) => (4.0 * v, true),
        };
        prop_assert_eq!(spec.is_absolute(), !relative);
        prop_assert_eq!(spec.relative_vector(2).is_some(), relative);
        let abs = spec.absolute_vector(2, Some(&output)).unwrap().unwrap();
        prop_assert!(abs.iter().all(|a| (a - expected_abs).abs() < 1e-12));
    }
}

// --- Error evaluator & verification set properties ---

proptest! {
    #[test]
    fn rms_never_exceeds_max(
        pairs in prop::collection::vec((-100.0f64..100.0, -100.0f64..100.0), 1..40),
    ) {
        let prescribed: Vec<Vec<f64>> = pairs.iter().map(|(p, _)| vec![*p]).collect();
        let calculated: Vec<Vec<f64>> = pairs.iter().map(|(_, c)| vec![*c]).collect();
        let rms = metrics::rms(&prescribed, &calculated, 1).unwrap();
        let max = metrics::max_abs(&prescribed, &calculated, 1).unwrap();
        let mean = metrics::mean_abs(&prescribed, &calculated, 1).unwrap();
        prop_assert!(mean[0] <= rms[0] + 1e-9);
        prop_assert!(rms[0] <= max[0] + 1e-9);
    }

    #[test]
    fn verification_set_smaller_than_data(
        indices in prop::collection::vec(0usize..30, 0..30),
        data_len in 1usize..30,
    ) {
        match VerificationIndexSet::new(indices.iter().copied(), data_len) {
            Ok(set) => {
                prop_assert!(set.is_empty() || set.len() < data_len);
                prop_assert!(set.iter().all(|i| i < data_len));
            }
            Err(_) => {
                let distinct: std::collections::BTreeSet<_> = indices.iter().collect();
                prop_assert!(
                    distinct.len() >= data_len || indices.iter().any(|&i| i >= data_len)
                );
            }
        }
    }
}
