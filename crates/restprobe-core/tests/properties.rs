use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use restprobe_core::monitor::CondProbModel;
use restprobe_core::solver::{FactorDomain, GreedySolver, Solver};
use restprobe_core::{fragmentize, text};

fn word() -> impl Strategy<Value = String> {
    "[a-z]{2,8}"
}

fn phrase() -> impl Strategy<Value = String> {
    prop::collection::vec(word(), 1..6).prop_map(|ws| ws.join(" "))
}

proptest! {
    #[test]
    fn fragmentize_reaches_a_fixed_point(
        phrases in prop::collection::btree_set(phrase(), 0..8)
    ) {
        let once = fragmentize(&phrases, &BTreeSet::new());
        let twice = fragmentize(&once, &BTreeSet::new());
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn token_set_ratio_is_a_unit_score(a in phrase(), b in phrase()) {
        let r = text::token_set_ratio(&a, &b);
        prop_assert!((0.0..=1.0).contains(&r));
        prop_assert_eq!(text::token_set_ratio(&a, &a), 1.0);
    }

    #[test]
    fn forbidden_tuples_shrink_as_threshold_rises(
        observations in prop::collection::vec(("[ab]", any::<bool>()), 1..40)
    ) {
        let mut model = CondProbModel::new(vec!["x".to_string()], "boom");
        for (class, hit) in &observations {
            let assignment: BTreeMap<String, String> =
                [("x".to_string(), class.clone())].into_iter().collect();
            if *hit {
                model.add_true(&assignment);
            } else {
                model.add_false(&assignment);
            }
        }
        let lo = model.forbidden_tuples(0.3).len();
        let mid = model.forbidden_tuples(0.5).len();
        let hi = model.forbidden_tuples(0.9).len();
        prop_assert!(lo >= mid && mid >= hi);
    }

    #[test]
    fn solver_rows_respect_forbidden_tuples(
        seed in any::<u64>(),
        forbidden_value in 0usize..3,
    ) {
        let factors = vec![
            FactorDomain {
                name: "a".to_string(),
                values: vec!["0".to_string(), "1".to_string(), "2".to_string()],
            },
            FactorDomain {
                name: "b".to_string(),
                values: vec!["x".to_string(), "y".to_string()],
            },
        ];
        let banned = forbidden_value.to_string();
        let forbidden = vec![
            [("a".to_string(), banned.clone())]
                .into_iter()
                .collect::<BTreeMap<_, _>>(),
        ];
        let mut solver = GreedySolver::new(seed);
        let rows = solver.solve(&factors, &forbidden, 2).unwrap();
        prop_assert!(!rows.is_empty());
        for row in &rows {
            prop_assert_ne!(&row["a"], &banned);
        }
    }
}
