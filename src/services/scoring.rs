use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use rust_decimal::Decimal;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Aggregate result persisted onto an attempt after every submit or grade.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateScore {
    pub score: Decimal,
    pub percentage: Decimal,
    pub is_passed: bool,
}

/// Grade a multiple_choice/true_false answer. Correctness is purely the
/// selected option's is_correct flag; no selection grades as incorrect.
pub fn grade_choice(question_marks: Decimal, selected_is_correct: Option<bool>) -> (bool, Decimal) {
    match selected_is_correct {
        Some(true) => (true, question_marks),
        _ => (false, Decimal::ZERO),
    }
}

/// Fold a summed score into percentage and pass flag.
/// percentage = round(score / total_marks * 100, 2), 0 when total_marks is 0.
pub fn aggregate(score: Decimal, total_marks: Decimal, pass_percentage: Decimal) -> AggregateScore {
    let percentage = if total_marks > Decimal::ZERO {
        (score / total_marks * Decimal::new(100, 0)).round_dp(2)
    } else {
        Decimal::ZERO
    };
    AggregateScore {
        score,
        percentage,
        is_passed: percentage >= pass_percentage,
    }
}

/// Deterministic presentation permutation for one attempt. Seeded by
/// (attempt_id, quiz_id) so the same attempt always re-renders in the same
/// order while two attempts see different orders. Never persisted and never
/// touches order_index.
pub fn presentation_order(attempt_id: Uuid, quiz_id: Uuid, len: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    let mut rng = StdRng::seed_from_u64(permutation_seed(attempt_id, quiz_id));
    indices.shuffle(&mut rng);
    indices
}

/// Option-level variant; salted with the question id so each question's
/// options shuffle independently within the attempt.
pub fn option_order(attempt_id: Uuid, question_id: Uuid, len: usize) -> Vec<usize> {
    presentation_order(attempt_id, question_id, len)
}

fn permutation_seed(a: Uuid, b: Uuid) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    a.hash(&mut hasher);
    b.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn correct_choice_earns_full_marks() {
        assert_eq!(grade_choice(dec("5"), Some(true)), (true, dec("5")));
    }

    #[test]
    fn wrong_or_missing_choice_earns_zero() {
        assert_eq!(grade_choice(dec("5"), Some(false)), (false, Decimal::ZERO));
        assert_eq!(grade_choice(dec("5"), None), (false, Decimal::ZERO));
    }

    #[test]
    fn half_marks_is_fifty_percent_and_fails_sixty() {
        // two 5-mark questions, one answered correctly
        let agg = aggregate(dec("5"), dec("10"), dec("60"));
        assert_eq!(agg.score, dec("5"));
        assert_eq!(agg.percentage, dec("50.00"));
        assert!(!agg.is_passed);
    }

    #[test]
    fn eight_of_ten_is_eighty_percent_and_passes() {
        let agg = aggregate(dec("8"), dec("10"), dec("60"));
        assert_eq!(agg.percentage, dec("80.00"));
        assert!(agg.is_passed);
    }

    #[test]
    fn percentage_rounds_to_two_places() {
        // 2/3 marks = 66.666... -> 66.67
        let agg = aggregate(dec("2"), dec("3"), dec("60"));
        assert_eq!(agg.percentage, dec("66.67"));
    }

    #[test]
    fn pass_boundary_is_inclusive() {
        let agg = aggregate(dec("6"), dec("10"), dec("60"));
        assert_eq!(agg.percentage, dec("60.00"));
        assert!(agg.is_passed);
    }

    #[test]
    fn zero_total_marks_guards_division() {
        let agg = aggregate(Decimal::ZERO, Decimal::ZERO, dec("60"));
        assert_eq!(agg.percentage, Decimal::ZERO);
        assert!(!agg.is_passed);
    }

    #[test]
    fn presentation_order_is_deterministic_per_attempt() {
        let attempt = Uuid::new_v4();
        let quiz = Uuid::new_v4();
        let first = presentation_order(attempt, quiz, 20);
        let second = presentation_order(attempt, quiz, 20);
        assert_eq!(first, second);
    }

    #[test]
    fn presentation_order_is_a_permutation() {
        let order = presentation_order(Uuid::new_v4(), Uuid::new_v4(), 15);
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..15).collect::<Vec<_>>());
    }

    #[test]
    fn different_attempts_usually_see_different_orders() {
        let quiz = Uuid::new_v4();
        // with 20 elements a seed collision across 10 attempts is negligible
        let orders: Vec<_> = (0..10)
            .map(|_| presentation_order(Uuid::new_v4(), quiz, 20))
            .collect();
        assert!(orders.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn empty_question_list_shuffles_to_empty() {
        assert!(presentation_order(Uuid::new_v4(), Uuid::new_v4(), 0).is_empty());
    }
}
