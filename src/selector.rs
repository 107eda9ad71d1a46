use rand::Rng;

use crate::error::SelectionError;
use crate::models::Student;

/// Pick one student with probability `weight / total_weight`.
///
/// Zero-weight students are never picked unless every weight is zero, in which
/// case the last student is returned.
pub fn select_weighted<'a, R>(
    students: &'a [Student],
    rng: &mut R,
) -> Result<&'a Student, SelectionError>
where
    R: Rng + ?Sized,
{
    let last = students.last().ok_or(SelectionError::EmptyRoster)?;
    let total = total_weight(students);

    if total == 0 {
        return Ok(last);
    }

    let mut remaining = rng.gen_range(0..total);
    for student in students {
        let weight = u64::from(student.weight);
        if remaining < weight {
            return Ok(student);
        }
        remaining -= weight;
    }

    Ok(last)
}

pub fn total_weight(students: &[Student]) -> u64 {
    students.iter().map(|s| u64::from(s.weight)).sum()
}

/// Selection probability of each student, in roster order.
pub fn selection_odds(students: &[Student]) -> Vec<f64> {
    let total = total_weight(students);
    students
        .iter()
        .enumerate()
        .map(|(index, student)| match total {
            0 if index + 1 == students.len() => 1.0,
            0 => 0.0,
            _ => f64::from(student.weight) / total as f64,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn roster(weights: &[u32]) -> Vec<Student> {
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let mut student = Student::new(format!("Student {i}"));
                student.weight = *w;
                student
            })
            .collect()
    }

    fn frequencies(students: &[Student], trials: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut counts = vec![0usize; students.len()];
        for _ in 0..trials {
            let picked = select_weighted(students, &mut rng).unwrap();
            let index = students.iter().position(|s| s.id == picked.id).unwrap();
            counts[index] += 1;
        }
        counts.iter().map(|c| *c as f64 / trials as f64).collect()
    }

    #[test]
    fn empty_roster_is_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            select_weighted(&[], &mut rng).unwrap_err(),
            SelectionError::EmptyRoster
        );
    }

    #[test]
    fn single_student_is_always_picked() {
        let mut rng = StdRng::seed_from_u64(7);
        for weight in [0, 1, 40] {
            let students = roster(&[weight]);
            for _ in 0..100 {
                assert_eq!(select_weighted(&students, &mut rng).unwrap().id, students[0].id);
            }
        }
    }

    #[test]
    fn all_zero_weights_fall_back_to_last() {
        let students = roster(&[0, 0, 0]);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            assert_eq!(select_weighted(&students, &mut rng).unwrap().id, students[2].id);
        }
    }

    #[test]
    fn zero_weight_students_are_never_picked() {
        let students = roster(&[0, 1, 0, 1]);
        let freq = frequencies(&students, 5_000, 11);
        assert_eq!(freq[0], 0.0);
        assert_eq!(freq[2], 0.0);
    }

    #[test]
    fn frequencies_follow_weights() {
        let students = roster(&[1, 2, 3, 4]);
        let odds = selection_odds(&students);
        let freq = frequencies(&students, 100_000, 42);

        for (observed, expected) in freq.iter().zip(odds.iter()) {
            assert!(
                (observed - expected).abs() < 0.01,
                "observed {observed:.4}, expected {expected:.4}"
            );
        }
    }

    #[test]
    fn odds_for_degenerate_roster() {
        let students = roster(&[0, 0]);
        assert_eq!(selection_odds(&students), vec![0.0, 1.0]);
        assert_eq!(total_weight(&roster(&[2, 3])), 5);
    }
}
