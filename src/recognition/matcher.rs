use crate::models::{Embedding, Student};

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// The encoding engine found no face in the frame.
    NoFace,
    /// No enrolled student has a usable embedding to compare against.
    NoKnownFaces,
    /// The nearest enrolled face is still too far away to accept.
    Unknown { distance: f64 },
    Match {
        student_id: String,
        name: String,
        distance: f64,
    },
}

/// Euclidean distance between two embeddings.
///
/// Mismatched lengths compare as infinitely far apart rather than erroring;
/// a malformed enrollment row can then never win a match.
pub fn euclidean_distance(lhs: &[f64], rhs: &[f64]) -> f64 {
    if lhs.len() != rhs.len() {
        return f64::INFINITY;
    }
    lhs.iter()
        .zip(rhs.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        .sqrt()
}

/// Nearest-neighbor lookup of a frame's face among enrolled students.
///
/// Only the first detected face is considered: the capture station frames a
/// single subject. The scan is O(n) by design; enrollment counts are small
/// enough that no index structure is warranted.
pub fn match_face(detected: &[Embedding], enrolled: &[Student], threshold: f64) -> MatchOutcome {
    let Some(query) = detected.first() else {
        return MatchOutcome::NoFace;
    };

    let mut best: Option<(&Student, f64)> = None;
    for student in enrolled {
        let Some(embedding) = &student.embedding else {
            continue;
        };
        let distance = euclidean_distance(query, embedding);
        if best.map_or(true, |(_, best_distance)| distance < best_distance) {
            best = Some((student, distance));
        }
    }

    let Some((student, distance)) = best else {
        return MatchOutcome::NoKnownFaces;
    };

    if distance < threshold {
        MatchOutcome::Match {
            student_id: student.student_id.clone(),
            name: student.name.clone(),
            distance,
        }
    } else {
        MatchOutcome::Unknown { distance }
    }
}
