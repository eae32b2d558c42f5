mod encoder;
mod matcher;

pub use encoder::{FaceEncoder, HttpFaceEncoder};
pub use matcher::{euclidean_distance, match_face, MatchOutcome};
