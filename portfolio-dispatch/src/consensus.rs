//! Agreement over worker answers

use crate::error::SessionError;

/// The common answer if every answer is byte-equal.
///
/// Answers are never interpreted: `sat` and `SAT` disagree.
pub fn consensus<S: AsRef<str>>(answers: &[S]) -> Result<&str, SessionError> {
    let (first, rest) = answers.split_first().ok_or(SessionError::ConsensusFailure)?;
    let first = first.as_ref();
    if rest.iter().all(|answer| answer.as_ref() == first) {
        Ok(first)
    } else {
        Err(SessionError::ConsensusFailure)
    }
}
