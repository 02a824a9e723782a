//! Per-request failures. Each one ends up as a reply on the message property
//! carrying the tag of the request that failed; none of them stop the process.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum CareError {
    /// The advisory text could not be read as a care record.
    #[error("advisory response is not a care record: {0}")]
    AdvisoryParse(String),

    /// The care record was readable but a field is missing or not numeric.
    #[error("invalid care instructions: {0}")]
    Validation(String),

    /// The advisory service itself failed (transport, status, empty answer).
    #[error("advisory service unavailable: {0}")]
    AdvisoryUnavailable(String),

    #[error("no plant name given")]
    EmptyPlantName,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_detail() {
        let e = CareError::Validation("missing field 'wateringDuration'".into());
        assert_eq!(
            e.to_string(),
            "invalid care instructions: missing field 'wateringDuration'"
        );
        assert_eq!(CareError::EmptyPlantName.to_string(), "no plant name given");
    }
}
