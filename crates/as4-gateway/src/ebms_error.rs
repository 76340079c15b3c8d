//! Mapping from internal failures onto the fixed ebMS error vocabulary.
//!
//! The code/category/severity triple of each entry is normative wire
//! surface; peers dispatch on the code, so the mapping stays exhaustive
//! over [`StepError`] and never invents codes.

use as4_codec::CodecError;
use as4_core::ids::MessageId;
use as4_core::units::{ErrorDetail, Severity};
use as4_crypto::CryptoError;

use crate::context::StepError;
use crate::resolve::ResolveError;

/// One entry of the ebMS error code registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EbmsError {
    pub code: &'static str,
    pub category: &'static str,
    pub severity: Severity,
    pub short_description: &'static str,
}

pub const VALUE_NOT_RECOGNIZED: EbmsError = EbmsError {
    code: "EBMS:0003",
    category: "Content",
    severity: Severity::Failure,
    short_description: "ValueNotRecognized",
};

pub const OTHER: EbmsError = EbmsError {
    code: "EBMS:0004",
    category: "Content",
    severity: Severity::Failure,
    short_description: "Other",
};

pub const CONNECTION_FAILURE: EbmsError = EbmsError {
    code: "EBMS:0005",
    category: "Communication",
    severity: Severity::Failure,
    short_description: "ConnectionFailure",
};

/// Warning answered to a PullRequest on a partition channel with nothing
/// to send; the one non-failure entry the gateway emits.
pub const EMPTY_MESSAGE_PARTITION_CHANNEL: EbmsError = EbmsError {
    code: "EBMS:0006",
    category: "Communication",
    severity: Severity::Warning,
    short_description: "EmptyMessagePartitionChannel",
};

pub const INVALID_HEADER: EbmsError = EbmsError {
    code: "EBMS:0009",
    category: "Unpackaging",
    severity: Severity::Failure,
    short_description: "InvalidHeader",
};

pub const PROCESSING_MODE_MISMATCH: EbmsError = EbmsError {
    code: "EBMS:0010",
    category: "Processing",
    severity: Severity::Failure,
    short_description: "ProcessingModeMismatch",
};

pub const FAILED_AUTHENTICATION: EbmsError = EbmsError {
    code: "EBMS:0101",
    category: "Processing",
    severity: Severity::Failure,
    short_description: "FailedAuthentication",
};

pub const FAILED_DECRYPTION: EbmsError = EbmsError {
    code: "EBMS:0102",
    category: "Processing",
    severity: Severity::Failure,
    short_description: "FailedDecryption",
};

pub const POLICY_NONCOMPLIANCE: EbmsError = EbmsError {
    code: "EBMS:0103",
    category: "Processing",
    severity: Severity::Failure,
    short_description: "PolicyNoncompliance",
};

pub const DELIVERY_FAILURE: EbmsError = EbmsError {
    code: "EBMS:0202",
    category: "Communication",
    severity: Severity::Failure,
    short_description: "DeliveryFailure",
};

/// Registry entry describing `error` on the wire.
pub fn classify(error: &StepError) -> EbmsError {
    match error {
        StepError::Codec(codec) => match codec {
            CodecError::MalformedEnvelope(_)
            | CodecError::MissingBody
            | CodecError::MalformedMime(_)
            | CodecError::Model(_) => INVALID_HEADER,
            CodecError::UnsupportedContentType(_) => VALUE_NOT_RECOGNIZED,
            CodecError::Write(_) | CodecError::Cancelled(_) => OTHER,
        },
        StepError::Crypto(crypto) => match crypto {
            CryptoError::InvalidSignature
            | CryptoError::CertificateNotTrusted(_)
            | CryptoError::MalformedReference(_) => FAILED_AUTHENTICATION,
            CryptoError::DecryptionFailed | CryptoError::MissingPrivateKey(_) => FAILED_DECRYPTION,
            CryptoError::UnsupportedAlgorithm(_) => POLICY_NONCOMPLIANCE,
            CryptoError::EncryptionFailed | CryptoError::SigningFailed => OTHER,
            CryptoError::Codec(_) => INVALID_HEADER,
        },
        StepError::Resolve(resolve) => match resolve {
            ResolveError::NoMatchingPMode
            | ResolveError::AmbiguousPMode
            | ResolveError::DanglingPModeReference(_) => PROCESSING_MODE_MISMATCH,
            ResolveError::UnknownReferencedMessage(_) => VALUE_NOT_RECOGNIZED,
            ResolveError::Store(_) => OTHER,
        },
        StepError::Store(_) | StepError::Cancelled(_) => OTHER,
        StepError::Reliability(_) => DELIVERY_FAILURE,
        StepError::Transport(_) => CONNECTION_FAILURE,
        StepError::Validation(_) => POLICY_NONCOMPLIANCE,
    }
}

impl EbmsError {
    /// Builds the Error entry for a signal, carrying `detail` verbatim.
    pub fn detail(
        self,
        detail: impl Into<String>,
        ref_to: Option<MessageId>,
    ) -> ErrorDetail {
        ErrorDetail {
            error_code: self.code.to_string(),
            severity: self.severity,
            origin: Some("ebMS".to_string()),
            category: Some(self.category.to_string()),
            short_description: Some(self.short_description.to_string()),
            detail: Some(detail.into()),
            ref_to_message_in_error: ref_to,
        }
    }
}

/// Error entry describing `error`, referencing the message in error.
pub fn error_detail(error: &StepError, ref_to: Option<MessageId>) -> ErrorDetail {
    classify(error).detail(error.to_string(), ref_to)
}

#[cfg(test)]
mod tests {
    use super::{classify, error_detail, EMPTY_MESSAGE_PARTITION_CHANNEL};
    use crate::context::StepError;
    use crate::resolve::ResolveError;
    use as4_core::ids::MessageId;
    use as4_core::units::Severity;
    use as4_crypto::CryptoError;

    #[test]
    fn signature_failures_map_to_failed_authentication() {
        let entry = classify(&StepError::Crypto(CryptoError::InvalidSignature));
        assert_eq!(entry.code, "EBMS:0101");
        assert_eq!(entry.severity, Severity::Failure);
    }

    #[test]
    fn pmode_mismatch_and_unknown_reference_are_distinct() {
        assert_eq!(
            classify(&StepError::Resolve(ResolveError::NoMatchingPMode)).code,
            "EBMS:0010"
        );
        assert_eq!(
            classify(&StepError::Resolve(ResolveError::UnknownReferencedMessage(
                MessageId::from("m1")
            )))
            .code,
            "EBMS:0003"
        );
    }

    #[test]
    fn empty_mpc_is_a_warning() {
        assert_eq!(EMPTY_MESSAGE_PARTITION_CHANNEL.severity, Severity::Warning);
    }

    #[test]
    fn detail_references_the_message_in_error() {
        let error = StepError::Crypto(CryptoError::DecryptionFailed);
        let detail = error_detail(&error, Some(MessageId::from("m1")));
        assert_eq!(detail.error_code, "EBMS:0102");
        assert_eq!(
            detail.ref_to_message_in_error,
            Some(MessageId::from("m1"))
        );
        assert!(detail.detail.is_some());
    }
}
