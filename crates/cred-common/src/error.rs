use thiserror::Error;

/// The seven kinds of failure a component boundary can surface, matching the
/// taxonomy table in the spec this crate implements. `Kind` groups codes for
/// callers that want to branch on category rather than the specific code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Input,
    Protocol,
    Binding,
    Trust,
    Dependency,
    Session,
    System,
}

macro_rules! reason_codes {
    ($($variant:ident => $code:expr, $kind:expr;)+) => {
        /// A stable string reason code. `Display` yields exactly the wire
        /// string so these never need a separate lookup table.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ReasonCode {
            $($variant,)+
        }

        impl ReasonCode {
            /// The exact stable string surfaced to callers.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(ReasonCode::$variant => $code,)+
                }
            }

            /// The error-taxonomy `Kind` this code belongs to.
            pub fn kind(&self) -> Kind {
                match self {
                    $(ReasonCode::$variant => $kind,)+
                }
            }
        }

        impl std::fmt::Display for ReasonCode {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }
    };
}

reason_codes! {
    UnsupportedPresentation => "UNSUPPORTED_PRESENTATION", Kind::Input;
    MalformedPresentation => "MALFORMED_PRESENTATION", Kind::Input;
    MissingField => "MISSING_FIELD", Kind::Input;
    MissingClaims => "MISSING_CLAIMS", Kind::Input;
    InvalidDateFormat => "INVALID_DATE_FORMAT", Kind::Input;
    MissingAttribute => "MISSING_ATTRIBUTE", Kind::Input;
    MissingSubjectId => "MISSING_SUBJECT_ID", Kind::Input;
    InvalidSubjectId => "INVALID_SUBJECT_ID", Kind::Input;

    UnsupportedProtocolVersion => "UNSUPPORTED_PROTOCOL_VERSION", Kind::Protocol;
    OriginMismatch => "ORIGIN_MISMATCH", Kind::Protocol;
    ClockSkew => "CLOCK_SKEW", Kind::Protocol;
    DowngradeRejected => "DOWNGRADE_REJECTED", Kind::Protocol;

    BindingMismatch => "BINDING_MISMATCH", Kind::Binding;
    ReplayDetected => "REPLAY_DETECTED", Kind::Binding;
    PolicyMismatch => "POLICY_MISMATCH", Kind::Binding;

    IssuerUntrusted => "ISSUER_UNTRUSTED", Kind::Trust;
    VcSignatureInvalid => "VC_SIGNATURE_INVALID", Kind::Trust;
    VcExpired => "VC_EXPIRED", Kind::Trust;
    CredentialExpired => "CREDENTIAL_EXPIRED", Kind::Trust;
    ProofInvalid => "PROOF_INVALID", Kind::Trust;

    ZkpServiceUnavailable => "ZKP_SERVICE_UNAVAILABLE", Kind::Dependency;
    LedgerUnavailable => "LEDGER_UNAVAILABLE", Kind::Dependency;

    CsrfRejected => "CSRF_REJECTED", Kind::Session;
    SessionExpired => "SESSION_EXPIRED", Kind::Session;
    SessionNotFound => "SESSION_NOT_FOUND", Kind::Session;

    SystemError => "SYSTEM_ERROR", Kind::System;
}

/// The platform-wide error type. Every reason code from the taxonomy is a
/// `PlatformError::Business` carrying a `ReasonCode`; anything unexpected is
/// wrapped as `PlatformError::System` and logged without payload contents.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("{0}")]
    Business(ReasonCode),

    #[error("{reason}")]
    BusinessWithContext { reason: ReasonCode, context: String },

    #[error("system error: {0}")]
    System(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PlatformError {
    pub fn business(code: ReasonCode) -> Self {
        PlatformError::Business(code)
    }

    pub fn with_context(code: ReasonCode, context: impl Into<String>) -> Self {
        PlatformError::BusinessWithContext {
            reason: code,
            context: context.into(),
        }
    }

    pub fn system(msg: impl Into<String>) -> Self {
        PlatformError::System(msg.into())
    }

    /// The stable reason code for this error, if it is a business-rule
    /// rejection rather than a dependency/system failure.
    pub fn reason_code(&self) -> Option<ReasonCode> {
        match self {
            PlatformError::Business(code) => Some(*code),
            PlatformError::BusinessWithContext { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// True when this represents an unexpected failure rather than a named
    /// business-rule rejection — the two must never be conflated per §7.
    pub fn is_system(&self) -> bool {
        matches!(self, PlatformError::System(_) | PlatformError::Internal(_))
    }
}

pub type Result<T> = std::result::Result<T, PlatformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_code_strings_match_taxonomy() {
        assert_eq!(ReasonCode::DowngradeRejected.as_str(), "DOWNGRADE_REJECTED");
        assert_eq!(ReasonCode::DowngradeRejected.kind(), Kind::Protocol);
        assert_eq!(ReasonCode::ProofInvalid.kind(), Kind::Trust);
    }

    #[test]
    fn business_and_system_errors_are_distinguishable() {
        let business = PlatformError::business(ReasonCode::BindingMismatch);
        let system = PlatformError::system("disk full");
        assert!(!business.is_system());
        assert!(system.is_system());
        assert_eq!(business.reason_code(), Some(ReasonCode::BindingMismatch));
        assert_eq!(system.reason_code(), None);
    }
}
