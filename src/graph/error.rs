use std::borrow::Cow;

use thiserror::Error;

/// Usage errors, fatal when validation is compiled in.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A texture or buffer descriptor describes something that can't exist.
    #[error("Invalid descriptor for resource `{name}`: {reason}")]
    InvalidDescriptor { name: Cow<'static, str>, reason: String },
    /// The same pooled allocation was registered twice with different parameters.
    #[error("Inconsistent registration of external resource `{name}`: {reason}")]
    InconsistentRegistration { name: Cow<'static, str>, reason: String },
    /// The pass flags are contradictory or don't match the declared accesses.
    #[error("Invalid flags for pass `{pass}`: {reason}")]
    InvalidPassFlags { pass: Cow<'static, str>, reason: String },
    /// A parameter references something it can't, like an out of bounds subresource.
    #[error("Malformed parameters of pass `{pass}`: {reason}")]
    MalformedParameters { pass: Cow<'static, str>, reason: String },
    /// Two parameters of one pass demand incompatible states of the same subresource.
    #[error("Pass `{pass}` accesses `{resource}` with conflicting states")]
    ConflictingPassAccess {
        pass: Cow<'static, str>,
        resource: Cow<'static, str>,
    },
    /// A pass body recorded a command on a resource it did not declare, so nothing is bound to it.
    #[error("Pass `{pass}` uses `{resource}` which has no backing memory, declare it in the pass parameters")]
    UnboundResource {
        pass: Cow<'static, str>,
        resource: Cow<'static, str>,
    },
    /// The graph was executed a second time.
    #[error("The graph has already been executed")]
    DoubleExecute,
    /// A resource or pass was declared after execution.
    #[error("Cannot declare `{0}` after the graph has been executed")]
    DeclarationAfterExecute(Cow<'static, str>),
}

/// Soft problems, reported once per distinct message and never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValidationWarning {
    #[error("Pass `{pass}` reads `{resource}` which has never been written")]
    ReadBeforeWrite {
        pass: Cow<'static, str>,
        resource: Cow<'static, str>,
    },
    #[error("Resource `{resource}` is written but its contents are never read")]
    ProducedNeverConsumed { resource: Cow<'static, str> },
    #[error("Resource `{resource}` was created with {flag} usage which no pass uses")]
    UnusedCreateFlag {
        resource: Cow<'static, str>,
        flag: &'static str,
    },
}

#[test]
fn test_error_messages() {
    let error = ValidationError::InvalidPassFlags {
        pass: "shadows".into(),
        reason: "RASTER and ASYNC_COMPUTE are mutually exclusive".into(),
    };
    assert_eq!(
        error.to_string(),
        "Invalid flags for pass `shadows`: RASTER and ASYNC_COMPUTE are mutually exclusive"
    );
    let warning = ValidationWarning::UnusedCreateFlag {
        resource: "histogram".into(),
        flag: "UNORDERED_ACCESS",
    };
    assert!(warning.to_string().contains("UNORDERED_ACCESS"));
}
