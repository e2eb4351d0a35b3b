pub mod shim_macros;
pub mod tracing_subscriber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    /// Parses the names accepted by `RUST_LOG` style filters, case insensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        let severity = match name.trim().to_ascii_lowercase().as_str() {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            _ => return None,
        };
        Some(severity)
    }
}

#[cfg(feature = "build-tracing")]
impl Severity {
    pub fn into_tracing_level(self) -> tracing::Level {
        match self {
            Severity::Trace => tracing::Level::TRACE,
            Severity::Debug => tracing::Level::DEBUG,
            Severity::Info => tracing::Level::INFO,
            Severity::Warn => tracing::Level::WARN,
            Severity::Error => tracing::Level::ERROR,
        }
    }
}

#[test]
fn test_severity_names() {
    assert_eq!(Severity::from_name("WARNING"), Some(Severity::Warn));
    assert_eq!(Severity::from_name(" trace"), Some(Severity::Trace));
    assert_eq!(Severity::from_name("loud"), None);
    assert!(Severity::Debug < Severity::Error);
}
