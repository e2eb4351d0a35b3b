// every logging call in the crate goes through these so that builds without
// the `build-tracing` feature do not pull in tracing at all, the arguments are
// dropped unevaluated in that case
macro_rules! generate {
    ($dollar:tt, $($name:ident),*) => {
        $(
            #[cfg(feature = "build-tracing")]
            #[macro_export]
            macro_rules! $name {
                ($dollar ($dollar any:tt)*) => {
                    tracing::$name!($dollar ($dollar any)*)
                }
            }

            #[cfg(not(feature = "build-tracing"))]
            #[macro_export]
            macro_rules! $name {
                ($dollar ($dollar any:tt)*) => {};
            }

            pub use $name;
        )+
    }
}

generate! {$, trace, debug, info, error, trace_span, debug_span}

// `warn` is also the name of a builtin attribute, exporting it directly collides
#[cfg(feature = "build-tracing")]
#[macro_export]
macro_rules! warn_ {
    ($($any:tt)*) => {
        tracing::warn!($($any)*)
    };
}
#[cfg(not(feature = "build-tracing"))]
#[macro_export]
macro_rules! warn_ {
    ($($any:tt)*) => {};
}
pub use warn_ as warn;
