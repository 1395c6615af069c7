//! ---
//! tbh_section: "03-logging"
//! tbh_subsection: "module"
//! tbh_type: "source"
//! tbh_scope: "code"
//! tbh_description: "Structured logging context and sinks."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---

#[doc(hidden)]
pub use tracing as __tracing;

#[doc(hidden)]
#[macro_export]
macro_rules! __tbh_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx: &$crate::LogContext = &$ctx;
        $crate::macros::__tracing::event!(
            $level,
            scenario = ctx.scenario.unwrap_or(""),
            index = ctx.index.map(|i| i as i64).unwrap_or(-1),
            role = ctx.role.unwrap_or(""),
            endpoint = ctx.endpoint.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with scenario context.
#[macro_export]
macro_rules! tbh_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__tbh_event!($crate::macros::__tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__tbh_event!(
            $crate::macros::__tracing::Level::INFO,
            $crate::LogContext::default(),
            $($arg)+
        )
    };
}

/// Emit a debug log enriched with scenario context.
#[macro_export]
macro_rules! tbh_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__tbh_event!($crate::macros::__tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__tbh_event!(
            $crate::macros::__tracing::Level::DEBUG,
            $crate::LogContext::default(),
            $($arg)+
        )
    };
}

/// Emit a warning enriched with scenario context.
#[macro_export]
macro_rules! tbh_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__tbh_event!($crate::macros::__tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__tbh_event!(
            $crate::macros::__tracing::Level::WARN,
            $crate::LogContext::default(),
            $($arg)+
        )
    };
}

/// Emit an error log enriched with scenario context.
#[macro_export]
macro_rules! tbh_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__tbh_event!($crate::macros::__tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__tbh_event!(
            $crate::macros::__tracing::Level::ERROR,
            $crate::LogContext::default(),
            $($arg)+
        )
    };
}
