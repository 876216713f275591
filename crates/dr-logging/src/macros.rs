//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Structured logging context for DR runs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---

#[doc(hidden)]
#[macro_export]
macro_rules! __dr_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            $level,
            installation = ctx.installation.unwrap_or(""),
            dr_event = ctx.event.unwrap_or(""),
            run = ctx.run.unwrap_or(""),
            device = ctx.device.unwrap_or(""),
            phase = ctx.phase.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with DR run context.
#[macro_export]
macro_rules! dr_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__dr_event!(tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__dr_event!(tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with DR run context.
#[macro_export]
macro_rules! dr_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__dr_event!(tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__dr_event!(tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with DR run context.
#[macro_export]
macro_rules! dr_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__dr_event!(tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__dr_event!(tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with DR run context.
#[macro_export]
macro_rules! dr_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__dr_event!(tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__dr_event!(tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
