use crate::debugger::thread::ThreadId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- tracer entity not found -----------------------------------
    #[error("thread {0} is not registered in the tracer")]
    ThreadNotFound(ThreadId),

    // --------------------------------- template bridge errors ------------------------------------
    #[error("template source is not available for this render call")]
    TemplateSourceUnavailable,

    // --------------------------------- collaborator errors ---------------------------------------
    #[error("hook: {0}")]
    Hook(anyhow::Error),
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "tracer", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "tracer", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
