// Panic isolation for consumer safety
use std::any::Any;
use std::panic::{catch_unwind, UnwindSafe};
use tracing::error;

/// Result of a panic-guarded execution
#[derive(Debug)]
pub enum PanicGuardResult<T> {
    /// Execution completed successfully
    Success(T),
    /// Execution panicked
    Panicked(String),
}

/// Execute a closure with panic isolation
///
/// If the closure panics, the panic is caught and returned as
/// `PanicGuardResult::Panicked`, so one bad message cannot kill a consumer
/// thread (and strand the producers blocked behind a full queue).
///
/// # Example
/// ```text
/// let result = execute_guarded(|| handler.handle(consumer, message));
///
/// if let PanicGuardResult::Panicked(msg) = result {
///     println!("Handler panicked: {}", msg);
/// }
/// ```
pub fn execute_guarded<F, T>(f: F) -> PanicGuardResult<T>
where
    F: FnOnce() -> T + UnwindSafe,
{
    match catch_unwind(f) {
        Ok(result) => PanicGuardResult::Success(result),
        Err(panic_info) => {
            let panic_msg = panic_message(panic_info.as_ref());
            error!(panic_msg = %panic_msg, "Message handler panicked");
            PanicGuardResult::Panicked(panic_msg)
        }
    }
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_passes_value_through() {
        match execute_guarded(|| 40 + 2) {
            PanicGuardResult::Success(value) => assert_eq!(value, 42),
            PanicGuardResult::Panicked(msg) => panic!("unexpected panic: {}", msg),
        }
    }

    #[test]
    fn test_panic_is_captured_with_message() {
        let result: PanicGuardResult<()> = execute_guarded(|| panic!("boom {}", 7));
        match result {
            PanicGuardResult::Panicked(msg) => assert_eq!(msg, "boom 7"),
            PanicGuardResult::Success(_) => panic!("panic was not captured"),
        }
    }

    #[test]
    fn test_static_str_payload() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");

        let payload: Box<dyn Any + Send> = Box::new(5u8);
        assert_eq!(panic_message(payload.as_ref()), "Unknown panic");
    }
}
