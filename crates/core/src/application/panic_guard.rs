// Panic isolation shared by the scheduler and the blocking worker pool
use std::any::Any;
use std::panic::{catch_unwind, UnwindSafe};
use tracing::error;

/// Best-effort text of a panic payload
///
/// `panic!("literal")` carries a `&str`, `panic!("{x}")` a `String`; anything
/// else is reported generically.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Execute a closure with panic isolation
///
/// A panic is caught, logged and returned as `Err(message)` so a worker thread
/// survives the closure it ran.
///
/// # Example
/// ```text
/// let result = execute_guarded(|| panic!("probe crashed"));
/// assert_eq!(result.unwrap_err(), "probe crashed");
/// ```
pub fn execute_guarded<F, T>(f: F) -> Result<T, String>
where
    F: FnOnce() -> T + UnwindSafe,
{
    catch_unwind(f).map_err(|payload| {
        let message = panic_message(&*payload);
        error!(panic_msg = %message, "Guarded closure panicked");
        message
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_passes_value_through() {
        assert_eq!(execute_guarded(|| 7), Ok(7));
    }

    #[test]
    fn test_str_and_string_payloads() {
        assert_eq!(
            execute_guarded(|| -> i32 { panic!("static text") }),
            Err("static text".to_string())
        );
        let code = 42;
        assert_eq!(
            execute_guarded(move || -> i32 { panic!("code {code}") }),
            Err("code 42".to_string())
        );
    }

    #[test]
    fn test_unknown_payload() {
        let result = execute_guarded(|| -> i32 { std::panic::panic_any(5u8) });
        assert_eq!(result, Err("Unknown panic".to_string()));
    }
}
