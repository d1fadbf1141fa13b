//! Process-wide error reporting sink
//!
//! Every failure inside the driver is reported here with the id of the
//! device it concerns (or [`NO_DEVICE`]). The handler can be replaced at any
//! time. Replacement is a single atomic pointer swap without a lock, so a
//! report racing with [`set_error_handler`] may go to either the old or the
//! new handler. Handlers are never freed once installed, which is what makes
//! reading the slot without a lock sound.
//!
//! Registration is meant to happen a handful of times per process (at
//! startup, in tests). Each distinct handler costs one small allocation the
//! first time it is installed; installing it again reuses that allocation.

use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Mutex, PoisonError};

/// Device id used when a report has no device context
pub const NO_DEVICE: i32 = -1;

pub trait ErrorHandler: Send + Sync {
    fn report(&self, device_id: i32, message: &str);
}

impl<F> ErrorHandler for F
where
    F: Fn(i32, &str) + Send + Sync,
{
    fn report(&self, device_id: i32, message: &str) {
        self(device_id, message)
    }
}

/// Default handler, writes to the diagnostic log
pub struct LogErrorHandler;

impl ErrorHandler for LogErrorHandler {
    fn report(&self, device_id: i32, message: &str) {
        tracing::error!(device = device_id, "{}", message);
    }
}

static DEFAULT_HANDLER: LogErrorHandler = LogErrorHandler;

// Null means the default handler.
static HANDLER: AtomicPtr<&'static dyn ErrorHandler> = AtomicPtr::new(std::ptr::null_mut());

// Every slot ever published, so a handler installed twice reuses its slot.
// Matching compares address and vtable: zero-sized handlers such as fn
// items can share one address. A duplicated vtable only costs one more slot.
static INSTALLED: Mutex<Vec<&'static &'static dyn ErrorHandler>> = Mutex::new(Vec::new());

fn slot_for(handler: &'static dyn ErrorHandler) -> &'static &'static dyn ErrorHandler {
    let mut installed = INSTALLED.lock().unwrap_or_else(PoisonError::into_inner);
    let existing = installed
        .iter()
        .copied()
        .find(|slot| std::ptr::eq(**slot as *const dyn ErrorHandler, handler as *const dyn ErrorHandler));
    match existing {
        Some(slot) => slot,
        None => {
            let slot: &'static &'static dyn ErrorHandler = Box::leak(Box::new(handler));
            installed.push(slot);
            slot
        }
    }
}

/// Install a new process-wide handler. Always succeeds.
pub fn set_error_handler(handler: &'static dyn ErrorHandler) {
    let slot = slot_for(handler);
    HANDLER.store(slot as *const &'static dyn ErrorHandler as *mut _, Ordering::Release);
}

/// Go back to [`LogErrorHandler`]
pub fn reset_error_handler() {
    HANDLER.store(std::ptr::null_mut(), Ordering::Release);
}

fn current_handler() -> &'static dyn ErrorHandler {
    let ptr = HANDLER.load(Ordering::Acquire);
    if ptr.is_null() {
        &DEFAULT_HANDLER
    } else {
        // SAFETY: non-null values come from `Box::leak` in `slot_for`, are
        // never deallocated and never written through.
        unsafe { *ptr }
    }
}

/// Deliver a message to the current handler
pub fn report_error(device_id: i32, message: &str) {
    current_handler().report(device_id, message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static SEEN: Mutex<Vec<(i32, String)>> = Mutex::new(Vec::new());

    fn record(device_id: i32, message: &str) {
        SEEN.lock().unwrap().push((device_id, message.to_string()));
    }

    #[test]
    fn test_swap_and_reset_handler() {
        set_error_handler(&record);
        report_error(7, "Error on read handshake");
        report_error(NO_DEVICE, "no device");
        reset_error_handler();
        report_error(7, "goes to the log");

        let seen = SEEN.lock().unwrap();
        assert!(seen.contains(&(7, "Error on read handshake".to_string())));
        assert!(seen.contains(&(NO_DEVICE, "no device".to_string())));
        assert!(!seen.iter().any(|(_, m)| m == "goes to the log"));
    }

    fn other(_device_id: i32, _message: &str) {}

    fn slots_for(handler: &'static dyn ErrorHandler) -> usize {
        INSTALLED
            .lock()
            .unwrap()
            .iter()
            .filter(|slot| std::ptr::eq(***slot as *const dyn ErrorHandler, handler as *const dyn ErrorHandler))
            .count()
    }

    #[test]
    fn test_reinstalling_reuses_slot() {
        let handler: &'static dyn ErrorHandler = &other;
        let first = slot_for(handler);
        for _ in 0..100 {
            assert!(std::ptr::eq(slot_for(handler), first));
        }
        assert_eq!(slots_for(handler), 1);

        // a different zero-sized handler gets its own slot
        let recorder: &'static dyn ErrorHandler = &record;
        assert!(!std::ptr::eq(slot_for(recorder), first));
    }
}
