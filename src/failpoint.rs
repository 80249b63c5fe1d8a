//! Named failpoints for driving error paths in tests.
//!
//! Durability-ordering code (the commit and abort record writes) is only
//! testable by failing the exact step it protects. A failpoint is armed
//! per thread with [`arm`] or [`arm_once`], or for a whole run through the
//! `STRATUM_FAILPOINTS` environment variable (comma-separated names).
//! Guarded code calls [`check`], which fails with
//! [`Error::FailpointTriggered`] while the point is armed.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy)]
enum Trigger {
    /// Fires on every check until disarmed.
    Always,
    /// Fires on the next check, then disarms itself.
    Once,
}

thread_local! {
    static ARMED: RefCell<HashMap<String, Trigger>> = RefCell::new(HashMap::new());
}

pub fn arm(name: &str) {
    ARMED.with(|armed| {
        armed.borrow_mut().insert(name.to_string(), Trigger::Always);
    });
}

pub fn arm_once(name: &str) {
    ARMED.with(|armed| {
        armed.borrow_mut().insert(name.to_string(), Trigger::Once);
    });
}

pub fn disarm(name: &str) {
    ARMED.with(|armed| {
        armed.borrow_mut().remove(name);
    });
}

pub fn disarm_all() {
    ARMED.with(|armed| armed.borrow_mut().clear());
}

/// Fails while `name` is armed; otherwise a no-op.
pub fn check(name: &str) -> Result<()> {
    if fire(name) || armed_by_env(name) {
        crate::stratum_debug_log!("[failpoint] {name} fired");
        return Err(Error::FailpointTriggered(name.to_string()));
    }
    Ok(())
}

fn fire(name: &str) -> bool {
    ARMED.with(|armed| {
        let mut armed = armed.borrow_mut();
        match armed.get(name) {
            None => false,
            Some(Trigger::Always) => true,
            Some(Trigger::Once) => {
                armed.remove(name);
                true
            }
        }
    })
}

fn armed_by_env(name: &str) -> bool {
    let Some(raw) = std::env::var_os("STRATUM_FAILPOINTS") else {
        return false;
    };
    raw.to_string_lossy()
        .split(',')
        .any(|entry| entry.trim() == name)
}
