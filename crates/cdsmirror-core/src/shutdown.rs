//! Cooperative shutdown on SIGINT/SIGTERM

use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide cancellation flag; workers check it between partitions.
pub fn shutdown_flag() -> &'static AtomicBool {
    static FLAG: AtomicBool = AtomicBool::new(false);
    &FLAG
}

pub fn is_shutdown_requested() -> bool {
    shutdown_flag().load(Ordering::Relaxed)
}

/// First SIGINT/SIGTERM sets the shutdown flag so workers stop picking up
/// new partitions; in-flight writes finish or are discarded without a marker.
/// A second signal exits immediately with 130.
pub fn install_signal_handlers() {
    // SAFETY: AtomicBool::swap and process::exit are async-signal-safe
    unsafe {
        for signal in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
            signal_hook::low_level::register(signal, || {
                if shutdown_flag().swap(true, Ordering::Relaxed) {
                    std::process::exit(130);
                }
            })
            .expect("failed to register signal handler");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_is_shared() {
        assert!(std::ptr::eq(shutdown_flag(), shutdown_flag()));
    }
}
