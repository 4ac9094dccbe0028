#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Any input may be rejected, but parsing and validation must never panic.
    if let Ok(cfg) = focuslock_config::load_toml(data) {
        if cfg.validate().is_ok() {
            // A config that validates must yield a usable sweep and loop rate.
            assert!(cfg.sweep.steps >= 2);
            assert!(cfg.control.loop_hz > 0.0);
        }
    }
});
