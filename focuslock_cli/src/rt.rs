//! Real-time scheduling for the control loop (Linux SCHED_FIFO and mlockall).
//!
//! Everything here is best effort: failures are reported as warnings and the
//! run continues with normal scheduling.

use crate::cli::RtLock;

#[cfg(target_os = "linux")]
fn memlock_limit_hint() -> Option<String> {
    let mut rlim = std::mem::MaybeUninit::<libc::rlimit>::uninit();
    // SAFETY: getrlimit writes a full rlimit on success; we only read it when rc == 0.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, rlim.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: initialised by the successful call above.
    let cur = unsafe { rlim.assume_init() }.rlim_cur;
    if cur == libc::RLIM_INFINITY {
        Some("memlock limit: unlimited".to_string())
    } else {
        Some(format!("memlock limit: {} KiB", cur / 1024))
    }
}

#[cfg(target_os = "linux")]
fn mlockall(flags: libc::c_int) -> std::io::Result<()> {
    // SAFETY: mlockall has no memory-safety preconditions.
    if unsafe { libc::mlockall(flags) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(target_os = "linux")]
fn apply_mem_lock(lock: RtLock) -> eyre::Result<()> {
    let retryable = |e: &std::io::Error| {
        matches!(e.raw_os_error(), Some(code) if code == libc::EPERM || code == libc::ENOMEM)
    };
    let err = match lock {
        RtLock::None => return Ok(()),
        RtLock::Current => match mlockall(libc::MCL_CURRENT) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        },
        RtLock::All => match mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) {
            Ok(()) => return Ok(()),
            // Fall back to locking resident pages only.
            Err(e) if retryable(&e) && mlockall(libc::MCL_CURRENT).is_ok() => {
                tracing::warn!(error = %e, "mlockall(current|future) failed; locked current pages only");
                return Ok(());
            }
            Err(e) => e,
        },
    };
    let mut msg = format!("mlockall failed: {err}");
    if retryable(&err) {
        if let Some(h) = memlock_limit_hint() {
            msg.push_str(&format!("; {h}"));
        }
        msg.push_str("; needs CAP_IPC_LOCK (or root) and a sufficient 'ulimit -l'");
    }
    Err(eyre::eyre!(msg))
}

#[cfg(target_os = "linux")]
fn apply_fifo_priority(prio: Option<i32>) -> eyre::Result<i32> {
    use libc::{SCHED_FIFO, sched_get_priority_max, sched_get_priority_min, sched_param};

    // SAFETY: plain queries without pointer arguments.
    let (min, max) = unsafe { (sched_get_priority_min(SCHED_FIFO), sched_get_priority_max(SCHED_FIFO)) };
    let (min, max) = if min < 0 || max < 0 { (1, 99) } else { (min, max) };
    let prio = prio.unwrap_or(max).clamp(min, max);
    let param = sched_param {
        sched_priority: prio,
    };
    // SAFETY: `param` outlives the call; pid 0 is the calling process.
    let rc = unsafe { libc::sched_setscheduler(0, SCHED_FIFO, &param) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            eyre::bail!("{err}; needs CAP_SYS_NICE or root (e.g. 'sudo setcap cap_sys_nice=ep focuslock')");
        }
        return Err(eyre::eyre!(err));
    }
    Ok(prio)
}

/// Apply real-time settings once per process.
#[cfg(target_os = "linux")]
pub fn setup_rt_once(rt: bool, prio: Option<i32>, lock: RtLock) {
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();
    if !rt {
        return;
    }
    RT_ONCE.get_or_init(|| {
        match apply_mem_lock(lock) {
            Ok(()) => tracing::info!(?lock, "RT memory lock applied"),
            Err(err) => eprintln!("Warning: {err}"),
        }
        match apply_fifo_priority(prio) {
            Ok(p) => tracing::info!(priority = p, "RT SCHED_FIFO applied"),
            Err(err) => {
                let wanted = prio.map_or_else(|| "(max)".to_string(), |p| p.to_string());
                eprintln!("Warning: sched_setscheduler(SCHED_FIFO, prio={wanted}) failed: {err}");
            }
        }
    });
}

#[cfg(not(target_os = "linux"))]
pub fn setup_rt_once(rt: bool, _prio: Option<i32>, _lock: RtLock) {
    if rt {
        eprintln!("Warning: --rt is only supported on Linux; continuing with normal scheduling.");
    }
}
