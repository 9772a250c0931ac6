//! Local process liveness probing.

/// Answers "does process `pid` exist on this machine?".
///
/// Only consulted for locks whose hostname matches the local machine.
pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

impl<F> ProcessProbe for F
where
    F: Fn(u32) -> bool + Send + Sync,
{
    fn is_alive(&self, pid: u32) -> bool {
        self(pid)
    }
}

/// Probes the operating system's process table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        // pid 0 and values that overflow pid_t address process groups, not a process.
        let Ok(raw) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if raw <= 0 {
            return false;
        }

        // SAFETY: kill with signal 0 performs the existence and permission
        // checks without delivering a signal.
        let rc = unsafe { libc::kill(raw, 0) };
        if rc == 0 {
            return true;
        }
        // EPERM: the process exists but belongs to another user.
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    /// Without a portable probe, assume the holder is alive and rely on the
    /// heartbeat timeout alone.
    #[cfg(not(unix))]
    fn is_alive(&self, _pid: u32) -> bool {
        true
    }
}
