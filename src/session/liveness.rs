use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, Signal, System};

fn probe(pid: u32) -> Option<System> {
    if pid == 0 {
        return None;
    }

    let sysinfo_pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[sysinfo_pid]),
        true,
        ProcessRefreshKind::nothing(),
    );

    let alive = system
        .process(sysinfo_pid)
        .map(|process| !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
        .unwrap_or(false);

    alive.then_some(system)
}

/// Check whether `pid` names a running (non-zombie) process.
pub fn is_process_running(pid: u32) -> bool {
    probe(pid).is_some()
}

/// Send SIGTERM to `pid`. Returns true if the signal was delivered.
pub fn terminate_process(pid: u32) -> bool {
    let Some(system) = probe(pid) else {
        return false;
    };

    system
        .process(Pid::from_u32(pid))
        .and_then(|process| process.kill_with(Signal::Term))
        .unwrap_or(false)
}
