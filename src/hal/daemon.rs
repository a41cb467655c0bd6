//! Daemon backgrounding.
//!
//! Classic double-fork detach, with one twist taken from the historical mux
//! daemons: under `-w` the parent sticks around until the child either
//! signals SIGHUP (bring-up succeeded) or exits (bring-up failed), so init
//! scripts get a meaningful exit status.

use std::io;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fork::{fork, setsid, Fork};
use nix::sys::signal::{kill, Signal};
use nix::sys::stat::{umask, Mode};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{chdir, dup2, getpid, Pid};
use signal_hook::consts::SIGHUP;

use crate::error::SetupError;

/// Fork into the background, returning the original parent's pid in the
/// child. The parent never returns from this function: it exits immediately,
/// or — when `wait_for_startup` is set — after the child has reported
/// success or failure.
///
/// # Errors
/// Fork or session-setup failures in the child path.
pub fn daemonize(wait_for_startup: bool) -> Result<Pid, SetupError> {
    let parent = getpid();

    match fork() {
        Ok(Fork::Child) => {}
        Ok(Fork::Parent(child)) => {
            if wait_for_startup {
                wait_for_child(child);
            }
            process::exit(0);
        }
        Err(_) => return Err(SetupError::Daemonize(io::Error::last_os_error())),
    }

    if setsid().is_err() {
        return Err(SetupError::Daemonize(io::Error::last_os_error()));
    }

    // when nobody waits for the handshake, reparent to init via a second fork
    if !wait_for_startup {
        match fork() {
            Ok(Fork::Child) => {}
            Ok(Fork::Parent(_)) => process::exit(0),
            Err(_) => return Err(SetupError::Daemonize(io::Error::last_os_error())),
        }
    }

    let _ = chdir("/");
    umask(Mode::empty());
    redirect_stdio().map_err(SetupError::Daemonize)?;

    Ok(parent)
}

/// Report successful bring-up to the waiting parent.
pub fn notify_parent(parent: Pid) {
    let _ = kill(parent, Signal::SIGHUP);
}

/// Parent side of the `-w` handshake; exits 0 on SIGHUP from the child,
/// 1 if the child dies first.
fn wait_for_child(child: i32) -> ! {
    let started = Arc::new(AtomicBool::new(false));
    if signal_hook::flag::register(SIGHUP, Arc::clone(&started)).is_err() {
        process::exit(1);
    }

    loop {
        if started.load(Ordering::Relaxed) {
            eprintln!("MUX started");
            process::exit(0);
        }
        match waitpid(Pid::from_raw(child), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {}
            _ => {
                eprintln!("MUX startup failed. See the log for details.");
                process::exit(1);
            }
        }
        thread::sleep(Duration::from_millis(100));
    }
}

/// Point stdin/stdout/stderr at /dev/null; the log backend is the only
/// output channel a detached daemon has.
fn redirect_stdio() -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let null = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")?;
    for target in 0..=2 {
        dup2(null.as_raw_fd(), target)?;
    }
    Ok(())
}
