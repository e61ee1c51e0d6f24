//! Single-instance enforcement through the PID file lock.

use tempfile::TempDir;

use hatch::config::Paths;
use hatch::daemon::{is_running, PidFile};

#[test]
fn test_second_acquisition_fails_while_first_holds_lock() {
    let dir = TempDir::new().unwrap();
    let paths = Paths::at(dir.path());

    let first = PidFile::acquire(&paths).unwrap();

    let err = PidFile::acquire(&paths).unwrap_err();
    assert!(err.to_string().contains("another instance running"), "{}", err);

    // A third observer sees the running daemon and its PID.
    assert_eq!(is_running(&paths).unwrap(), (true, std::process::id()));

    // After the first instance exits, the PID file is gone and observers
    // see a stopped daemon.
    first.release().unwrap();
    assert!(!paths.pid_file().exists());
    assert_eq!(is_running(&paths).unwrap(), (false, 0));

    // And the lock can be re-acquired.
    let again = PidFile::acquire(&paths).unwrap();
    again.release().unwrap();
}

#[test]
fn test_observer_does_not_steal_the_lock() {
    let dir = TempDir::new().unwrap();
    let paths = Paths::at(dir.path());

    let holder = PidFile::acquire(&paths).unwrap();

    // Probing twice in a row keeps reporting the same holder: is_running
    // releases any lock it briefly acquires, and never unlocks the holder.
    assert_eq!(is_running(&paths).unwrap(), (true, std::process::id()));
    assert_eq!(is_running(&paths).unwrap(), (true, std::process::id()));

    holder.release().unwrap();
}
