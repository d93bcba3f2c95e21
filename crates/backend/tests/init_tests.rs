//! Init/exit lifecycle tests
//!
//! Each acquisition step of an epoch is made to fail in turn; whatever was
//! acquired before it must be released and the gate must return to idle.
//!
//! Run with: `cargo test -p backend --test init_tests`

use api::{ClockId, DeviceRegistry, OsBackend, UsbError};
use backend::CeBackend;
use backend::test_utils::{MockPlatform, mock_device};
use common::BackendConfig;
use common::intern::MAX_CAPACITY;
use common::lifecycle::IDLE;
use std::sync::{Arc, Barrier};
use std::thread;

fn backend_with(config: BackendConfig) -> CeBackend<MockPlatform> {
    CeBackend::new(
        MockPlatform::with_devices(vec![mock_device(1, 2, 0x1234, 0x5678)]),
        config,
    )
}

fn assert_fully_released(backend: &CeBackend<MockPlatform>) {
    let platform = backend.platform();
    assert_eq!(backend.usage(), IDLE);
    assert!(!backend.is_initialized());
    assert_eq!(platform.driver().opens(), platform.driver().closes());
    assert_eq!(platform.running_workers(), 0);
}

// ============================================================================
// Balanced use
// ============================================================================

#[test]
fn test_nested_init_shares_one_epoch() {
    let backend = backend_with(BackendConfig::default());

    backend.init().unwrap();
    backend.init().unwrap();
    assert_eq!(backend.usage(), 1);
    assert_eq!(backend.platform().driver().opens(), 1);
    assert_eq!(backend.platform().spawned_workers(), 1);

    backend.exit();
    assert!(backend.is_initialized());
    assert_eq!(backend.platform().driver().closes(), 0);

    backend.exit();
    assert_fully_released(&backend);
    assert_eq!(backend.platform().driver().closes(), 1);
}

#[test]
fn test_reinit_after_exit_starts_new_epoch() {
    let backend = backend_with(BackendConfig::default());

    for _ in 0..3 {
        backend.init().unwrap();
        assert!(backend.clock_gettime(ClockId::Monotonic).is_ok());
        backend.exit();
    }

    assert_fully_released(&backend);
    assert_eq!(backend.platform().driver().opens(), 3);
    assert_eq!(backend.platform().spawned_workers(), 3);
}

#[test]
fn test_concurrent_init_exit_pairs() {
    let backend = Arc::new(backend_with(BackendConfig::default()));
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let backend = Arc::clone(&backend);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..25 {
                    backend.init().unwrap();
                    backend.clock_gettime(ClockId::Monotonic).unwrap();
                    backend.get_device_list(&DeviceRegistry::new()).unwrap();
                    backend.exit();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_fully_released(&backend);
    assert_eq!(backend.platform().driver().live_devices(), 0);
}

#[test]
fn test_unbalanced_exit_is_ignored() {
    let backend = backend_with(BackendConfig::default());

    backend.exit();
    assert_eq!(backend.usage(), IDLE);

    backend.init().unwrap();
    backend.exit();
    backend.exit();
    assert_fully_released(&backend);

    backend.init().unwrap();
    assert!(backend.is_initialized());
    backend.exit();
}

// ============================================================================
// Acquisition failures
// ============================================================================

#[test]
fn test_driver_open_failure() {
    let backend = backend_with(BackendConfig::default());
    backend.platform().fail_driver_open(true);

    assert_eq!(backend.init(), Err(UsbError::NotSupported));
    assert_fully_released(&backend);
    assert_eq!(backend.platform().driver().opens(), 0);
    assert_eq!(backend.platform().spawned_workers(), 0);

    // The next caller retries from scratch
    backend.platform().fail_driver_open(false);
    backend.init().unwrap();
    assert!(backend.is_initialized());
    backend.exit();
    assert_fully_released(&backend);
}

#[test]
fn test_request_channel_failure() {
    let mut config = BackendConfig::default();
    config.clock.queue_capacity = 0;
    let backend = backend_with(config);

    assert_eq!(backend.init(), Err(UsbError::NoMem));
    assert_fully_released(&backend);
    assert_eq!(backend.platform().driver().closes(), 1);
    assert_eq!(backend.platform().spawned_workers(), 0);
}

#[test]
fn test_worker_spawn_failure() {
    let backend = backend_with(BackendConfig::default());
    backend.platform().fail_spawn(true);

    assert_eq!(backend.init(), Err(UsbError::NoMem));
    assert_fully_released(&backend);
    assert_eq!(backend.platform().driver().closes(), 1);

    backend.platform().fail_spawn(false);
    backend.init().unwrap();
    backend.exit();
    assert_fully_released(&backend);
}

#[test]
fn test_session_table_failure() {
    let mut config = BackendConfig::default();
    config.sessions.capacity = MAX_CAPACITY + 1;
    let backend = backend_with(config);

    assert_eq!(backend.init(), Err(UsbError::NoMem));

    // The worker was started and then shut down again
    assert_eq!(backend.platform().spawned_workers(), 1);
    assert_fully_released(&backend);
    assert_eq!(backend.platform().driver().closes(), 1);
}
