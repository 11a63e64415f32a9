//! Boundary behaviour for small and well-known limits, run unconditionally
//! against the predicate and the in-process SHMEM claim/result paths
//! (cheap; no process spawning or network binding required).

use perfnum_config::Settings;
use perfnum_core::error::PerfError;
use perfnum_core::shm::ShmRegion;
use perfnum_core::worker;

fn settings_for(label: &str) -> Settings {
    let mut s = Settings::default();
    s.shm_name = format!("perfnum-boundary-{label}-{}", std::process::id());
    s
}

#[test]
fn limit_zero_is_rejected() {
    let settings = settings_for("l0");
    let err = ShmRegion::create(0, &settings).unwrap_err();
    assert!(matches!(err, PerfError::InvalidLimit { limit: 0 }));
}

#[test]
fn limit_one_finds_nothing() {
    let settings = settings_for("l1");
    let region = ShmRegion::create(1, &settings).unwrap();
    worker::run_shmem(&region, &settings).unwrap();
    assert!(region.results().is_empty());
    region.teardown();
}

#[test]
fn limit_six_finds_six() {
    let settings = settings_for("l6");
    let region = ShmRegion::create(6, &settings).unwrap();
    worker::run_shmem(&region, &settings).unwrap();
    assert_eq!(region.results(), vec![6]);
    region.teardown();
}

#[test]
fn limit_28_finds_6_and_28() {
    let settings = settings_for("l28");
    let region = ShmRegion::create(28, &settings).unwrap();
    worker::run_shmem(&region, &settings).unwrap();
    assert_eq!(region.results(), vec![6, 28]);
    region.teardown();
}

#[test]
fn limit_496_finds_three_perfect_numbers() {
    let settings = settings_for("l496");
    let region = ShmRegion::create(496, &settings).unwrap();
    worker::run_shmem(&region, &settings).unwrap();
    assert_eq!(region.results(), vec![6, 28, 496]);
    region.teardown();
}

#[test]
fn limit_8128_finds_four_perfect_numbers() {
    let settings = settings_for("l8128");
    let region = ShmRegion::create(8128, &settings).unwrap();
    worker::run_shmem(&region, &settings).unwrap();
    assert_eq!(region.results(), vec![6, 28, 496, 8128]);
    region.teardown();
}
