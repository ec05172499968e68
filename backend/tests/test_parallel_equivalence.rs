//! Tests that worker threads never change results
//!
//! The same model runs with one thread, several threads, debug mode and a
//! shuffled rank index; every observable outcome must match.

use grid_simulator_core_rs::{
    set_parent, CallbackError, ExecConfig, Executive, Model, NextChange, ObjectBehavior,
    ObjectBuilder, ObjectId, PassSet, PassType, RunSummary, SimObject, SimulationError, Timestamp,
};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

// ============================================================================
// A small feeder: one substation, many loads, one meter per load
// ============================================================================

const LOADS: usize = 48;
const HORIZON: i64 = 150;

struct Shared {
    setpoint: AtomicI64,
    total: AtomicI64,
    values: Vec<AtomicI64>,
}

struct Substation {
    shared: Arc<Shared>,
    last_time: AtomicI64,
    history: Arc<Mutex<Vec<(i64, i64)>>>,
}

impl ObjectBehavior for Substation {
    fn sync(&self, _: &SimObject, t: Timestamp, pass: PassType) -> Result<NextChange, CallbackError> {
        match pass {
            PassType::BottomUp => {
                self.shared.setpoint.store((t.as_secs() / 10) % 13, Ordering::SeqCst);
                Ok(NextChange::Never)
            }
            _ => {
                let total = self.shared.total.swap(0, Ordering::SeqCst);
                self.history.lock().unwrap().push((t.as_secs(), total));
                // every timestep takes two iterations
                if self.last_time.swap(t.as_secs(), Ordering::SeqCst) != t.as_secs() {
                    Ok(NextChange::At(t))
                } else {
                    Ok(NextChange::Never)
                }
            }
        }
    }
}

struct Load {
    k: usize,
    shared: Arc<Shared>,
}

impl ObjectBehavior for Load {
    fn sync(&self, _: &SimObject, t: Timestamp, _: PassType) -> Result<NextChange, CallbackError> {
        let value = self.shared.setpoint.load(Ordering::SeqCst) * 100 + self.k as i64;
        self.shared.values[self.k].store(value, Ordering::SeqCst);
        self.shared.total.fetch_add(value, Ordering::SeqCst);
        if t.as_secs() < HORIZON {
            Ok(NextChange::At(t.saturating_add(10 + (self.k as i64 % 5) * 3)))
        } else {
            Ok(NextChange::Soft(t.saturating_add(1000)))
        }
    }
}

struct Meter {
    k: usize,
    shared: Arc<Shared>,
    readings: Arc<Mutex<Vec<(i64, i64)>>>,
}

impl ObjectBehavior for Meter {
    fn sync(&self, _: &SimObject, t: Timestamp, _: PassType) -> Result<NextChange, CallbackError> {
        let value = self.shared.values[self.k].load(Ordering::SeqCst);
        self.readings.lock().unwrap().push((t.as_secs(), value));
        Ok(NextChange::Never)
    }
}

#[derive(Debug, PartialEq)]
struct Outcome {
    passes: u64,
    timesteps: u64,
    objects_synced: u64,
    final_time: Timestamp,
    substation: Vec<(i64, i64)>,
    meters: Vec<Vec<(i64, i64)>>,
}

fn run_feeder(config: ExecConfig) -> (Outcome, RunSummary) {
    let shared = Arc::new(Shared {
        setpoint: AtomicI64::new(0),
        total: AtomicI64::new(0),
        values: (0..LOADS).map(|_| AtomicI64::new(0)).collect(),
    });
    let history = Arc::new(Mutex::new(Vec::new()));
    let readings: Vec<_> = (0..LOADS).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();

    let mut model = Model::new();
    let substation = model
        .add(
            ObjectBuilder::new(Substation {
                shared: Arc::clone(&shared),
                last_time: AtomicI64::new(-1),
                history: Arc::clone(&history),
            })
            .name("substation")
            .passes(PassSet::BOTTOM_UP | PassSet::POST_TOPDOWN),
        )
        .unwrap();
    for k in 0..LOADS {
        let load = model
            .add(ObjectBuilder::new(Load {
                k,
                shared: Arc::clone(&shared),
            }))
            .unwrap();
        set_parent(&mut model, load, substation).unwrap();
        let meter = model
            .add(ObjectBuilder::new(Meter {
                k,
                shared: Arc::clone(&shared),
                readings: Arc::clone(&readings[k]),
            }))
            .unwrap();
        set_parent(&mut model, meter, load).unwrap();
    }

    let mut executive = Executive::new(model, config).unwrap();
    let summary = executive.run().unwrap();

    let outcome = Outcome {
        passes: summary.passes,
        timesteps: summary.timesteps,
        objects_synced: summary.objects_synced,
        final_time: summary.final_time,
        substation: history.lock().unwrap().clone(),
        meters: readings.iter().map(|r| r.lock().unwrap().clone()).collect(),
    };
    (outcome, summary)
}

fn config(threads: usize) -> ExecConfig {
    ExecConfig {
        stop_time: Timestamp::from_secs(500),
        thread_count: threads,
        ..Default::default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_thread_count_does_not_change_results() {
    let (single, single_summary) = run_feeder(config(1));
    let (parallel, parallel_summary) = run_feeder(config(4));

    assert_eq!(single, parallel);
    assert_eq!(single_summary.worker_threads, 0);
    // two wide buckets (loads, meters), four workers each
    assert_eq!(parallel_summary.worker_threads, 8);
}

#[test]
fn test_feeder_converges_in_two_iterations_per_timestep() {
    let (outcome, summary) = run_feeder(config(3));

    assert_eq!(summary.passes, summary.timesteps * 2);
    assert!(outcome.final_time >= Timestamp::from_secs(HORIZON));
    // each meter read its own load, written earlier in the same pass
    for (k, readings) in outcome.meters.iter().enumerate() {
        for (t, value) in readings {
            assert_eq!(*value, ((t / 10) % 13) * 100 + k as i64);
        }
    }
}

#[test]
fn test_more_threads_than_members() {
    let (single, _) = run_feeder(config(1));
    let (wide, summary) = run_feeder(config(64));

    assert_eq!(single, wide);
    // one thread per member for both wide buckets
    assert_eq!(summary.worker_threads, LOADS * 2);
}

#[test]
fn test_debug_mode_matches_threaded_run() {
    let (threaded, _) = run_feeder(config(4));
    let (debug, summary) = run_feeder(ExecConfig {
        debug_mode: true,
        ..config(4)
    });

    assert_eq!(threaded, debug);
    assert_eq!(summary.worker_threads, 0);
}

#[test]
fn test_shuffled_buckets_match_plain_order() {
    let (plain, _) = run_feeder(config(4));
    let (shuffled, _) = run_feeder(ExecConfig {
        shuffle_buckets: true,
        rng_seed: 2024,
        ..config(4)
    });

    assert_eq!(plain, shuffled);
}

// ============================================================================
// Failures inside a pooled bucket
// ============================================================================

struct MaybeFail {
    fail: bool,
    panic: bool,
}

impl ObjectBehavior for MaybeFail {
    fn sync(&self, _: &SimObject, _: Timestamp, _: PassType) -> Result<NextChange, CallbackError> {
        if self.panic {
            panic!("relay tripped");
        }
        if self.fail {
            return Err(CallbackError::new("solver diverged"));
        }
        Ok(NextChange::Never)
    }
}

fn failing_model(failing: &[usize], panicking: &[usize]) -> Model {
    let mut model = Model::new();
    for i in 0..10 {
        model
            .add(
                ObjectBuilder::new(MaybeFail {
                    fail: failing.contains(&i),
                    panic: panicking.contains(&i),
                })
                .name(format!("breaker_{}", i)),
            )
            .unwrap();
    }
    model
}

fn failing_object(threads: usize, failing: &[usize], panicking: &[usize]) -> SimulationError {
    let mut executive = Executive::new(failing_model(failing, panicking), config(threads)).unwrap();
    executive.run().unwrap_err()
}

#[test]
fn test_first_failure_in_member_order_is_reported() {
    for threads in [1, 4] {
        match failing_object(threads, &[3, 7], &[]) {
            SimulationError::SyncFailed { name, message, .. } => {
                assert_eq!(name, "breaker_3", "threads = {}", threads);
                assert_eq!(message, "solver diverged");
            }
            other => panic!("expected SyncFailed, got {:?}", other),
        }
    }
}

#[test]
fn test_panic_on_worker_is_reported_not_deadlocked() {
    match failing_object(4, &[], &[8]) {
        SimulationError::SyncFailed { name, message, .. } => {
            assert_eq!(name, "breaker_8");
            assert!(message.contains("relay tripped"));
        }
        other => panic!("expected SyncFailed, got {:?}", other),
    }
}

// ============================================================================
// Shared target guarded by the object lock
// ============================================================================

const TAPS: usize = 64;

/// Running total that taps accumulate into; only safe under the bus lock
#[derive(Default)]
struct BusTotal {
    injected: AtomicI64,
}

struct Bus;

impl ObjectBehavior for Bus {
    fn sync(&self, _: &SimObject, t: Timestamp, _: PassType) -> Result<NextChange, CallbackError> {
        if t.as_secs() < 50 {
            Ok(NextChange::At(t.saturating_add(10)))
        } else {
            Ok(NextChange::Never)
        }
    }
}

struct Tap {
    amount: i64,
    bus: ObjectId,
    model: Arc<OnceLock<Weak<Model>>>,
    total: Arc<BusTotal>,
}

impl ObjectBehavior for Tap {
    fn sync(&self, _: &SimObject, _: Timestamp, _: PassType) -> Result<NextChange, CallbackError> {
        let model = self
            .model
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| CallbackError::new("model not attached"))?;
        let bus = model
            .get(self.bus)
            .ok_or_else(|| CallbackError::new("bus missing"))?;

        // read-modify-write in two steps: lost updates unless the lock holds
        let _guard = bus.lock();
        let current = self.total.injected.load(Ordering::SeqCst);
        std::thread::yield_now();
        self.total.injected.store(current + self.amount, Ordering::SeqCst);
        Ok(NextChange::Never)
    }
}

fn run_bus(threads: usize) -> (i64, u64, RunSummary) {
    let handle = Arc::new(OnceLock::new());
    let total = Arc::new(BusTotal::default());

    let mut model = Model::new();
    let bus = model.add(ObjectBuilder::new(Bus).name("bus")).unwrap();
    for k in 0..TAPS {
        let tap = model
            .add(ObjectBuilder::new(Tap {
                amount: k as i64 + 1,
                bus,
                model: Arc::clone(&handle),
                total: Arc::clone(&total),
            }))
            .unwrap();
        set_parent(&mut model, tap, bus).unwrap();
    }

    let mut executive = Executive::new(model, config(threads)).unwrap();
    let _ = handle.set(Arc::downgrade(&executive.model_handle()));
    let summary = executive.run().unwrap();

    let acquisitions = executive
        .model()
        .get(bus)
        .unwrap()
        .object_lock()
        .stats()
        .acquisitions;
    (total.injected.load(Ordering::SeqCst), acquisitions, summary)
}

#[test]
fn test_taps_share_bus_through_object_lock() {
    let per_timestep: i64 = (1..=TAPS as i64).sum();

    for (threads, workers) in [(1, 0), (8, 8)] {
        let (injected, acquisitions, summary) = run_bus(threads);

        assert_eq!(summary.timesteps, 6, "threads = {}", threads);
        assert_eq!(summary.worker_threads, workers);
        assert_eq!(injected, per_timestep * 6, "threads = {}", threads);
        assert_eq!(acquisitions, (TAPS * 6) as u64, "threads = {}", threads);
    }
}
