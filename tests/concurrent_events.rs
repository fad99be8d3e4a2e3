//! Device events arriving from several threads at once.

use lightpath::sim::SimDevice;
use lightpath::{BeamPath, DeviceRef, DeviceState, LightController, LightDevice, PathEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

fn sim(name: &str, beamline: &str, z: f64) -> Arc<SimDevice> {
    SimDevice::new(name, beamline, z).with_mps().into_ref()
}

#[test]
fn concurrent_events_settle_to_consistent_state() {
    let devices: Vec<Arc<SimDevice>> = (0..6).map(|i| sim(&format!("d{}", i), "HXR", i as f64)).collect();
    let refs: Vec<DeviceRef> = devices.iter().map(|d| d.clone() as DeviceRef).collect();
    let path = BeamPath::new("HXR", refs).unwrap();

    let barrier = Arc::new(Barrier::new(devices.len()));
    let handles: Vec<_> = devices
        .iter()
        .enumerate()
        .map(|(i, device)| {
            let device = device.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for round in 0..200 {
                    let insert = (round + i) % 2 == 0;
                    device.set_state(if insert {
                        DeviceState::Inserted
                    } else {
                        DeviceState::Removed
                    });
                    device.set_faulted(insert);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Every thread ends on round 199: odd-indexed devices inserted and faulted.
    let snapshot = path.snapshot();
    assert_eq!(snapshot.impediment.as_deref(), Some("d1"));
    assert_eq!(snapshot.tripped, vec!["d1".to_string()]);
    assert_eq!(snapshot.faulted, vec!["d3".to_string(), "d5".to_string()]);
    assert_eq!(*path.watch().borrow(), snapshot);
}

#[test]
fn subscribers_can_come_and_go_during_delivery() {
    let device = sim("stopper", "HXR", 1.0);
    let path = BeamPath::new("HXR", vec![device.clone() as DeviceRef]).unwrap();
    let delivered = Arc::new(AtomicUsize::new(0));

    let churn = {
        let path = path.clone();
        let delivered = delivered.clone();
        thread::spawn(move || {
            for _ in 0..500 {
                let sink = delivered.clone();
                let id = path.subscribe(
                    Arc::new(move |_: &PathEvent| {
                        sink.fetch_add(1, Ordering::SeqCst);
                    }),
                    None,
                );
                path.unsubscribe(id);
            }
        })
    };

    for i in 0..500 {
        if i % 2 == 0 {
            device.set_inserted();
        } else {
            device.set_removed();
        }
    }
    churn.join().unwrap();

    assert_eq!(path.subscriber_count(), 0);
    assert!(device.state() == DeviceState::Removed);
}

#[test]
fn separate_beamlines_refresh_in_parallel() {
    let hxr: Vec<Arc<SimDevice>> = (0..4).map(|i| sim(&format!("h{}", i), "HXR", i as f64)).collect();
    let sxr: Vec<Arc<SimDevice>> = (0..4)
        .map(|i| sim(&format!("s{}", i), "SXR", 10.0 + i as f64))
        .collect();
    let all: Vec<DeviceRef> = hxr
        .iter()
        .chain(sxr.iter())
        .map(|d| d.clone() as DeviceRef)
        .collect();
    let light = LightController::new(all, Vec::new());

    let drive = |devices: Vec<Arc<SimDevice>>| {
        thread::spawn(move || {
            for _ in 0..100 {
                for device in &devices {
                    device.set_inserted();
                    device.set_removed();
                }
            }
            devices[2].set_inserted();
        })
    };
    let a = drive(hxr.clone());
    let b = drive(sxr.clone());
    a.join().unwrap();
    b.join().unwrap();

    let hxr_path = light.beamline("HXR").unwrap().path();
    let sxr_path = light.beamline("SXR").unwrap().path();
    assert_eq!(hxr_path.impediment().map(|d| d.name().to_string()), Some("h2".into()));
    assert_eq!(sxr_path.impediment().map(|d| d.name().to_string()), Some("s2".into()));
    assert_eq!(hxr_path.snapshot().impediment.as_deref(), Some("h2"));
    assert_eq!(sxr_path.snapshot().impediment.as_deref(), Some("s2"));
}

/// Copies the state of `source` onto `target` on every event of `path`.
fn mirror(path: &BeamPath, source: &Arc<SimDevice>, target: &Arc<SimDevice>) {
    let source = source.clone();
    let target = target.clone();
    path.subscribe(
        Arc::new(move |_: &PathEvent| {
            let state = source.state();
            if target.state() != state {
                target.set_state(state);
            }
        }),
        None,
    );
}

#[test]
fn observers_actuating_each_others_paths_do_not_deadlock() {
    let h_trigger = sim("h_trigger", "HXR", 1.0);
    let h_echo = sim("h_echo", "HXR", 2.0);
    let s_trigger = sim("s_trigger", "SXR", 1.0);
    let s_echo = sim("s_echo", "SXR", 2.0);
    let hxr = BeamPath::new(
        "HXR",
        vec![h_trigger.clone() as DeviceRef, h_echo.clone() as DeviceRef],
    )
    .unwrap();
    let sxr = BeamPath::new(
        "SXR",
        vec![s_trigger.clone() as DeviceRef, s_echo.clone() as DeviceRef],
    )
    .unwrap();
    mirror(&hxr, &h_trigger, &s_echo);
    mirror(&sxr, &s_trigger, &h_echo);

    let (done_tx, done_rx) = mpsc::channel();
    let barrier = Arc::new(Barrier::new(2));
    for trigger in [h_trigger.clone(), s_trigger.clone()] {
        let barrier = barrier.clone();
        let done_tx = done_tx.clone();
        thread::spawn(move || {
            barrier.wait();
            for round in 0..300 {
                if round % 2 == 0 {
                    trigger.set_inserted();
                } else {
                    trigger.set_removed();
                }
            }
            trigger.set_inserted();
            let _ = done_tx.send(());
        });
    }
    drop(done_tx);

    for _ in 0..2 {
        done_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("cross-path actuation finished");
    }

    assert_eq!(s_echo.state(), DeviceState::Inserted);
    assert_eq!(h_echo.state(), DeviceState::Inserted);
    assert_eq!(hxr.snapshot().impediment.as_deref(), Some("h_trigger"));
    assert_eq!(sxr.snapshot().impediment.as_deref(), Some("s_trigger"));
    assert_eq!(*hxr.watch().borrow(), hxr.snapshot());
    assert_eq!(*sxr.watch().borrow(), sxr.snapshot());
}
