use std::time::{Duration, Instant};

use super::*;
use crate::proctor::{run_scenario, Proctor, RunState, Verdict};

#[test]
fn test_silent_handler_is_detached_after_completion() {
    let mut scenario = arp_scenario(Duration::from_millis(100));
    let (tx, rx) = crossbeam::channel::unbounded();

    let start = Instant::now();
    let result = run_scenario(&mut scenario, move |device| {
        arp_exact(&device)?;
        std::thread::sleep(Duration::from_millis(500));
        tx.send(device.recv_packet(None).map(|_| ())).unwrap();
        Ok(())
    });

    // the run doesn't wait for the handler to wake up
    assert!(start.elapsed() < Duration::from_millis(450));
    assert_eq!(result.verdict(), Verdict::AllPassed);
    assert_eq!(rx.recv().unwrap(), Err(DeviceError::Shutdown));
}

#[test]
fn test_handler_ignoring_shutdown_is_detached() {
    let mut scenario = arp_scenario(Duration::from_millis(100));
    let (tx, rx) = crossbeam::channel::unbounded();

    let start = Instant::now();
    let result = run_scenario(&mut scenario, move |device| {
        arp_exact(&device)?;
        let mut shutdowns = 0;
        let polling = Instant::now();
        while polling.elapsed() < Duration::from_secs(1) {
            if device.recv_packet(None) == Err(DeviceError::Shutdown) {
                shutdowns += 1;
            }
        }
        tx.send(shutdowns).unwrap();
        Ok(())
    });

    // the run ends as soon as the handler polls again after being told to stop
    assert!(start.elapsed() < Duration::from_millis(700));
    assert_eq!(result.verdict(), Verdict::AllPassed);
    assert!(result.anomalies.is_empty());
    assert!(rx.recv().unwrap() > 1);
}

#[test]
fn test_deadline_applies_to_first_event() {
    let mut scenario = arp_scenario(Duration::from_millis(100));
    let result = run_scenario(&mut scenario, |_device| {
        std::thread::sleep(Duration::from_millis(300));
        Ok(())
    });

    assert_eq!(counts(&result), (0, 1, 3));
    assert_eq!(
        result.failures().next().unwrap().message,
        "no action taken before deadline"
    );
}

#[test]
fn test_rerun_after_reset() {
    let mut scenario = arp_scenario(Duration::from_secs(2));

    let failed = run_scenario(&mut scenario, |_device| Ok(()));
    assert_eq!(failed.verdict(), Verdict::Failed);

    let mut proctor = Proctor::new(&mut scenario);
    for _ in 0..2 {
        let result = proctor.run(arp_responder);
        assert_eq!(counts(&result), (4, 0, 0));
        assert_eq!(proctor.state(), RunState::Completed);
    }

    let result = proctor.run(|device| {
        device.recv_packet(None)?;
        Ok(())
    });
    assert_eq!(counts(&result), (1, 1, 2));
    assert!(matches!(proctor.state(), RunState::Aborted(_)));
}

#[test]
fn test_concurrent_runs() {
    let handles: Vec<_> = (0..4)
        .map(|i| {
            std::thread::spawn(move || {
                let mut scenario = arp_scenario(Duration::from_secs(2));
                if i % 2 == 0 {
                    run_scenario(&mut scenario, arp_responder).verdict()
                } else {
                    run_scenario(&mut scenario, |_device| Ok(())).verdict()
                }
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let expected = if i % 2 == 0 {
            Verdict::AllPassed
        } else {
            Verdict::Failed
        };
        assert_eq!(handle.join().unwrap(), expected);
    }
}

#[test]
fn test_device_interfaces() {
    let mut scenario = arp_scenario(Duration::from_secs(2));
    let (tx, rx) = crossbeam::channel::unbounded();
    run_scenario(&mut scenario, move |device| {
        let names: Vec<String> = device.interfaces().iter().map(|i| i.name.clone()).collect();
        let by_ip = device
            .interface_by_ipaddr(ip("172.16.42.1"))
            .map(|i| i.name.clone());
        let missing = device.interface_by_name("router-eth9").is_none();
        tx.send((names, by_ip, missing)).unwrap();
        Ok(())
    });

    let (names, by_ip, missing) = rx.recv().unwrap();
    assert_eq!(
        names,
        ["router-eth0", "router-eth1", "router-eth2", "router-eth3"]
    );
    assert_eq!(by_ip.as_deref(), Some("router-eth2"));
    assert!(missing);
}

#[test]
fn test_empty_scenario() {
    let mut scenario = Scenario::new("nothing");
    let result = run_scenario(&mut scenario, |_device| Ok(()));
    assert_eq!(counts(&result), (0, 0, 0));
    assert_eq!(result.verdict(), Verdict::AllPassed);
}
