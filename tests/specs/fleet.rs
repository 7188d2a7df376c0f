//! Fleet status: one sysinfo task per live device, reduced into a
//! single report.

use crate::prelude::*;
use em_core::{Capability, PlanRequest, SysinfoReport};
use em_proto::{ControlRequest, ControlResponse};
use std::time::Duration;

#[tokio::test]
async fn fleet_status_collects_every_live_device() {
    let coordinator = start_coordinator(None).await;
    let mac = start_worker(&coordinator, "d-mac", [Capability::Cpu], None).await;
    let win = start_worker(
        &coordinator,
        "d-win",
        [Capability::Cpu, Capability::Gpu, Capability::Npu],
        None,
    )
    .await;

    // Both workers registered through auto-join.
    wait_until("both devices registered", Duration::from_secs(5), || {
        coordinator.registry.len() == 2
    })
    .await;

    let request = PlanRequest::text("collect status from all devices");
    let job_id = match control(&coordinator, ControlRequest::SubmitJob { request }).await {
        ControlResponse::Submitted { job_id } => job_id,
        other => panic!("unexpected submit response: {other:?}"),
    };

    let view = await_job(&coordinator, &job_id, Duration::from_secs(10)).await;
    assert_done(&view);
    assert_eq!(view.tasks.len(), 2);

    // Each line of the reduction is one device's structured report.
    let final_result = view.job.final_result.expect("final result");
    let reports: Vec<SysinfoReport> = final_result
        .lines()
        .map(|line| serde_json::from_str(line).expect("parseable sysinfo line"))
        .collect();
    assert_eq!(reports.len(), 2);
    for report in &reports {
        assert!(!report.hostname.is_empty());
    }
    // The npu-capable worker reports its flag.
    assert_eq!(reports.iter().filter(|r| r.has_npu).count(), 1);

    mac.shutdown().await;
    win.shutdown().await;
    coordinator.shutdown().await;
}

#[tokio::test]
async fn list_devices_shows_capabilities_and_liveness() {
    let coordinator = start_coordinator(None).await;
    let worker =
        start_worker(&coordinator, "probe", [Capability::Cpu, Capability::Npu], None).await;

    wait_until("device registered", Duration::from_secs(5), || coordinator.registry.len() == 1)
        .await;

    match control(&coordinator, ControlRequest::ListDevices).await {
        ControlResponse::Devices { devices } => {
            assert_eq!(devices.len(), 1);
            assert_eq!(devices[0].info.name, "probe");
            assert!(devices[0].has(em_core::Capability::Npu));
            assert!(devices[0].is_live());
        }
        other => panic!("unexpected response: {other:?}"),
    }

    worker.shutdown().await;
    coordinator.shutdown().await;
}
