use std::time::Duration;

use ecobms_lib::scan::{Scanner, Telemetry};
use ecobms_lib::session::Transport;

fn print_telemetry(telemetry: &Telemetry) {
    println!(
        "{}: {:.2}V {:.2}A {:.1}W SOC {:.1}% ({:.2}/{:.2}Ah) {:.1}°C charge={} discharge={}",
        telemetry.address,
        telemetry.basic.voltage,
        telemetry.basic.current,
        telemetry.basic.watts,
        telemetry.basic.soc_percent,
        telemetry.basic.remaining_ah,
        telemetry.basic.nominal_ah,
        telemetry.basic.temperature,
        telemetry.basic.switches.charge_enabled,
        telemetry.basic.switches.discharge_enabled,
    );
    if !telemetry.cells.is_empty() {
        let cells: Vec<String> = telemetry
            .cells
            .iter()
            .map(|v| format!("{v:.3}"))
            .collect();
        println!("  cells: [{}]", cells.join(", "));
    }
}

/// Polls each device once. A failure on one device never skips the rest.
pub async fn scan_pass<T: Transport>(scanner: &mut Scanner<T>, devices: &[String], settle: Duration) {
    for (i, device) in devices.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(settle).await;
        }
        match scanner.scan_device(device).await {
            Ok(telemetry) => print_telemetry(&telemetry),
            Err(err) => log::warn!("Scan of {device} failed: {err}"),
        }
    }
}

/// Runs scan passes forever, one every `interval`.
pub async fn run<T: Transport>(
    scanner: &mut Scanner<T>,
    devices: &[String],
    interval: Duration,
    settle: Duration,
) {
    loop {
        println!("--- scan pass at {} ---", chrono::Local::now().to_rfc3339());
        scan_pass(scanner, devices, settle).await;
        tokio::time::sleep(interval).await;
    }
}
