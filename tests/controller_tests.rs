use heatcoil::interlock::{InterlockEventKind, OffReason};
use heatcoil::lines::{Level, LineMap, LineRole};
use heatcoil::*;
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn test_start_and_orderly_shutdown() {
    let sim = SimulatedLines::new();
    sim.hold_ticks(1500);

    let controller = CoilController::start(InterlockConfig::default(), sim.clone()).unwrap();
    assert!(controller.watchdog_running());
    assert_eq!(sim.reserved_count(), 4);
    assert_eq!(sim.level(LineMap::default().chip_select), Level::High);

    sleep(Duration::from_millis(2500)).await;
    assert_eq!(controller.snapshot().reading.ticks(), 1500);

    let interlock = controller.interlock();
    let status = controller.surface().open(Channel::Status);
    status.write(b"1").unwrap();
    assert_eq!(sim.heat_level(), Level::High);

    let report = controller.shutdown().await.unwrap();

    assert!(report.cycles >= 3);
    assert_eq!(report.trips, 0);
    assert_eq!(interlock.heater(), HeaterState::Off);
    assert_eq!(sim.heat_level(), Level::Low);
    assert_eq!(sim.reserved_count(), 0);
    assert_eq!(
        interlock.recent_events().last().map(|e| e.kind),
        Some(InterlockEventKind::TurnedOff(OffReason::Shutdown))
    );
}

#[tokio::test(start_paused = true)]
async fn test_no_samples_after_shutdown() {
    let sim = SimulatedLines::new();
    let controller = CoilController::start(InterlockConfig::default(), sim.clone()).unwrap();
    sleep(Duration::from_millis(1500)).await;

    controller.shutdown().await.unwrap();
    let conversions = sim.conversions();
    sleep(Duration::from_secs(5)).await;

    assert_eq!(sim.conversions(), conversions);
}

#[tokio::test(start_paused = true)]
async fn test_refused_reservation_aborts_start() {
    let sim = SimulatedLines::new();
    sim.refuse_reservation(LineMap::default().clock);

    let result = CoilController::start(InterlockConfig::default(), sim.clone());

    assert!(matches!(
        result,
        Err(InterlockError::LineUnavailable { role: LineRole::Clock, pin: 23, .. })
    ));
    // Heat and chip-select were rolled back.
    assert_eq!(sim.reserved_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_config_reserves_nothing() {
    let sim = SimulatedLines::new();
    let mut config = InterlockConfig::default();
    config.limits.soft_limit = 3000;

    let result = CoilController::start(config, sim.clone());

    assert!(matches!(result, Err(InterlockError::Config(_))));
    assert_eq!(sim.reserved_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_kill_mid_transfer_tears_down() {
    let sim = SimulatedLines::new();
    let controller = CoilController::start(InterlockConfig::default(), sim.clone()).unwrap();
    let interlock = controller.interlock();
    let _ = interlock.request_on().unwrap();

    // Inside the first transfer.
    sleep(Duration::from_millis(100)).await;
    controller.kill().await.unwrap();

    assert_eq!(interlock.heater(), HeaterState::Off);
    assert_eq!(sim.reserved_count(), 0);
    let conversions = sim.conversions();
    sleep(Duration::from_secs(3)).await;
    assert_eq!(sim.conversions(), conversions);
}

#[tokio::test(start_paused = true)]
async fn test_kill_with_clock_high_parks_sensor_lines() {
    let map = LineMap::default();
    let sim = SimulatedLines::with_map(map);
    let controller = CoilController::start(InterlockConfig::default(), sim.clone()).unwrap();

    // Bit 5 holds the clock high from 100 ms to 110 ms.
    sleep(Duration::from_millis(105)).await;
    assert_eq!(sim.level(map.clock), Level::High);
    assert_eq!(sim.level(map.chip_select), Level::Low);

    controller.kill().await.unwrap();

    assert_eq!(sim.level(map.clock), Level::Low);
    assert_eq!(sim.level(map.chip_select), Level::High);
    assert_eq!(sim.reserved_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_controller_forces_coil_off() {
    let sim = SimulatedLines::new();
    let controller = CoilController::start(InterlockConfig::default(), sim.clone()).unwrap();
    let interlock = controller.interlock();
    let _ = interlock.request_on().unwrap();

    drop(controller);

    assert_eq!(interlock.heater(), HeaterState::Off);
    assert_eq!(sim.heat_level(), Level::Low);
}

#[tokio::test(start_paused = true)]
async fn test_custom_pins_from_json() {
    let config = InterlockConfig::from_json_str(
        r#"{ "pins": { "chip_select": 8, "clock": 11, "data": 9, "heat": 17 } }"#,
    )
    .unwrap();
    let sim = SimulatedLines::with_map(config.pins);
    sim.hold_ticks(900);

    let controller = CoilController::start(config, sim.clone()).unwrap();
    sleep(Duration::from_millis(500)).await;

    assert!(sim.is_reserved(17));
    assert!(!sim.is_reserved(6));
    assert_eq!(controller.snapshot().reading.ticks(), 900);
    controller.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unattended_coil_is_cut_at_hard_limit() {
    // The modelled coil starts at ambient and heats while energised.
    let sim = SimulatedLines::new();
    let controller = CoilController::start(InterlockConfig::default(), sim.clone()).unwrap();
    sleep(Duration::from_millis(500)).await;

    let status = controller.surface().open(Channel::Status);
    assert!(!status.write(b"1").unwrap().transition.is_some_and(|t| t.is_refused()));

    sleep(Duration::from_secs(120)).await;

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.heater, HeaterState::Off);
    assert_eq!(snapshot.breaches, 1);
    assert_eq!(status.read().as_str(), "0\n");
    assert_eq!(sim.heat_on_edges(), 1);
    assert!(sim.coil_temperature().ticks() < 2662);

    status.release().unwrap();
    let report = controller.shutdown().await.unwrap();
    assert_eq!(report.trips, 1);
}
