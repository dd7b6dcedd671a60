use heatcoil::config::SamplingTiming;
use heatcoil::lines::{Level, LineMap, Lines};
use heatcoil::sensor::SensorLink;
use heatcoil::*;
use tokio::time::Instant;

fn link_with_sim() -> (SensorLink, SimulatedLines, LineMap) {
    let map = LineMap::default();
    let sim = SimulatedLines::with_map(map);
    let lines = Lines::acquire(sim.clone(), map).unwrap();
    (SensorLink::new(lines, SamplingTiming::default()), sim, map)
}

#[tokio::test(start_paused = true)]
async fn test_sample_decodes_reading_bits() {
    let (mut link, sim, _) = link_with_sim();
    // 2000 ticks with the open-input and id bits set.
    sim.push_frame((2000 << 3) | 0b110);

    let reading = link.sample().await.unwrap();

    assert_eq!(reading.ticks(), 2000);
    assert_eq!(sim.conversions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_read_frame_returns_raw_word() {
    let (mut link, sim, _) = link_with_sim();
    sim.push_frame(0x7FFC);

    let frame = link.read_frame().await.unwrap();

    assert_eq!(frame.raw(), 0x7FFC);
    assert_eq!(frame.reading().ticks(), 0x0FFF);
    assert!(frame.open_input());
}

#[tokio::test(start_paused = true)]
async fn test_reading_never_exceeds_sensor_range() {
    let (mut link, sim, _) = link_with_sim();
    for raw in [0xFFFF, 0x8000, 0x0007, 0x0000] {
        sim.push_frame(raw);
        let reading = link.sample().await.unwrap();
        assert!(reading.ticks() <= 4095, "raw {raw:#06x} gave {}", reading.ticks());
    }
}

#[tokio::test(start_paused = true)]
async fn test_lines_idle_after_transfer() {
    let (mut link, sim, map) = link_with_sim();
    sim.hold_ticks(1234);

    assert_eq!(link.sample().await.unwrap().ticks(), 1234);

    assert_eq!(sim.level(map.chip_select), Level::High);
    assert_eq!(sim.level(map.clock), Level::Low);
    assert_eq!(sim.heat_level(), Level::Low);
}

#[tokio::test(start_paused = true)]
async fn test_transfer_respects_half_bit_window() {
    let (mut link, sim, _) = link_with_sim();
    sim.hold_ticks(100);
    let timing = link.timing();

    let started = Instant::now();
    link.sample().await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= timing.half_bit() * 32);
    assert!(elapsed <= timing.worst_case_sample());
}

#[tokio::test(start_paused = true)]
async fn test_successive_samples_follow_the_sensor() {
    let (mut link, sim, _) = link_with_sim();

    sim.hold_ticks(500);
    assert_eq!(link.sample().await.unwrap().ticks(), 500);
    sim.hold_ticks(2700);
    assert_eq!(link.sample().await.unwrap().ticks(), 2700);
    assert_eq!(sim.conversions(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_data_line_fault_fails_transfer_and_deselects() {
    let (mut link, sim, map) = link_with_sim();
    sim.inject_fault(map.data);

    let result = link.sample().await;

    assert!(matches!(result, Err(InterlockError::LineIo { .. })));
    assert_eq!(sim.level(map.chip_select), Level::High);
    assert_eq!(sim.level(map.clock), Level::Low);
}

#[tokio::test(start_paused = true)]
async fn test_link_recovers_after_fault_clears() {
    let (mut link, sim, map) = link_with_sim();
    sim.hold_ticks(800);
    sim.inject_fault(map.data);
    assert!(link.sample().await.is_err());

    sim.clear_fault(map.data);
    assert_eq!(link.sample().await.unwrap().ticks(), 800);
}
