// Smart-layer trigger selection, driven through the Stabilization driver
use std::io::Cursor;

use lapse_rs::gcode::GcodePositionSource;
use lapse_rs::{
    Position, PositionConfig, PositionSource, PositionType, SmartLayerConfig, SourceError, Stabilization, StabilizationConfig,
    StabilizationResults, TriggerType,
};

/// Feeds prepared Position records, one "byte" per record.
struct VecSource {
    positions: Vec<Position>,
    next: usize,
}

impl VecSource {
    fn new(mut positions: Vec<Position>) -> Self {
        for (i, position) in positions.iter_mut().enumerate() {
            position.line_number = i as u64 + 1;
            position.gcode_number = i as u64 + 1;
        }
        Self { positions, next: 0 }
    }
}

impl PositionSource for VecSource {
    fn total_size(&mut self) -> Result<u64, SourceError> {
        Ok(self.positions.len() as u64)
    }

    fn next_position(&mut self) -> Result<Option<Position>, SourceError> {
        let position = self.positions.get(self.next).cloned();
        if position.is_some() {
            self.next += 1;
        }
        Ok(position)
    }

    fn bytes_read(&self) -> u64 {
        self.next as u64
    }

    fn lines_read(&self) -> u64 {
        self.next as u64
    }
}

fn layer_start(layer: u32) -> Position {
    Position {
        layer,
        height: layer as f64 * 0.2,
        z: layer as f64 * 0.2,
        is_layer_change: true,
        ..Default::default()
    }
}

fn extrude(x: f64, y: f64, f: f64) -> Position {
    Position { x, y, f, is_extruding: true, has_xy_changed: true, extrusion_length: 0.1, ..Default::default() }
}

fn retracted_travel(x: f64, y: f64) -> Position {
    Position {
        x,
        y,
        f: 9000.0,
        is_travel: true,
        is_retracted: true,
        retraction_length: 1.0,
        has_xy_changed: true,
        ..Default::default()
    }
}

fn travel(x: f64, y: f64) -> Position {
    Position { x, y, f: 9000.0, is_travel: true, has_xy_changed: true, ..Default::default() }
}

fn idle() -> Position {
    Position::default()
}

fn target() -> StabilizationConfig {
    StabilizationConfig { x: 100.0, y: 100.0, notification_period_seconds: 0.0, ..Default::default() }
}

fn run(stabilization: StabilizationConfig, smart_layer: SmartLayerConfig, positions: Vec<Position>) -> StabilizationResults {
    let mut source = VecSource::new(positions);
    Stabilization::from_config(stabilization, smart_layer).process(&mut source).unwrap()
}

#[test]
fn test_single_extrusion_uses_detected_point() {
    let results = run(target(), SmartLayerConfig::default(), vec![layer_start(1), extrude(103.0, 104.0, 1200.0)]);
    assert_eq!(results.snapshot_plans.len(), 1);
    let plan = &results.snapshot_plans[0];
    assert_eq!(plan.snapshot_coordinate(), Some((103.0, 104.0)));
    assert_eq!(plan.line_number, 2);
    assert_eq!(plan.layer, 1);
    assert_eq!(plan.position_type, PositionType::Extrusion);
    assert!((plan.distance_from_target - 5.0).abs() < 1e-9);
}

#[test]
fn test_gcode_ending_on_layer_change() {
    let run_gcode = |gcode: &str| {
        let bytes = gcode.as_bytes().to_vec();
        let size = bytes.len() as u64;
        let mut source = GcodePositionSource::from_reader(Cursor::new(bytes), size, PositionConfig::default());
        Stabilization::from_config(target(), SmartLayerConfig::default()).process(&mut source).unwrap()
    };

    let results = run_gcode("M83\nG1 Z0.2 F1200\nG1 X103 Y104 E1\n");
    assert_eq!(results.snapshot_plans.len(), 1);
    assert_eq!(results.snapshot_plans[0].line_number, 3);
    assert_eq!(results.snapshot_plans[0].snapshot_coordinate(), Some((103.0, 104.0)));

    let results = run_gcode("M83\nG1 Z0.2 F1200\nG1 X103 Y104 E1\nG1 X90 Y90 E1\nG1 Z0.4\nG1 X101 Y100 E1\n");
    let layers: Vec<_> = results.snapshot_plans.iter().map(|p| (p.layer, p.line_number)).collect();
    assert_eq!(layers, vec![(1, 3), (2, 6)]);
}

#[test]
fn test_retracted_travel_fallback() {
    let results = run(
        target(),
        SmartLayerConfig::default(),
        vec![
            layer_start(1),
            retracted_travel(110.0, 100.0),
            retracted_travel(96.0, 97.0),
            retracted_travel(130.0, 130.0),
        ],
    );
    assert_eq!(results.snapshot_plans.len(), 1);
    let plan = &results.snapshot_plans[0];
    assert_eq!(plan.position_type, PositionType::RetractedTravel);
    assert_eq!(plan.snapshot_coordinate(), Some((96.0, 97.0)));
    assert_eq!(plan.line_number, 3);
}

#[test]
fn test_closest_extrusion_wins() {
    let results = run(
        target(),
        SmartLayerConfig::default(),
        vec![
            layer_start(1),
            extrude(105.0, 100.0, 1200.0),
            extrude(100.0, 103.0, 1200.0),
            extrude(90.0, 90.0, 1200.0),
        ],
    );
    assert_eq!(results.snapshot_plans.len(), 1);
    assert_eq!(results.snapshot_plans[0].snapshot_coordinate(), Some((100.0, 103.0)));
    assert!((results.snapshot_plans[0].distance_from_target - 3.0).abs() < 1e-9);
}

#[test]
fn test_layer_without_candidates_emits_nothing() {
    let results = run(
        target(),
        SmartLayerConfig::default(),
        vec![
            layer_start(1),
            idle(),
            travel(101.0, 100.0),
            layer_start(2),
            extrude(101.0, 100.0, 1200.0),
            idle(),
        ],
    );
    assert!(!results.is_partial());
    assert_eq!(results.snapshot_plans.len(), 1);
    assert_eq!(results.snapshot_plans[0].layer, 2);
    assert_eq!(results.snapshot_plans[0].line_number, 5);
}

#[test]
fn test_moves_before_first_layer_are_ignored() {
    let results = run(
        target(),
        SmartLayerConfig::default(),
        vec![extrude(100.0, 100.0, 1200.0), retracted_travel(100.0, 100.0), idle()],
    );
    assert!(results.snapshot_plans.is_empty());
}

#[test]
fn test_distance_tie_break() {
    let positions = vec![layer_start(1), extrude(103.0, 104.0, 1200.0), extrude(97.0, 96.0, 3000.0)];

    let first = run(target(), SmartLayerConfig::default(), positions.clone());
    assert_eq!(first.snapshot_plans[0].line_number, 2);
    assert_eq!(first.snapshot_plans[0].triggering_position.x, 103.0);

    let fastest = SmartLayerConfig { snap_to_fastest: true, ..Default::default() };
    let snapped = run(target(), fastest, positions);
    assert_eq!(snapped.snapshot_plans[0].line_number, 3);
    assert_eq!(snapped.snapshot_plans[0].triggering_position.f, 3000.0);
}

#[test]
fn test_speed_threshold_filters_extrusions() {
    let positions = vec![
        layer_start(1),
        extrude(100.0, 101.0, 600.0),
        extrude(100.0, 103.0, 1500.0),
        extrude(100.0, 100.5, 2500.0),
    ];

    let limited = SmartLayerConfig { speed_threshold: 1000.0, max_speed_threshold: 2000.0, ..Default::default() };
    let results = run(target(), limited, positions.clone());
    let plan = &results.snapshot_plans[0];
    assert_eq!(plan.triggering_position.f, 1500.0);
    assert_eq!(plan.triggering_position.y, 103.0);

    let unlimited = run(target(), SmartLayerConfig::default(), positions);
    assert_eq!(unlimited.snapshot_plans[0].triggering_position.y, 100.5);
}

#[test]
fn test_filtered_extrusions_fall_back_to_retracted_travel() {
    let slow_only = SmartLayerConfig { speed_threshold: 2000.0, ..Default::default() };
    let results = run(
        target(),
        slow_only,
        vec![layer_start(1), extrude(100.0, 100.0, 1200.0), retracted_travel(120.0, 100.0)],
    );
    assert_eq!(results.snapshot_plans[0].position_type, PositionType::RetractedTravel);
    assert_eq!(results.snapshot_plans[0].snapshot_coordinate(), Some((120.0, 100.0)));
}

#[test]
fn test_multiple_speeds_use_fixed_target() {
    let mixed = vec![layer_start(1), extrude(103.0, 104.0, 1200.0), extrude(110.0, 110.0, 1800.0)];
    let results = run(target(), SmartLayerConfig::default(), mixed.clone());
    assert_eq!(results.snapshot_plans[0].snapshot_coordinate(), Some((100.0, 100.0)));
    assert_eq!(results.snapshot_plans[0].return_position.x, 103.0);

    let x_disabled = StabilizationConfig { x_disabled: true, ..target() };
    let results = run(x_disabled, SmartLayerConfig::default(), mixed);
    assert_eq!(results.snapshot_plans[0].snapshot_coordinate(), Some((103.0, 100.0)));

    let single = vec![layer_start(1), extrude(103.0, 104.0, 1200.0), extrude(110.0, 110.0, 1200.0)];
    let results = run(target(), SmartLayerConfig::default(), single);
    assert_eq!(results.snapshot_plans[0].snapshot_coordinate(), Some((103.0, 104.0)));
}

#[test]
fn test_speed_statistics_reset_per_layer() {
    let results = run(
        target(),
        SmartLayerConfig::default(),
        vec![
            layer_start(1),
            extrude(103.0, 104.0, 1200.0),
            extrude(110.0, 110.0, 3000.0),
            layer_start(2),
            extrude(99.0, 98.0, 1800.0),
            idle(),
        ],
    );
    assert_eq!(results.snapshot_plans.len(), 2);
    assert_eq!(results.snapshot_plans[0].snapshot_coordinate(), Some((100.0, 100.0)));
    assert_eq!(results.snapshot_plans[1].snapshot_coordinate(), Some((99.0, 98.0)));
}

#[test]
fn test_trigger_type_preferences() {
    let positions = vec![
        layer_start(1),
        extrude(104.0, 100.0, 1200.0),
        travel(100.0, 100.0),
        retracted_travel(101.0, 100.0),
    ];

    let pick = |trigger_type| {
        let config = SmartLayerConfig { trigger_type, ..Default::default() };
        let results = run(target(), config, positions.clone());
        results.snapshot_plans[0].position_type
    };
    assert_eq!(pick(TriggerType::Compatibility), PositionType::Extrusion);
    assert_eq!(pick(TriggerType::Fast), PositionType::Extrusion);
    assert_eq!(pick(TriggerType::NormalQuality), PositionType::RetractedTravel);
    assert_eq!(pick(TriggerType::HighQuality), PositionType::RetractedTravel);

    let travel_only = vec![layer_start(1), travel(100.0, 100.0), idle()];
    let fast = SmartLayerConfig { trigger_type: TriggerType::Fast, ..Default::default() };
    let results = run(target(), fast, travel_only.clone());
    assert_eq!(results.snapshot_plans[0].position_type, PositionType::Travel);
    let results = run(target(), SmartLayerConfig::default(), travel_only);
    assert!(results.snapshot_plans.is_empty());
}

#[test]
fn test_plans_ordered_and_bounded_by_layer_changes() {
    let mut positions = Vec::new();
    for layer in 1..=20u32 {
        positions.push(layer_start(layer));
        // Every third layer has nothing to offer
        if layer % 3 != 0 {
            positions.push(extrude(90.0 + layer as f64, 100.0, 1200.0));
            positions.push(retracted_travel(100.0, 80.0));
        } else {
            positions.push(idle());
        }
    }
    let layer_changes = positions.iter().filter(|p| p.is_layer_change).count();
    let results = run(target(), SmartLayerConfig::default(), positions);

    assert!(results.snapshot_plans.len() <= layer_changes);
    assert_eq!(results.snapshot_plans.len(), 14);
    assert!(results.snapshot_plans.windows(2).all(|w| w[0].line_number < w[1].line_number));
    assert!(results.snapshot_plans.iter().all(|p| p.layer % 3 != 0));
}

#[test]
fn test_identical_runs_give_identical_plans() {
    let positions = vec![
        layer_start(1),
        extrude(103.0, 104.0, 1200.0),
        retracted_travel(96.0, 97.0),
        layer_start(2),
        extrude(100.0, 99.0, 1200.0),
        idle(),
    ];
    let a = run(target(), SmartLayerConfig::default(), positions.clone());
    let b = run(target(), SmartLayerConfig::default(), positions);
    assert_eq!(a.snapshot_plans, b.snapshot_plans);
    assert_eq!(
        serde_json::to_string(&a.snapshot_plans).unwrap(),
        serde_json::to_string(&b.snapshot_plans).unwrap()
    );
    assert_eq!((a.lines_processed, a.gcodes_processed), (b.lines_processed, b.gcodes_processed));
}

#[test]
fn test_height_increment_merges_layers() {
    // 0.2mm layers bucketed by 0.6mm: windows open on layers 1, 4 and 7
    let mut positions = Vec::new();
    for layer in 1..=8u32 {
        positions.push(layer_start(layer));
        let offset = if layer == 2 || layer == 6 { 1.0 } else { 5.0 };
        positions.push(Position { layer, ..extrude(100.0 + offset, 100.0, 1200.0) });
    }
    let increment = StabilizationConfig { height_increment: 0.6, ..target() };
    let results = run(increment, SmartLayerConfig::default(), positions);

    let layers: Vec<_> = results.snapshot_plans.iter().map(|p| p.layer).collect();
    assert_eq!(layers, vec![1, 4, 7]);
    // Layer changes inside a bucket keep the window open
    assert_eq!(results.snapshot_plans[0].triggering_position.layer, 2);
    assert_eq!(results.snapshot_plans[1].triggering_position.layer, 6);
    assert_eq!(results.snapshot_plans[2].triggering_position.layer, 7);

    let every_layer = run(target(), SmartLayerConfig::default(), {
        let mut positions = Vec::new();
        for layer in 1..=8u32 {
            positions.push(layer_start(layer));
            positions.push(extrude(105.0, 100.0, 1200.0));
        }
        positions
    });
    assert_eq!(every_layer.snapshot_plans.len(), 8);
}

#[test]
fn test_layers_within_first_increment_share_one_window() {
    let positions = vec![layer_start(1), extrude(105.0, 100.0, 1200.0), layer_start(2), extrude(102.0, 100.0, 1200.0)];
    let increment = StabilizationConfig { height_increment: 1.0, ..target() };
    let results = run(increment, SmartLayerConfig::default(), positions);
    assert_eq!(results.snapshot_plans.len(), 1);
    assert_eq!(results.snapshot_plans[0].line_number, 4);
}
