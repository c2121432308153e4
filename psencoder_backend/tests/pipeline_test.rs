use pscompiler_backend::*;
use psencoder_backend::*;

fn reference_experiment() -> Experiment {
    let mut exp = Experiment::new("pb0", 1e-7).unwrap();
    exp.add_ao_device("ao_card", ClockLine::Fast).unwrap();
    exp.add_ao_channel("ao_card", 0, 0.).unwrap();
    exp.add_do_device("do_card", ClockLine::Slow).unwrap();
    exp.add_do_channel("do_card", 0, 0, 0.).unwrap();

    exp.constant("ao_card", "ao0", 0., 0.).unwrap();
    exp.wait("trigger", 1e-3, None).unwrap();
    exp.linramp("ao_card", "ao0", 1e-3, 1e-3, 0., 1., 1e6).unwrap();
    exp.constant("ao_card", "ao0", 2e-3, 0.).unwrap();
    exp.high("do_card", "port0/line0", 1e-3, 1e-3).unwrap();
    exp
}

fn encoders(v_max: f64) -> Vec<Box<dyn DeviceEncoder>> {
    vec![
        Box::new(PulseGenerator::new("pb0", 100e6).unwrap()),
        Box::new(AnalogCard::new("ao_card", -v_max, v_max, 16, 10_000).unwrap()),
        Box::new(DigitalCard::new("do_card", 8, 10_000).unwrap()),
    ]
}

#[test]
fn full_pipeline() {
    let mut store = MemoryStore::new();
    let compiled = compile_and_encode(&reference_experiment(), Some(3e-3), &encoders(10.), &mut store).unwrap();
    assert_eq!(compiled.program.num_waits(), 1);
    assert_eq!(store.names(), vec!["pb0", "ao_card", "do_card"]);

    let pb = store.get("pb0").unwrap();
    // Five clock records and the stop instruction
    assert_eq!(pb.get("instructions").map(Dataset::len), Some(6));
    assert!(pb.get("raw/ao0").is_none());

    let ao = store.get("ao_card").unwrap();
    assert_eq!(ao.get("ao0").map(Dataset::len), Some(1002));
    assert_eq!(ao.get("raw/ao0").map(Dataset::len), Some(1002));

    let digital = store.get("do_card").unwrap();
    assert_eq!(
        digital.get("port0"),
        Some(&Dataset::Words(ndarray::array![0, 1, 0]))
    );
    assert_eq!(
        digital.get("raw/port0/line0"),
        Some(&Dataset::Float(ndarray::array![0., 1., 0.]))
    );
}

#[test]
fn artifacts_are_deterministic() {
    let exp = reference_experiment();
    let run = || {
        let mut store = MemoryStore::new();
        compile_and_encode(&exp, Some(3e-3), &encoders(10.), &mut store).unwrap();
        store
            .names()
            .iter()
            .map(|name| serde_json::to_string(store.get(name).unwrap()).unwrap())
            .collect::<Vec<String>>()
    };
    assert_eq!(run(), run());
}

#[test]
fn board_name_collision() {
    // Two devices of the same name never make it into one experiment
    let mut exp = Experiment::new("pb0", 1e-7).unwrap();
    exp.add_ao_device("board1", ClockLine::Fast).unwrap();
    assert!(matches!(
        exp.add_do_device("board1", ClockLine::Slow),
        Err(CompileError::NamespaceCollision { .. })
    ));
    exp.add_ao_channel("board1", 0, 0.).unwrap();
    exp.constant("board1", "ao0", 1e-3, 1.).unwrap();

    // Nor into one artifact store
    let encoders: Vec<Box<dyn DeviceEncoder>> = vec![
        Box::new(AnalogCard::new("board1", -10., 10., 16, 100).unwrap()),
        Box::new(AnalogCard::new("board1", -5., 5., 12, 100).unwrap()),
    ];
    let mut store = MemoryStore::new();
    match compile_and_encode(&exp, None, &encoders, &mut store) {
        Err(CompileError::NamespaceCollision { name }) => assert_eq!(name, "board1"),
        other => panic!("unexpected result {other:?}"),
    }
    assert!(store.is_empty());
}

#[test]
fn failed_device_commits_nothing() {
    let mut store = MemoryStore::new();
    // The ramp reaches 1 V, beyond a 0.5 V range. The pulse generator alone would succeed
    match compile_and_encode(&reference_experiment(), Some(3e-3), &encoders(0.5), &mut store) {
        Err(CompileError::DeviceLimit { device, .. }) => assert_eq!(device, "ao_card"),
        other => panic!("unexpected result {other:?}"),
    }
    assert!(store.is_empty());
}

#[test]
fn encoder_device_mismatch() {
    let compiled = reference_experiment().compile(Some(3e-3)).unwrap();
    let mut store = MemoryStore::new();

    let unknown: Vec<Box<dyn DeviceEncoder>> =
        vec![Box::new(AnalogCard::new("ao_card2", -10., 10., 16, 10_000).unwrap())];
    assert!(matches!(
        encode_all(&compiled, &unknown, &mut store),
        Err(CompileError::UnknownDevice { .. })
    ));

    let wrong_kind: Vec<Box<dyn DeviceEncoder>> = vec![Box::new(DigitalCard::new("ao_card", 8, 10_000).unwrap())];
    assert!(matches!(
        encode_all(&compiled, &wrong_kind, &mut store),
        Err(CompileError::WrongKind { .. })
    ));
    assert!(store.is_empty());
}
