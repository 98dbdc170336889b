use super::*;
use crate::device::XTouchMini;
use crate::midi::MidiMessage;
use crate::target::memory::SimulatedCore;
use crate::transport::memory::{MemoryPort, MemoryTransport};
use serde_json::json;

const DEMO_YAML: &str = r#"
device_name: X-TOUCH MINI
mappings:
  - [button, 8, Camera, AllowMultiROI]
  - [button, 9, Camera, Binning]
  - [control_change, 2, Camera, Gain]
  - [control_change, 3, Camera, TestProperty5]
  - message_type: note_on
    control_id: 10
    core_method: snap
"#;

fn open_rig() -> (MemoryPort, MidiDevice, Arc<SimulatedCore>, Arc<dyn TargetSystem>) {
    let transport = MemoryTransport::new();
    let port = transport.add_port(XTouchMini::DEVICE_NAME);
    let device = XTouchMini::open(&transport).unwrap().into_inner();
    let core = Arc::new(SimulatedCore::demo());
    let target: Arc<dyn TargetSystem> = core.clone();
    (port, device, core, target)
}

#[test]
fn test_parse_yaml() {
    let map = DeviceMap::from_yaml_str(DEMO_YAML).unwrap();

    assert_eq!(map.device_name, "X-TOUCH MINI");
    assert_eq!(map.mappings.len(), 5);

    let first = &map.mappings[0];
    assert_eq!(first.message_type(), MessageKind::NoteOn);
    assert_eq!(first.control_id(), 8);
    assert_eq!(first.device_label(), Some("Camera"));
    assert_eq!(first.property_name(), Some("AllowMultiROI"));
    assert_eq!(first.core_method_name(), None);

    let last = &map.mappings[4];
    assert_eq!(last.core_method_name(), Some("snap"));
    assert_eq!(last.target(), &MappingTarget::CoreMethod("snap".to_string()));
}

#[test]
fn test_parse_json() {
    let map = DeviceMap::from_json_str(
        r#"{
            "device_name": "X-TOUCH MINI",
            "mappings": [
                ["knob", 2, "Camera", "Exposure"],
                {"message_type": "slider", "control_id": 9, "core_method": "setAutoFocusOffset"},
                ["button", 11, null, null, "snap"]
            ]
        }"#,
    )
    .unwrap();

    let exposure = Mapping::property("control_change", 2, "Camera", "Exposure").unwrap();
    assert_eq!(map.mappings[0], exposure);
    assert_eq!(map.mappings[1].message_type(), MessageKind::ControlChange);
    assert_eq!(map.mappings[2], Mapping::core_method("note_on", 11, "snap").unwrap());
}

#[test]
fn test_yaml_round_trip() {
    let map = DeviceMap::from_yaml_str(DEMO_YAML).unwrap();
    let text = map.to_yaml_string().unwrap();
    assert!(text.contains("core_method: snap"), "{text}");
    assert_eq!(DeviceMap::from_yaml_str(&text).unwrap(), map);
}

#[test]
fn test_invalid_message_type() {
    let err = Mapping::property("pitchwheel", 1, "Camera", "Gain").unwrap_err();
    assert!(matches!(err, Error::InvalidMapping(_)));

    let yaml = "device_name: d\nmappings:\n  - [knob, 2, Camera, Gain]\n  - [pitchwheel, 1, Camera, Gain]\n";
    match DeviceMap::from_yaml_str(yaml).unwrap_err() {
        Error::InvalidMapping(msg) => {
            assert!(msg.contains("mapping #1"), "{msg}");
            assert!(msg.contains("pitchwheel"), "{msg}");
        }
        other => panic!("unexpected error: {other}"),
    }

    let json = r#"{"device_name": "d", "mappings": [{"message_type": "pitchwheel", "control_id": 1, "core_method": "snap"}]}"#;
    assert!(matches!(
        DeviceMap::from_json_str(json),
        Err(Error::InvalidMapping(_))
    ));
}

#[test]
fn test_object_field_type_error_is_reported() {
    let json = r#"{"device_name": "d", "mappings": [{"message_type": "knob", "control_id": "x", "core_method": "snap"}]}"#;
    match DeviceMap::from_json_str(json).unwrap_err() {
        Error::InvalidMapping(msg) => assert!(msg.contains("invalid type"), "{msg}"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_malformed_document_is_a_decode_error() {
    assert!(matches!(DeviceMap::from_json_str("{"), Err(Error::Json(_))));
    assert!(matches!(
        DeviceMap::from_yaml_str("device_name: d\nmappings: 3\n"),
        Err(Error::Yaml(_))
    ));
}

#[test]
fn test_target_must_be_complete() {
    assert!(matches!(
        Mapping::new("knob", 1, Some("Camera".into()), None, None),
        Err(Error::InvalidMapping(_))
    ));
    assert!(matches!(
        Mapping::new("knob", 1, None, None, None),
        Err(Error::InvalidMapping(_))
    ));
    assert!(matches!(
        DeviceMap::from_json_str(r#"{"device_name": "d", "mappings": [["knob", 1]]}"#),
        Err(Error::InvalidMapping(_))
    ));
}

#[test]
fn test_target_forms_are_exclusive() {
    let err = Mapping::new(
        "button",
        1,
        Some("Camera".into()),
        Some("Binning".into()),
        Some("snap".into()),
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidMapping(_)));
}

#[test]
fn test_control_id_range() {
    assert!(Mapping::property("knob", 128, "Camera", "Gain").is_err());
    for json in [
        r#"{"device_name": "d", "mappings": [["knob", 300, "Camera", "Gain"]]}"#,
        r#"{"device_name": "d", "mappings": [["knob", "2", "Camera", "Gain"]]}"#,
        r#"{"device_name": "d", "mappings": [{"message_type": "knob", "control_id": 200, "core_method": "snap"}]}"#,
    ] {
        assert!(matches!(DeviceMap::from_json_str(json), Err(Error::InvalidMapping(_))), "{json}");
    }
}

#[test]
fn test_unknown_fields_rejected() {
    let yaml = "device_name: d\nmappings:\n  - message_type: knob\n    control_id: 1\n    core_method: snap\n    speed: 3\n";
    match DeviceMap::from_yaml_str(yaml).unwrap_err() {
        Error::InvalidMapping(msg) => assert!(msg.contains("speed"), "{msg}"),
        other => panic!("unexpected error: {other}"),
    }

    let yaml = "device_name: d\nport: 2\nmappings: []\n";
    assert!(DeviceMap::from_yaml_str(yaml).is_err());
}

#[test]
fn test_from_file() {
    let dir = tempfile::tempdir().unwrap();

    let yaml_path = dir.path().join("map.yml");
    std::fs::write(&yaml_path, DEMO_YAML).unwrap();
    let from_yaml = DeviceMap::from_file(&yaml_path).unwrap();

    let json_path = dir.path().join("map.JSON");
    std::fs::write(&json_path, serde_json::to_string(&from_yaml).unwrap()).unwrap();
    assert_eq!(DeviceMap::from_file(&json_path).unwrap(), from_yaml);

    let toml_path = dir.path().join("map.toml");
    std::fs::write(&toml_path, "device_name = 'd'").unwrap();
    assert!(matches!(
        DeviceMap::from_file(&toml_path),
        Err(Error::UnsupportedFormat(p)) if p == toml_path
    ));

    assert!(matches!(
        DeviceMap::from_file(dir.path().join("missing.yaml")),
        Err(Error::Io(_))
    ));
}

#[test]
fn test_control_lookup() {
    let (_port, device, _core, _target) = open_rig();

    let knob = Mapping::property("knob", 2, "Camera", "Gain").unwrap();
    assert!(matches!(knob.control(&device).unwrap(), Control::Knob(k) if k.control() == 2));

    let button = Mapping::core_method("note_off", 23, "snap").unwrap();
    assert!(matches!(button.control(&device).unwrap(), Control::Button(b) if b.note() == 23));

    let missing = Mapping::property("knob", 40, "Camera", "Gain").unwrap();
    assert!(matches!(
        missing.control(&device),
        Err(Error::UnknownControl { kind: "knob", index: 40 })
    ));
}

#[test]
fn test_connect_full_map() {
    let (port, device, core, target) = open_rig();
    core.set_property("Camera", "AllowMultiROI", "1").unwrap();

    let map = DeviceMap::from_yaml_str(DEMO_YAML).unwrap();
    let disconnect = map.connect_to_core(&target, &device).unwrap();

    // AllowMultiROI is lit on connect
    assert!(port.take_sent().contains(&MidiMessage::NoteOn {
        channel: 10,
        note: 8,
        velocity: 64
    }));

    port.inject(MidiMessage::ControlChange { channel: 10, control: 2, value: 127 });
    assert_eq!(core.get_property("Camera", "Gain").unwrap(), "8");

    port.inject(MidiMessage::NoteOff { channel: 10, note: 9, velocity: 64 });
    assert_eq!(core.get_property("Camera", "Binning").unwrap(), "2");

    port.inject(MidiMessage::NoteOn { channel: 10, note: 10, velocity: 64 });
    assert_eq!(core.method_calls(), vec![("snap".to_string(), Vec::<serde_json::Value>::new())]);

    // Knob 3 maps a property without limits and stays unbound
    port.inject(MidiMessage::ControlChange { channel: 10, control: 3, value: 50 });
    assert_eq!(core.get_property("Camera", "TestProperty5").unwrap(), "0");

    disconnect.disconnect().unwrap();
    assert!(core.property_changed().is_empty());

    port.inject(MidiMessage::ControlChange { channel: 10, control: 2, value: 0 });
    port.inject(MidiMessage::NoteOff { channel: 10, note: 9, velocity: 64 });
    port.inject(MidiMessage::NoteOn { channel: 10, note: 10, velocity: 64 });
    assert_eq!(core.get_property("Camera", "Gain").unwrap(), "8");
    assert_eq!(core.get_property("Camera", "Binning").unwrap(), "2");
    assert_eq!(core.method_calls().len(), 1);
}

#[test]
fn test_failed_mapping_rolls_back() {
    let (port, device, core, target) = open_rig();
    let baseline = device.knobs()[2].changed().len();

    let map = DeviceMap::new(
        "X-TOUCH MINI",
        vec![
            Mapping::property("knob", 2, "Camera", "Gain").unwrap(),
            Mapping::property("button", 9, "Stage", "Speed").unwrap(),
        ],
    );

    let err = map.connect_to_core(&target, &device).unwrap_err();
    assert!(err.to_string().contains("No device with label \"Stage\""), "{err}");

    assert_eq!(device.knobs()[2].changed().len(), baseline);
    assert!(core.property_changed().is_empty());

    port.inject(MidiMessage::ControlChange { channel: 10, control: 2, value: 127 });
    assert_eq!(core.get_property("Camera", "Gain").unwrap(), "0");
}

#[test]
fn test_unknown_control_fails_connect() {
    let (_port, device, _core, target) = open_rig();
    let map = DeviceMap::new("X-TOUCH MINI", vec![Mapping::core_method("knob", 99, "snap").unwrap()]);
    assert!(matches!(
        map.connect_to_core(&target, &device),
        Err(Error::UnknownControl { kind: "knob", index: 99 })
    ));
}

#[test]
fn test_open_and_connect() {
    let transport = MemoryTransport::new();
    let port = transport.add_port(XTouchMini::DEVICE_NAME);
    let registry = DeviceRegistry::with_builtin();
    let core = Arc::new(SimulatedCore::demo());
    let target: Arc<dyn TargetSystem> = core.clone();

    let map = DeviceMap::from_yaml_str(DEMO_YAML).unwrap();
    let (device, disconnect) = map.open_and_connect(&registry, &transport, &target).unwrap();
    assert_eq!(device.name(), "X-TOUCH MINI");

    port.inject(MidiMessage::NoteOn { channel: 10, note: 10, velocity: 64 });
    assert_eq!(core.method_calls().len(), 1);

    disconnect.disconnect().unwrap();
    device.close();
    assert!(!port.is_input_open());

    let unknown = DeviceMap::new("Launchpad", Vec::new());
    assert!(matches!(
        unknown.open_and_connect(&registry, &transport, &target),
        Err(Error::UnknownDeviceModel { .. })
    ));
}

#[test]
fn test_open_and_connect_closes_on_failure() {
    let transport = MemoryTransport::new();
    let port = transport.add_port(XTouchMini::DEVICE_NAME);
    let registry = DeviceRegistry::with_builtin();
    let target: Arc<dyn TargetSystem> = Arc::new(SimulatedCore::new());

    let map = DeviceMap::from_yaml_str(DEMO_YAML).unwrap();
    assert!(map.open_and_connect(&registry, &transport, &target).is_err());
    assert!(!port.is_input_open());
    assert!(!port.is_output_open());
}

#[test]
fn test_core_method_with_knob_passes_value() {
    let (port, device, core, target) = open_rig();
    let mapping = Mapping::core_method("knob", 5, "setAutoFocusOffset").unwrap();
    let _handle = mapping.connect(&device, &target).unwrap();

    port.inject(MidiMessage::ControlChange { channel: 10, control: 5, value: 42 });
    assert_eq!(
        core.method_calls(),
        vec![("setAutoFocusOffset".to_string(), vec![json!(42)])]
    );
}
