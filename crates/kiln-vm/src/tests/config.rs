use crate::config::VmConfig;

#[test]
fn test_partial_config_takes_defaults() {
    let config: VmConfig = serde_json::from_str(r#"{ "max_call_depth": 8 }"#).unwrap();
    assert_eq!(config.max_call_depth, 8);
    assert_eq!(config.registry_limit, None);
    assert_eq!(config.max_list_capacity, None);
}

#[test]
fn test_config_serializes_limits() {
    let config = VmConfig {
        registry_limit: Some(64),
        ..VmConfig::default()
    };
    let json = serde_json::to_value(&config).unwrap();
    assert_eq!(json["registry_limit"], 64);
    assert_eq!(json["max_call_depth"], 1024);
    assert!(json["max_list_capacity"].is_null());
}

#[test]
fn test_registry_limit_applies_to_instance() {
    use crate::context::Instance;
    use kiln_types::sync::Arc;
    use kiln_types::ByteBuffer;

    let instance = Instance::new(VmConfig {
        registry_limit: Some(1),
        ..VmConfig::default()
    });
    let registry = instance.registry();
    let _held = registry
        .register_ref(Arc::new(ByteBuffer::from(&b"a"[..])))
        .unwrap();
    assert!(registry
        .register_ref(Arc::new(ByteBuffer::from(&b"b"[..])))
        .is_err());
}
