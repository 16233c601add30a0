use crate::HalModuleFlags;

#[test]
fn test_flags_from_json() {
    let flags: HalModuleFlags = serde_json::from_str(r#""SYNCHRONOUS""#).unwrap();
    assert!(flags.contains(HalModuleFlags::SYNCHRONOUS));
    assert_eq!(HalModuleFlags::default(), HalModuleFlags::empty());
    assert_eq!(serde_json::to_string(&HalModuleFlags::empty()).unwrap(), r#""""#);
}
