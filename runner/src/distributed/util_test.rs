use super::util::{host_identity, host_key};

#[test]
pub fn host_key_is_stable() {
    assert_eq!(host_key("andes154.olcf.ornl.gov"), host_key("andes154.olcf.ornl.gov"));
    // blake3 of the empty input starts with af 13 49 b9 f5 f9 a1 a6
    assert_eq!(host_key(""), 0xa6a1_f9f5_b949_13af);
}

#[test]
pub fn host_key_separates_naming_schemes() {
    assert_ne!(host_key("andes12"), host_key("login12"));
    assert_ne!(host_key("node1-2"), host_key("node12"));
}

#[test]
pub fn processor_name_is_part_of_identity() {
    let identity = host_identity(Some("frontier07".to_string()));

    assert!(identity.ends_with("frontier07"));
}
