use hive_relay::slack::routing::{
    find_inline_mention, parse_channel_topic, parse_instance_prefix, ThreadOwnerMap,
    ROUNDTABLE_OWNER,
};

fn known() -> Vec<String> {
    vec!["alpha".to_owned(), "beta".to_owned()]
}

#[test]
fn colon_prefix_routes_explicitly() {
    let (instance, rest, explicit) = parse_instance_prefix("alpha: hi", &known(), "alpha");
    assert_eq!(instance, "alpha");
    assert_eq!(rest, "hi");
    assert!(explicit);
}

#[test]
fn no_prefix_applies_default() {
    let (instance, rest, explicit) = parse_instance_prefix("hi", &known(), "alpha");
    assert_eq!(instance, "alpha");
    assert_eq!(rest, "hi");
    assert!(!explicit);
}

#[test]
fn colon_prefix_is_case_insensitive() {
    let (instance, rest, explicit) = parse_instance_prefix("Beta: check this", &known(), "alpha");
    assert_eq!(instance, "beta");
    assert_eq!(rest, "check this");
    assert!(explicit);
}

#[test]
fn at_prefix_routes_explicitly() {
    let (instance, rest, explicit) = parse_instance_prefix("@beta what do you think", &known(), "alpha");
    assert_eq!(instance, "beta");
    assert_eq!(rest, "what do you think");
    assert!(explicit);
}

#[test]
fn greeting_prefix_routes_explicitly() {
    let (instance, rest, explicit) = parse_instance_prefix("hey beta, got a minute", &known(), "alpha");
    assert_eq!(instance, "beta");
    assert_eq!(rest, "got a minute");
    assert!(explicit);

    let (instance, _, explicit) = parse_instance_prefix("Hi Alpha, hello", &known(), "beta");
    assert_eq!(instance, "alpha");
    assert!(explicit);
}

#[test]
fn unknown_name_prefix_falls_through_to_default() {
    let (instance, rest, explicit) = parse_instance_prefix("note: buy milk", &known(), "alpha");
    assert_eq!(instance, "alpha");
    assert_eq!(rest, "buy milk");
    assert!(!explicit);
}

#[test]
fn inline_mention_found_mid_sentence() {
    assert_eq!(
        find_inline_mention("what does @beta think?", &known()),
        Some("beta".to_owned())
    );
    assert_eq!(find_inline_mention("no address here", &known()), None);
}

#[test]
fn topic_directives_parse() {
    let config = parse_channel_topic(
        "Team planning [instance:alpha] please behave [default:beta]",
        &known(),
    );
    assert_eq!(config.instance.as_deref(), Some("alpha"));
    assert_eq!(config.default.as_deref(), Some("beta"));
    assert_eq!(config.mode, None);
}

#[test]
fn topic_roundtable_mode_parses() {
    let config = parse_channel_topic("[mode:roundtable]", &known());
    assert_eq!(config.mode.as_deref(), Some("roundtable"));
}

#[test]
fn topic_unknown_instance_ignored() {
    let config = parse_channel_topic("[instance:gamma]", &known());
    assert_eq!(config.instance, None);
}

#[test]
fn owner_map_set_and_get() {
    let owners = ThreadOwnerMap::new(100);
    owners.set("C1:1.0", "alpha");
    assert_eq!(owners.get("C1:1.0").as_deref(), Some("alpha"));
    assert_eq!(owners.get("C1:2.0"), None);
}

#[test]
fn owner_map_overwrites_on_readdress() {
    let owners = ThreadOwnerMap::new(100);
    owners.set("C1:1.0", "alpha");
    owners.set("C1:1.0", ROUNDTABLE_OWNER);
    assert_eq!(owners.get("C1:1.0").as_deref(), Some(ROUNDTABLE_OWNER));
    assert_eq!(owners.len(), 1);
}

#[test]
fn owner_map_evicts_oldest_beyond_capacity() {
    let owners = ThreadOwnerMap::new(3);
    for i in 0..5 {
        owners.set(&format!("C1:{i}"), "alpha");
    }
    assert_eq!(owners.len(), 3);
    assert_eq!(owners.get("C1:0"), None);
    assert_eq!(owners.get("C1:1"), None);
    assert_eq!(owners.get("C1:4").as_deref(), Some("alpha"));
}

#[test]
fn owner_map_eviction_skips_refreshed_entries() {
    let owners = ThreadOwnerMap::new(2);
    owners.set("a", "alpha");
    owners.set("b", "alpha");
    owners.set("a", "beta"); // refresh a; stale queue entry for a remains
    owners.set("c", "alpha"); // must evict b, not a
    assert_eq!(owners.get("a").as_deref(), Some("beta"));
    assert_eq!(owners.get("b"), None);
    assert_eq!(owners.get("c").as_deref(), Some("alpha"));
}
