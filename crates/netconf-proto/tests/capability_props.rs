//! Property tests for the capability model.

#![allow(clippy::unwrap_used)]

use netconf_proto::{
    Capability, CapabilitySet, ExiCapability, ExiSchemaMode, FramingMode, OtherCapability,
    ProtocolCapability, YangModuleCapability,
};
use proptest::prelude::*;
use strum::IntoEnumIterator;

fn protocol_strategy() -> impl Strategy<Value = ProtocolCapability> {
    prop::sample::select(ProtocolCapability::iter().collect::<Vec<_>>())
}

fn module_strategy() -> impl Strategy<Value = YangModuleCapability> {
    let name = "[a-z][a-z0-9-]{0,12}";
    (
        prop_oneof!["urn:example:[a-z]{1,8}", "http://example\\.com/ns/[a-z]{1,8}"],
        name,
        prop::option::of("20[0-9]{2}-[01][0-9]-[0-3][0-9]"),
        prop::collection::vec(name, 0..4),
        prop::collection::vec(name, 0..3),
    )
        .prop_map(|(namespace, module, revision, features, deviations)| {
            let mut cap = YangModuleCapability::new(namespace, module).unwrap();
            if let Some(revision) = revision {
                cap = cap.with_revision(revision).unwrap();
            }
            cap.with_features(features)
                .unwrap()
                .with_deviations(deviations)
                .unwrap()
        })
}

fn exi_strategy() -> impl Strategy<Value = ExiCapability> {
    (
        prop::option::of(any::<u32>()),
        prop::option::of(prop::sample::select(vec![
            ExiSchemaMode::Builtin,
            ExiSchemaMode::Base11,
            ExiSchemaMode::Dynamic,
        ])),
    )
        .prop_map(|(compression, schemas)| ExiCapability {
            compression,
            schemas,
        })
}

fn capability_strategy() -> impl Strategy<Value = Capability> {
    prop_oneof![
        protocol_strategy().prop_map(Capability::Protocol),
        module_strategy().prop_map(Capability::YangModule),
        exi_strategy().prop_map(Capability::Exi),
        "http://vendor\\.example/cap/[a-z]{1,10}"
            .prop_map(|uri| Capability::Other(OtherCapability::new(uri).unwrap())),
    ]
}

/// Query strings built from known and unknown keys in any order, with
/// values that may be empty or contain delimiters.
fn advertised_uri_strategy() -> impl Strategy<Value = String> {
    let key = prop::sample::select(vec![
        "module",
        "revision",
        "features",
        "deviations",
        "compression",
        "schemas",
        "x",
    ]);
    (
        prop_oneof![
            Just("urn:ietf:params:netconf:capability:exi:1.0".to_owned()),
            Just("urn:ietf:params:netconf:base:1.0".to_owned()),
            "urn:example:[a-z]{1,6}",
        ],
        prop::collection::vec((key, "[a-z0-9,=-]{0,6}"), 0..5),
    )
        .prop_map(|(base, params)| {
            if params.is_empty() {
                return base;
            }
            let query: Vec<String> = params
                .into_iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            format!("{base}?{}", query.join("&"))
        })
}

fn peer_strategy() -> impl Strategy<Value = CapabilitySet> {
    (
        any::<bool>(),
        any::<bool>(),
        prop::collection::vec(protocol_strategy(), 0..6),
    )
        .prop_map(|(base10, base11, extra)| {
            let mut set: CapabilitySet = extra
                .into_iter()
                .filter(|p| !p.is_base())
                .map(Capability::Protocol)
                .collect();
            if base10 {
                set.insert(ProtocolCapability::Base10);
            }
            if base11 {
                set.insert(ProtocolCapability::Base11);
            }
            set
        })
}

proptest! {
    #[test]
    fn capability_round_trips(cap in capability_strategy()) {
        let uri = cap.to_uri();
        prop_assert_eq!(Capability::parse(&uri).unwrap(), cap);
    }

    #[test]
    fn advertised_uris_survive_parsing(uri in advertised_uri_strategy()) {
        prop_assert_eq!(Capability::parse(&uri).unwrap().to_uri(), uri);
    }

    #[test]
    fn framing_follows_the_highest_common_base(
        ours in peer_strategy(),
        theirs in peer_strategy(),
    ) {
        let common = |base| ours.supports(base) && theirs.supports(base);
        let expected = if common(ProtocolCapability::Base11) {
            Some(FramingMode::Chunked)
        } else if common(ProtocolCapability::Base10) {
            Some(FramingMode::EndOfMessage)
        } else {
            None
        };
        prop_assert_eq!(ours.negotiate_framing(&theirs), expected);
        prop_assert_eq!(theirs.negotiate_framing(&ours), expected);
    }
}
