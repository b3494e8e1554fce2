//! End-to-end lifecycle tests over the engine
//!
//! Each test builds its own engine, so the cases are independent.

use skymock_common::resources::{
    firewall::Firewall, instance::Instance, network::Network,
    network_interface::NetworkInterface, security_group::SecurityGroup, subnet::Subnet,
    subnetwork::Subnetwork, vpc::Vpc, vpn_gateway::VpnGateway,
};
use skymock_common::{Engine, Error, FieldMap, Kind, ListQuery, PageRequest, Record, Status};
use test_case::test_case;

struct AwsFixture {
    engine: Engine,
    vpc: String,
    subnet: String,
}

fn aws_fixture() -> AwsFixture {
    let engine = Engine::in_memory();
    let vpc = engine
        .insert::<Vpc>(&FieldMap::new().with("cidr_block", "10.0.0.0/16"))
        .unwrap()
        .resource
        .meta
        .id;
    let subnet = engine
        .insert::<Subnet>(
            &FieldMap::new()
                .with("vpc_id", vpc.as_str())
                .with("cidr_block", "10.0.1.0/24"),
        )
        .unwrap()
        .resource
        .meta
        .id;
    AwsFixture { engine, vpc, subnet }
}

fn new_interface(f: &AwsFixture) -> String {
    f.engine
        .insert::<NetworkInterface>(&FieldMap::new().with("subnet_id", f.subnet.as_str()))
        .unwrap()
        .resource
        .meta
        .id
}

#[test]
fn interface_back_references_follow_its_lifecycle() {
    let f = aws_fixture();
    let eni = new_interface(&f);

    let subnet = f.engine.get::<Subnet>(&f.subnet).unwrap();
    let vpc = f.engine.get::<Vpc>(&f.vpc).unwrap();
    assert!(subnet.network_interface_ids.contains(&eni));
    assert!(vpc.network_interface_ids.contains(&eni));

    f.engine.delete::<NetworkInterface>(&eni).unwrap();

    let subnet = f.engine.get::<Subnet>(&f.subnet).unwrap();
    let vpc = f.engine.get::<Vpc>(&f.vpc).unwrap();
    assert!(!subnet.network_interface_ids.contains(&eni));
    assert!(!vpc.network_interface_ids.contains(&eni));
}

#[test]
fn attached_interface_cannot_be_deleted_until_detached() {
    let f = aws_fixture();
    let eni = new_interface(&f);
    let instance = f
        .engine
        .insert::<Instance>(
            &FieldMap::new()
                .with("image_id", "ami-0abcdef1")
                .with("subnet_id", f.subnet.as_str()),
        )
        .unwrap()
        .resource
        .meta
        .id;

    let attached = f
        .engine
        .attach_network_interface(
            &FieldMap::new()
                .with("network_interface_id", eni.as_str())
                .with("instance_id", instance.as_str())
                .with("device_index", 0),
        )
        .unwrap();
    assert_eq!(
        f.engine.get::<NetworkInterface>(&eni).unwrap().meta.status,
        Status::InUse
    );

    let before = f.engine.get::<NetworkInterface>(&eni).unwrap();
    let err = f.engine.delete::<NetworkInterface>(&eni).unwrap_err();
    assert!(matches!(err, Error::DependencyViolation { .. }));
    assert_eq!(f.engine.get::<NetworkInterface>(&eni).unwrap(), before);

    f.engine
        .detach_network_interface(
            &FieldMap::new().with("attachment_id", attached.attachment_id.as_str()),
        )
        .unwrap();
    assert_eq!(
        f.engine.get::<NetworkInterface>(&eni).unwrap().meta.status,
        Status::Available
    );
    f.engine.delete::<NetworkInterface>(&eni).unwrap();
}

#[test]
fn firewall_on_missing_network_leaves_store_empty() {
    let engine = Engine::in_memory();
    let err = engine
        .insert::<Firewall>(
            &FieldMap::new()
                .with("name", "allow-ssh")
                .with("network", "global/networks/nope")
                .with("allowed", serde_json::json!([{ "IPProtocol": "tcp" }])),
        )
        .unwrap_err();
    assert_eq!(err, Error::not_found(Kind::Network, "nope"));
    assert_eq!(engine.store().read().len(Kind::Firewall), 0);
}

#[test]
fn duplicate_name_is_rejected_without_change() {
    let engine = Engine::in_memory();
    let request = FieldMap::new().with("name", "default").with("mtu", 1500);
    let first = engine.insert::<Network>(&request).unwrap().resource;

    let err = engine
        .insert::<Network>(&FieldMap::new().with("name", "default").with("mtu", 9000))
        .unwrap_err();
    assert_eq!(err, Error::already_exists(Kind::Network, "default"));
    assert_eq!(engine.get::<Network>("default").unwrap(), first);
    assert_eq!(engine.store().read().len(Kind::Network), 1);
}

#[test]
fn missing_foreign_key_mutates_nothing() {
    let f = aws_fixture();
    let before = f.engine.get::<Subnet>(&f.subnet).unwrap();
    let err = f
        .engine
        .insert::<NetworkInterface>(
            &FieldMap::new()
                .with("subnet_id", f.subnet.as_str())
                .with("security_group_ids", vec!["sg-00000000000000000"]),
        )
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: Kind::SecurityGroup, .. }));
    assert_eq!(f.engine.store().read().len(Kind::NetworkInterface), 0);
    assert_eq!(f.engine.get::<Subnet>(&f.subnet).unwrap(), before);
}

#[test]
fn deleting_a_parent_clears_sibling_lists() {
    let engine = Engine::in_memory();
    engine
        .insert::<Network>(&FieldMap::new().with("name", "net"))
        .unwrap();
    for (name, range) in [("a", "10.0.0.0/24"), ("b", "10.0.1.0/24")] {
        engine
            .insert::<Subnetwork>(
                &FieldMap::new()
                    .with("name", name)
                    .with("network", "net")
                    .with("ip_cidr_range", range),
            )
            .unwrap();
    }
    engine.delete::<Subnetwork>("a").unwrap();
    assert_eq!(engine.get::<Network>("net").unwrap().subnetworks, vec!["us-central1/b"]);
}

#[test]
fn fingerprint_changes_even_for_equal_labels() {
    let engine = Engine::in_memory();
    let labels = serde_json::json!({ "env": "dev" });
    let network = engine
        .insert::<Network>(&FieldMap::new().with("name", "net").with("labels", labels.clone()))
        .unwrap()
        .resource;

    let mut fingerprint = network.meta.label_fingerprint.clone();
    for _ in 0..3 {
        let outcome = engine
            .set_labels::<Network>(
                "net",
                &FieldMap::new()
                    .with("labels", labels.clone())
                    .with("label_fingerprint", fingerprint.as_str()),
            )
            .unwrap();
        let next = outcome.resource.meta.label_fingerprint;
        assert_ne!(next, fingerprint);
        assert_eq!(outcome.operation.operation_type, "setLabels");
        fingerprint = next;
    }

    let patched = engine
        .patch::<Network>("net", &FieldMap::new().with("labels", labels))
        .unwrap()
        .resource;
    assert_ne!(patched.meta.label_fingerprint, fingerprint);
}

#[test]
fn stale_fingerprint_is_a_failed_precondition() {
    let engine = Engine::in_memory();
    let network = engine
        .insert::<Network>(&FieldMap::new().with("name", "net"))
        .unwrap()
        .resource;
    let stale = network.meta.label_fingerprint.clone();
    engine
        .set_labels::<Network>(
            "net",
            &FieldMap::new()
                .with("labels", serde_json::json!({ "a": "1" }))
                .with("label_fingerprint", stale.as_str()),
        )
        .unwrap();

    let err = engine
        .set_labels::<Network>(
            "net",
            &FieldMap::new()
                .with("labels", serde_json::json!({ "b": "2" }))
                .with("label_fingerprint", stale.as_str()),
        )
        .unwrap_err();
    assert!(matches!(err, Error::ConditionNotMet(_)));
    assert_eq!(err.http_status(), 412);
    let labels = engine.get::<Network>("net").unwrap().meta.labels;
    assert_eq!(labels.get("a").map(String::as_str), Some("1"));
    assert!(!labels.contains_key("b"));
}

#[test]
fn create_tags_is_all_or_nothing() {
    let f = aws_fixture();
    let err = f
        .engine
        .create_tags(
            &FieldMap::new()
                .with("resource_ids", vec![f.vpc.as_str(), "subnet-00000000000000000"])
                .with("tags", serde_json::json!([{ "key": "env", "value": "dev" }])),
        )
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: Kind::Subnet, .. }));
    assert!(f.engine.get::<Vpc>(&f.vpc).unwrap().meta.labels.is_empty());

    f.engine
        .create_tags(
            &FieldMap::new()
                .with("resource_ids", vec![f.vpc.as_str(), f.subnet.as_str()])
                .with("tags", serde_json::json!([{ "key": "Name", "value": "main" }])),
        )
        .unwrap();
    assert_eq!(f.engine.get::<Vpc>(&f.vpc).unwrap().meta.name, "main");
    assert_eq!(f.engine.get::<Subnet>(&f.subnet).unwrap().meta.name, "main");

    f.engine
        .delete_tags(
            &FieldMap::new()
                .with("resource_ids", vec![f.vpc.as_str()])
                .with("tag_keys", vec!["Name"]),
        )
        .unwrap();
    let vpc = f.engine.get::<Vpc>(&f.vpc).unwrap();
    assert_eq!(vpc.meta.name, vpc.meta.id);
}

#[test]
fn subnet_outside_vpc_is_invalid() {
    let f = aws_fixture();
    let err = f
        .engine
        .insert::<Subnet>(
            &FieldMap::new()
                .with("vpc_id", f.vpc.as_str())
                .with("cidr_block", "172.16.0.0/24"),
        )
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert_eq!(err.aws_code(), "InvalidParameterValue");
}

#[test]
fn reset_empties_every_kind() {
    let f = aws_fixture();
    new_interface(&f);
    f.engine
        .insert::<VpnGateway>(&FieldMap::new().with("gateway_type", "ipsec.1"))
        .unwrap();
    f.engine
        .insert::<Network>(&FieldMap::new().with("name", "default"))
        .unwrap();

    f.engine.reset();
    let tables = f.engine.store().read();
    assert!(tables.is_empty());
    for kind in Kind::ALL {
        assert_eq!(tables.len(kind), 0, "{}", kind);
    }
}

#[test]
fn engines_over_separate_stores_are_isolated() {
    let a = Engine::in_memory();
    let b = Engine::in_memory();
    a.insert::<Network>(&FieldMap::new().with("name", "shared"))
        .unwrap();
    assert!(b.get::<Network>("shared").is_err());
    b.insert::<Network>(&FieldMap::new().with("name", "shared"))
        .unwrap();
}

#[test]
fn describe_by_unknown_id_is_not_found() {
    let f = aws_fixture();
    let query = ListQuery {
        ids: vec![f.vpc.clone(), "vpc-00000000000000000".to_string()],
        ..Default::default()
    };
    let err = f.engine.list::<Vpc>(&query).unwrap_err();
    assert_eq!(err, Error::not_found(Kind::Vpc, "vpc-00000000000000000"));
}

#[test]
fn security_group_blocks_vpc_and_interface_blocks_group() {
    let f = aws_fixture();
    let sg = f
        .engine
        .insert::<SecurityGroup>(
            &FieldMap::new()
                .with("group_name", "web")
                .with("description", "web")
                .with("vpc_id", f.vpc.as_str()),
        )
        .unwrap()
        .resource
        .meta
        .id;
    let eni = f
        .engine
        .insert::<NetworkInterface>(
            &FieldMap::new()
                .with("subnet_id", f.subnet.as_str())
                .with("security_group_ids", vec![sg.as_str()]),
        )
        .unwrap()
        .resource
        .meta
        .id;

    let err = f.engine.delete::<SecurityGroup>(&sg).unwrap_err();
    assert!(err.to_string().contains(&eni));

    f.engine.delete::<NetworkInterface>(&eni).unwrap();
    f.engine.delete::<SecurityGroup>(&sg).unwrap();
    f.engine.delete::<Subnet>(&f.subnet).unwrap();
    f.engine.delete::<Vpc>(&f.vpc).unwrap();
    assert!(f.engine.store().read().is_empty());
}

#[test_case(1 ; "one per page")]
#[test_case(3 ; "uneven pages")]
#[test_case(7 ; "exact fit")]
#[test_case(50 ; "single page")]
fn pages_concatenate_to_the_filtered_sequence(page_size: usize) {
    let engine = Engine::in_memory();
    for i in 0..7 {
        let env = if i % 2 == 0 { "dev" } else { "prod" };
        engine
            .insert::<Network>(
                &FieldMap::new()
                    .with("name", format!("net-{}", i))
                    .with("labels", serde_json::json!({ "env": env })),
            )
            .unwrap();
    }
    let mut query = ListQuery {
        filters: vec![skymock_common::Filter::new("labels.env", &["dev", "prod"])],
        page: PageRequest {
            max_results: Some(page_size),
            page_token: None,
        },
        ..Default::default()
    };

    let mut names = Vec::new();
    loop {
        let page = engine.list::<Network>(&query).unwrap();
        names.extend(page.items.into_iter().map(|n| n.meta.name));
        match page.next_page_token {
            Some(token) => query.page.page_token = Some(token),
            None => break,
        }
    }
    let expected: Vec<String> = (0..7).map(|i| format!("net-{}", i)).collect();
    assert_eq!(names, expected);
}

#[test]
fn filters_keep_matching_subset_in_order() {
    let engine = Engine::in_memory();
    for (name, mtu) in [("a", 1460), ("b", 1500), ("c", 1460), ("d", 8896)] {
        engine
            .insert::<Network>(&FieldMap::new().with("name", name).with("mtu", mtu))
            .unwrap();
    }
    let query = ListQuery {
        filters: vec![skymock_common::Filter::new("mtu", &["8896", "1460"])],
        ..Default::default()
    };
    let names: Vec<String> = engine
        .list::<Network>(&query)
        .unwrap()
        .items
        .into_iter()
        .map(|n| n.meta.name)
        .collect();
    assert_eq!(names, vec!["a", "c", "d"]);

    let query = ListQuery {
        expression: Some("name = \"c\"".to_string()),
        ..Default::default()
    };
    let page = engine.list::<Network>(&query).unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].meta.name, "c");
}

fn new_instance(f: &AwsFixture) -> String {
    f.engine
        .insert::<Instance>(
            &FieldMap::new()
                .with("image_id", "ami-12345678")
                .with("subnet_id", f.subnet.as_str()),
        )
        .unwrap()
        .resource
        .meta
        .id
}

#[test]
fn delete_all_removes_a_repeated_key_once() {
    let f = aws_fixture();
    let instance = new_instance(&f);

    let removed = f
        .engine
        .delete_all::<Instance>(&[instance.clone(), instance.clone()])
        .unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].resource.meta.id, instance);
    assert_eq!(removed[0].resource.meta.status, Status::Running);
    assert!(f.engine.get::<Instance>(&instance).is_err());
}

#[test]
fn delete_all_with_an_unknown_key_removes_nothing() {
    let f = aws_fixture();
    let instance = new_instance(&f);

    let err = f
        .engine
        .delete_all::<Instance>(&[instance.clone(), "i-00000000".to_string()])
        .unwrap_err();
    assert_eq!(err, Error::not_found(Kind::Instance, "i-00000000"));
    assert!(f.engine.get::<Instance>(&instance).is_ok());
}

#[test]
fn insert_many_creates_every_copy() {
    let f = aws_fixture();
    let request = FieldMap::new()
        .with("image_id", "ami-12345678")
        .with("subnet_id", f.subnet.as_str());

    let outcomes = f.engine.insert_many::<Instance>(&request, 3).unwrap();
    let mut ids: Vec<String> = outcomes.iter().map(|o| o.resource.meta.id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
    assert_eq!(f.engine.list::<Instance>(&ListQuery::default()).unwrap().items.len(), 3);
}

#[test]
fn insert_many_with_a_bad_reference_creates_none() {
    let f = aws_fixture();
    let request = FieldMap::new()
        .with("image_id", "ami-12345678")
        .with("subnet_id", "subnet-00000000");

    let err = f.engine.insert_many::<Instance>(&request, 2).unwrap_err();
    assert_eq!(err, Error::not_found(Kind::Subnet, "subnet-00000000"));
    assert!(f.engine.list::<Instance>(&ListQuery::default()).unwrap().items.is_empty());
}

#[test]
fn insert_many_refuses_several_named_records() {
    let engine = Engine::in_memory();
    let err = engine
        .insert_many::<Network>(&FieldMap::new().with("name", "net"), 2)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(engine.store().read().is_empty());
}

#[test]
fn subnetwork_links_follow_its_own_region() {
    let engine = Engine::in_memory();
    engine
        .insert::<Network>(&FieldMap::new().with("name", "net"))
        .unwrap();
    let outcome = engine
        .insert::<Subnetwork>(
            &FieldMap::new()
                .with("name", "eu")
                .with("network", "net")
                .with("region", "regions/europe-west1")
                .with("ip_cidr_range", "10.1.0.0/24"),
        )
        .unwrap();

    let op = &outcome.operation;
    assert!(op.region.as_deref().unwrap().ends_with("/regions/europe-west1"));
    assert!(op.target_link.ends_with("/regions/europe-west1/subnetworks/eu"));
    assert!(op.self_link.contains("/regions/europe-west1/operations/"));

    let value = outcome.resource.project(engine.config());
    assert!(value["selfLink"]
        .as_str()
        .unwrap()
        .ends_with("/regions/europe-west1/subnetworks/eu"));

    let network = engine.get::<Network>("net").unwrap().project(engine.config());
    assert!(network["subnetworks"][0]
        .as_str()
        .unwrap()
        .ends_with("/regions/europe-west1/subnetworks/eu"));

    let op = engine.delete::<Subnetwork>("eu").unwrap();
    assert!(op.region.as_deref().unwrap().ends_with("/regions/europe-west1"));
    assert!(engine.get::<Network>("net").unwrap().subnetworks.is_empty());
}

#[test]
fn list_by_location_keeps_records_of_that_region() {
    let engine = Engine::in_memory();
    engine
        .insert::<Network>(&FieldMap::new().with("name", "net"))
        .unwrap();
    for (name, region, range) in [
        ("us", "us-central1", "10.0.0.0/24"),
        ("eu", "europe-west1", "10.0.1.0/24"),
    ] {
        engine
            .insert::<Subnetwork>(
                &FieldMap::new()
                    .with("name", name)
                    .with("network", "net")
                    .with("region", region)
                    .with("ip_cidr_range", range),
            )
            .unwrap();
    }

    let query = ListQuery {
        location: Some("europe-west1".to_string()),
        ..Default::default()
    };
    let page = engine.list::<Subnetwork>(&query).unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].meta.name, "eu");
}
