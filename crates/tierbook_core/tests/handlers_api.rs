use indexmap::IndexMap;
use serde_json::{json, Value};
use tierbook_core::{
    default_hierarchy, handlers, MemoryStorage, Project, ProjectSlot, RawRequest, TierKind,
    TierRef, TierStorage,
};

fn tref(ids: &[&str], name: &str, kind: TierKind) -> TierRef {
    TierRef {
        identifiers: ids.iter().map(|id| id.to_string()).collect(),
        name: name.to_string(),
        kind,
    }
}

fn seeded_slot() -> ProjectSlot {
    let mut storage = MemoryStorage::new();
    storage
        .setup_files(
            &tref(&["1"], "WP1", TierKind::ContentBearing),
            None,
            IndexMap::new(),
        )
        .unwrap();
    let project = Project::new(default_hierarchy().unwrap(), Box::new(storage)).unwrap();
    let slot = ProjectSlot::new();
    slot.bind(project).unwrap();
    slot
}

fn body(reply: &tierbook_core::Reply) -> Value {
    serde_json::from_str(&reply.body).unwrap()
}

#[test]
fn lookup_returns_the_folder_shape_for_home() {
    let slot = seeded_slot();
    let reply = handlers::lookup(&slot, &RawRequest::get().with_query("name=Home"));
    assert_eq!(reply.status, 200);

    let json = body(&reply);
    assert_eq!(json["tierType"], json!("folder"));
    assert_eq!(json["name"], json!("Home"));
    assert_eq!(json["ids"], json!([]));
    assert_eq!(json["children"], json!(["WP1"]));
    assert!(json.get("notebookPath").is_none());
}

#[test]
fn lookup_returns_the_notebook_shape_for_content_tiers() {
    let slot = seeded_slot();
    let reply = handlers::lookup(&slot, &RawRequest::get().with_query("name=WP1"));
    assert_eq!(reply.status, 200);

    let json = body(&reply);
    assert_eq!(json["tierType"], json!("notebook"));
    assert_eq!(json["ids"], json!(["1"]));
    assert_eq!(json["notebookPath"], json!("1/WP1.ipynb"));
    assert_eq!(json["metaPath"], json!("1/.tier/WP1.json"));
    assert!(json.get("hltsPath").is_none());
    assert!(json["started"].is_string());
    assert!(json["metaSchema"]["properties"]
        .as_object()
        .unwrap()
        .contains_key("conclusion"));
}

#[test]
fn lookup_of_an_unknown_name_is_not_found() {
    let slot = seeded_slot();
    let reply = handlers::lookup(&slot, &RawRequest::get().with_query("name=WP9"));
    assert_eq!(reply.status, 404);

    let reply = handlers::lookup(&slot, &RawRequest::get().with_query("name=garbage"));
    assert_eq!(reply.status, 404);
}

#[test]
fn lookup_rejects_unknown_query_fields() {
    let slot = seeded_slot();
    let reply = handlers::lookup(&slot, &RawRequest::get().with_query("name=WP1&depth=2"));
    assert_eq!(reply.status, 400);
}

#[test]
fn open_reports_its_outcome_in_the_body() {
    let slot = seeded_slot();

    let reply = handlers::open(&slot, &RawRequest::get().with_query("name=WP1"));
    assert_eq!(reply.status, 200);
    assert_eq!(body(&reply), json!({"status": "success"}));

    // An unknown tier still replies 200; failure lives in the body.
    let reply = handlers::open(&slot, &RawRequest::get().with_query("name=WP9"));
    assert_eq!(reply.status, 200);
    assert_eq!(body(&reply), json!({"status": "failure"}));
}

#[test]
fn new_child_materializes_and_returns_the_branch() {
    let slot = seeded_slot();
    let req = RawRequest::post(json!({
        "id": "2",
        "parent": "Home",
        "template": "WorkPackage.ipynb",
    }));
    let reply = handlers::new_child(&slot, &req);
    assert_eq!(reply.status, 200);

    let json = body(&reply);
    assert_eq!(json["name"], json!("WP2"));
    assert_eq!(json["folder"], json!("2"));
    assert!(json["started"].is_string());

    // The new tier resolves afterwards.
    let reply = handlers::tree(&slot, &RawRequest::get().with_path("2"));
    assert_eq!(reply.status, 200);
}

#[test]
fn new_child_twice_with_the_same_id_is_rejected() {
    let slot = seeded_slot();
    let req = RawRequest::post(json!({"id": "1", "parent": "Home"}));
    let reply = handlers::new_child(&slot, &req);
    assert_eq!(reply.status, 400);
    assert_eq!(body(&reply)["reason"], json!("BadRequest"));
}

#[test]
fn new_child_validates_declared_meta_fields() {
    let slot = seeded_slot();
    let req = RawRequest::post(json!({
        "id": "2",
        "parent": "Home",
        "started": "not-a-timestamp",
    }));
    let reply = handlers::new_child(&slot, &req);
    assert_eq!(reply.status, 400);
    assert_eq!(body(&reply)["payload"], json!("not-a-timestamp"));

    // The failed creation left nothing behind.
    let reply = handlers::tree(&slot, &RawRequest::get().with_path("2"));
    assert_eq!(reply.status, 404);
}

#[test]
fn new_child_passes_undeclared_meta_through() {
    let slot = seeded_slot();
    let req = RawRequest::post(json!({
        "id": "2",
        "parent": "Home",
        "operator": "jo",
    }));
    let reply = handlers::new_child(&slot, &req);
    assert_eq!(reply.status, 200);
    assert_eq!(body(&reply)["additionalMeta"], json!({"operator": "jo"}));
}

#[test]
fn new_child_under_the_deepest_class_is_not_found() {
    let slot = seeded_slot();
    slot.with(|project| {
        for parts in [
            vec!["1", "1"],
            vec!["1", "1", "a"],
            vec!["1", "1", "a", "d1"],
        ] {
            let segments: Vec<String> = parts.iter().map(|s| s.to_string()).collect();
            let tier = project.address_ref(&segments).unwrap();
            project
                .storage_mut()
                .setup_files(&tier, None, IndexMap::new())
                .unwrap();
        }
    })
    .unwrap();

    let req = RawRequest::post(json!({"id": "x", "parent": "WP1.1a-d1"}));
    let reply = handlers::new_child(&slot, &req);
    assert_eq!(reply.status, 404);
}

#[test]
fn new_child_ignores_unknown_template_names() {
    let slot = seeded_slot();
    let req = RawRequest::post(json!({
        "id": "2",
        "parent": "Home",
        "template": "NoSuchTemplate.ipynb",
    }));
    let reply = handlers::new_child(&slot, &req);
    assert_eq!(reply.status, 200);
    assert_eq!(body(&reply)["name"], json!("WP2"));
}

#[test]
fn new_child_requires_a_post() {
    let slot = seeded_slot();
    let req = RawRequest::get().with_query("id=2&parent=Home");
    let reply = handlers::new_child(&slot, &req);
    assert_eq!(reply.status, 405);
}
