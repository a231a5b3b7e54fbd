use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cell::Cell;
use tierbook_core::{
    default_hierarchy, respond, HandlerError, MemoryStorage, Project, ProjectSlot, RawRequest,
    Verb,
};

#[derive(Debug, Deserialize)]
struct EchoQuery {
    name: String,
}

#[derive(Debug, Serialize)]
struct EchoResponse {
    content: String,
}

fn bound_slot() -> ProjectSlot {
    let slot = ProjectSlot::new();
    let project =
        Project::new(default_hierarchy().unwrap(), Box::new(MemoryStorage::new())).unwrap();
    slot.bind(project).unwrap();
    slot
}

fn body(reply: &tierbook_core::Reply) -> Value {
    serde_json::from_str(&reply.body).unwrap()
}

#[test]
fn valid_query_reaches_the_handler_and_returns_json() {
    let slot = bound_slot();
    let req = RawRequest::get().with_query("name=WP1");
    let reply = respond(&slot, Verb::Get, &req, |_, query: EchoQuery| {
        Ok(EchoResponse {
            content: query.name,
        })
    });
    assert_eq!(reply.status, 200);
    assert_eq!(body(&reply), json!({"content": "WP1"}));
}

#[test]
fn both_input_channels_fail_before_the_handler_runs() {
    let slot = bound_slot();
    let handler_ran = Cell::new(false);

    // Both payloads are individually valid; the combination is the violation.
    let req = RawRequest::get().with_path("1/2").with_query("name=WP1");
    let reply = respond(&slot, Verb::Get, &req, |_, _query: EchoQuery| {
        handler_ran.set(true);
        Ok(EchoResponse {
            content: String::new(),
        })
    });

    assert_eq!(reply.status, 400);
    assert!(!handler_ran.get());
    assert_eq!(body(&reply)["reason"], json!("BadRequest"));
}

#[test]
fn invalid_query_is_a_bad_request_with_the_raw_payload() {
    let slot = bound_slot();
    let req = RawRequest::get().with_query("wrong=field");
    let reply = respond(&slot, Verb::Get, &req, |_, query: EchoQuery| {
        Ok(EchoResponse {
            content: query.name,
        })
    });
    assert_eq!(reply.status, 400);
    assert_eq!(body(&reply)["payload"], json!({"wrong": "field"}));
}

#[test]
fn handler_not_found_maps_to_404_for_get_and_post() {
    let slot = bound_slot();

    let get = RawRequest::get().with_query("name=WP9");
    let reply = respond(&slot, Verb::Get, &get, |_, _query: EchoQuery| {
        Err::<EchoResponse, _>(HandlerError::NotFound("WP9".to_string()))
    });
    assert_eq!(reply.status, 404);

    let post = RawRequest::post(json!({"name": "WP9"}));
    let reply = respond(&slot, Verb::Post, &post, |_, _query: EchoQuery| {
        Err::<EchoResponse, _>(HandlerError::NotFound("WP9".to_string()))
    });
    assert_eq!(reply.status, 404);
}

#[test]
fn handler_defect_maps_to_500() {
    let slot = bound_slot();
    let req = RawRequest::get().with_query("name=WP1");
    let reply = respond(&slot, Verb::Get, &req, |_, _query: EchoQuery| {
        Err::<EchoResponse, _>(HandlerError::Defect("broken output promise".to_string()))
    });
    assert_eq!(reply.status, 500);
    assert_eq!(body(&reply)["reason"], json!("ServerError"));
}

#[test]
fn unsupported_verbs_fail_immediately() {
    let slot = bound_slot();
    for verb in [Verb::Put, Verb::Delete, Verb::Patch] {
        let req = RawRequest::new(verb);
        let reply = respond(&slot, Verb::Get, &req, |_, _query: EchoQuery| {
            Ok(EchoResponse {
                content: String::new(),
            })
        });
        assert_eq!(reply.status, 405);
    }
}

#[test]
fn post_without_a_body_is_a_bad_request() {
    let slot = bound_slot();
    let req = RawRequest::new(Verb::Post);
    let reply = respond(&slot, Verb::Post, &req, |_, _query: EchoQuery| {
        Ok(EchoResponse {
            content: String::new(),
        })
    });
    assert_eq!(reply.status, 400);
}

#[test]
fn unbound_slot_short_circuits_with_503() {
    let slot = ProjectSlot::new();
    let req = RawRequest::get().with_query("name=WP1");
    let reply = respond(&slot, Verb::Get, &req, |_, query: EchoQuery| {
        Ok(EchoResponse {
            content: query.name,
        })
    });
    assert_eq!(reply.status, 503);
    assert_eq!(body(&reply)["reason"], json!("ProjectUnbound"));
}

#[test]
fn slot_rebinds_only_after_reset() {
    let slot = bound_slot();
    let spare =
        Project::new(default_hierarchy().unwrap(), Box::new(MemoryStorage::new())).unwrap();
    assert!(slot.bind(spare).is_err());

    slot.reset();
    assert!(!slot.is_bound());
    let fresh =
        Project::new(default_hierarchy().unwrap(), Box::new(MemoryStorage::new())).unwrap();
    assert!(slot.bind(fresh).is_ok());
}
