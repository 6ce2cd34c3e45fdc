use super::*;
use serde_json::json;
use std::io::Write;

#[test]
fn get_by_path_traverses_nested_objects() {
    let v = json!({
        "data": {
            "items": [1, 2, 3],
            "meta": {"page": 1}
        }
    });
    assert_eq!(
        get_by_path(&v, "data.items")
            .unwrap()
            .as_array()
            .unwrap()
            .len(),
        3
    );
    assert_eq!(
        get_by_path(&v, "data.meta.page").unwrap().as_i64().unwrap(),
        1
    );
    assert!(get_by_path(&v, "data.missing").is_none());
    assert!(get_by_path(&v, "").is_none());
}

#[test]
fn parse_options_supports_multiple_unwrap_patterns() {
    let v = json!({
        "data": {
            "items": [
                {"id": "a", "title": "Alpha"},
                {"id": 7, "name": "Bravo"}
            ],
            "tags": ["urgent", "normal"],
        }
    });
    let opts = parse_options_from_json(&v, Some("data.items[].id/title"));
    assert_eq!(opts[0], SelectOption::new("a", "Alpha"));
    let opts = parse_options_from_json(&v, None);
    assert_eq!(opts[1], SelectOption::new(7, "Bravo"));
    let tags = parse_options_from_json(&v, Some("data.tags"));
    assert_eq!(tags[1], SelectOption::new("normal", "normal"));
}

#[test]
fn ok_envelope_unwraps_to_data() {
    let v = json!({"ok": true, "data": {"id": 1}});
    assert_eq!(unwrap_envelope(v).unwrap(), json!({"id": 1}));
    // Bare records pass through untouched.
    let bare = json!({"id": 2, "type": "branch"});
    assert_eq!(unwrap_envelope(bare.clone()).unwrap(), bare);
}

#[test]
fn error_envelope_carries_field_errors() {
    let v = json!({
        "ok": false,
        "data": {
            "message": "Validation failed",
            "details": {"errors": [
                {"loc": ["payload", "name"], "msg": "Too short"},
                {"loc": ["payload", "non_field_errors"], "msg": "ignored"}
            ]}
        }
    });
    let err = unwrap_envelope(v).unwrap_err();
    assert_eq!(err.to_string(), "Validation failed");
    assert_eq!(
        err.field_errors(),
        &[FieldError {
            key: "name".into(),
            message: "Too short".into()
        }]
    );
}

#[test]
fn error_maps_and_strings_are_understood() {
    let map = error_from_envelope(&json!({
        "type": "error",
        "data": {"detail": "Bad request", "errors": {"cnpj": ["Invalid CNPJ."], "code": "Taken"}}
    }));
    assert_eq!(map.to_string(), "Bad request");
    let keys: Vec<&str> = map.field_errors().iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["cnpj", "code"]);

    let text = error_from_envelope(&json!({"ok": false, "errors": "name: required; email: invalid"}));
    assert_eq!(text.field_errors().len(), 2);
    assert_eq!(text.field_errors()[1].message, "invalid");
    assert_eq!(text.to_string(), "Request failed");
}

#[test]
fn schema_errors_report_path_line_and_column() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(f, "name: business\nsections:\n  - rows: [\n").unwrap();
    let err = load_form_schema(f.path()).unwrap_err().to_string();
    let label = f.path().display().to_string();
    assert!(err.starts_with(&label), "{err}");
    assert!(err[label.len()..].starts_with(':'), "{err}");
}

#[test]
fn loaded_schemas_are_checked() {
    let dup = "name: b\nsections:\n  - rows:\n      - cols: [{key: name}, {key: name}]\n";
    let err = form_schema_from_str("b.yaml", dup).unwrap_err();
    assert!(format!("{err:#}").contains("duplicate field key"));

    let table = table_schema_from_str("t.yaml", "name: t\ncolumns: [{field: code}]\n").unwrap();
    assert_eq!(table.rows_per_page_options, vec![10, 20, 50, 100]);
}

#[cfg(unix)]
fn echo_title_source(unwrap: Option<&str>) -> CommandOptions {
    CommandOptions {
        cmdline: r#"sh -c 'printf "{\"ok\": true, \"data\": {\"items\": [{\"id\": 1, \"title\": \"%s\"}]}}" "${2:-all}"' sh"#
            .into(),
        unwrap: unwrap.map(str::to_string),
    }
}

#[cfg(unix)]
#[test]
fn command_options_run_without_search_for_a_blank_term() {
    let source = echo_title_source(Some("items[].id/title"));
    assert_eq!(source.search("  ").unwrap(), vec![SelectOption::new(1, "all")]);
    // The default unwrap reads data.items and takes the label from title.
    let source = echo_title_source(None);
    assert_eq!(source.search("").unwrap(), vec![SelectOption::new(1, "all")]);
}

#[cfg(unix)]
#[test]
fn command_options_pass_the_term_as_one_argument() {
    let source = echo_title_source(Some("data.items[].id/title"));
    let opts = source.search("O'Brien & co; ls").unwrap();
    assert_eq!(opts, vec![SelectOption::new(1, "O'Brien & co; ls")]);
}

#[cfg(unix)]
#[test]
fn command_options_report_error_envelopes() {
    let source = CommandOptions {
        cmdline: r#"sh -c 'echo "{\"ok\": false, \"data\": {\"message\": \"denied\"}}" >&2; exit 1' sh"#
            .into(),
        unwrap: None,
    };
    assert_eq!(source.search("acme").unwrap_err(), "denied");
    let broken = CommandOptions {
        cmdline: "sh -c 'echo boom >&2; exit 2' sh".into(),
        unwrap: None,
    };
    assert!(broken.search("").unwrap_err().contains("boom"));
}

#[test]
fn command_options_cannot_resolve_single_ids() {
    let source = CommandOptions {
        cmdline: "chi-app business_types".into(),
        unwrap: None,
    };
    assert_eq!(source.resolve(&json!(5)).unwrap(), None);
}
