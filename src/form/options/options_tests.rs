use super::*;
use crate::model::{FieldHooks, FieldKind, Section};
use crate::testing::MemoryStore;

/// Searches but cannot resolve single ids.
struct SearchOnly;

impl OptionSource for SearchOnly {
    fn search(&self, _term: &str) -> Result<Vec<SelectOption>, String> {
        Ok(Vec::new())
    }
}

fn registry() -> Arc<StoreRegistry> {
    let store = MemoryStore::with_rows(vec![
        json!({"id": 4, "name": "Retail"}),
        json!({"id": 5, "name": "Food"}),
        json!({"id": 6, "code": "SRV"}),
    ]);
    Arc::new(StoreRegistry::new().with("businesstype", Arc::new(store)))
}

fn store_field() -> FieldSpec {
    let mut f = FieldSpec::new("business_type_id", FieldKind::Select);
    f.store = Some("businesstype".into());
    f
}

/// Poll until the field stops loading or the deadline passes.
fn settle(resolver: &mut OptionResolver, model: &mut FormModel, key: &str) {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        resolver.poll(model);
        if !resolver.is_loading(key) || Instant::now() > deadline {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn uuid_digits_and_custom_patterns_look_like_ids() {
    let f = FieldSpec::new("x", FieldKind::Select);
    assert!(looks_like_id(&json!("3f2504e0-4f89-41d3-9a0c-0305e82c3301"), &f));
    assert!(looks_like_id(&json!(42), &f));
    assert!(looks_like_id(&json!("42"), &f));
    assert!(!looks_like_id(&json!("Retail"), &f));
    assert!(!looks_like_id(&json!(""), &f));
    let mut custom = f.clone();
    custom.id_pattern = Some("^BT-[0-9]+$".into());
    assert!(looks_like_id(&json!("BT-12"), &custom));
    assert!(!looks_like_id(&json!("12"), &custom));
}

#[test]
fn record_labels_fall_back_from_name_to_code_to_id() {
    assert_eq!(option_from_record(&json!({"id": 1, "name": "A", "code": "a"})).label, "A");
    assert_eq!(option_from_record(&json!({"id": 1, "code": "a"})).label, "a");
    assert_eq!(option_from_record(&json!({"id": 1})).label, "1");
}

#[test]
fn static_options_commit_synchronously() {
    let mut f = FieldSpec::new("status", FieldKind::Select);
    f.options = Some(vec![SelectOption::new("on", "On"), SelectOption::new("off", "Off")]);
    let mut resolver = OptionResolver::new(Arc::new(StoreRegistry::new()), EngineConfig::default());
    resolver.fetch_options(&f, "", true).unwrap();
    assert_eq!(resolver.options("status").len(), 2);
    assert!(!resolver.is_loading("status"));
}

#[test]
fn unregistered_store_fails_fast() {
    let mut f = store_field();
    f.store = Some("missing".into());
    let mut resolver = OptionResolver::new(registry(), EngineConfig::default());
    assert!(matches!(
        resolver.fetch_options(&f, "", false),
        Err(SchemaError::UnknownStore(_))
    ));
}

#[test]
fn store_fetch_maps_rows_and_respects_search() {
    let f = store_field();
    let mut resolver = OptionResolver::new(registry(), EngineConfig::default());
    let mut model = FormModel::new();
    resolver.fetch_options(&f, "foo", true).unwrap();
    settle(&mut resolver, &mut model, &f.key);
    assert_eq!(resolver.options(&f.key), &[SelectOption::new(5, "Food")]);
}

#[test]
fn only_the_latest_token_commits() {
    let f = store_field();
    let mut resolver = OptionResolver::new(registry(), EngineConfig::default());
    let a = resolver.fetch_options(&f, "ret", false).unwrap();
    let b = resolver.fetch_options(&f, "foo", false).unwrap();
    assert!(b > a);
    assert!(resolver.commit_options(&f.key, b, Ok(vec![SelectOption::new(5, "Food")])));
    // A resolves after B.
    assert!(!resolver.commit_options(&f.key, a, Ok(vec![SelectOption::new(4, "Retail")])));
    assert_eq!(resolver.options(&f.key)[0].label, "Food");

    let mut model = FormModel::new();
    settle(&mut resolver, &mut model, &f.key);
    thread::sleep(Duration::from_millis(50));
    resolver.poll(&mut model);
    assert_eq!(resolver.options(&f.key), &[SelectOption::new(5, "Food")]);
}

#[test]
fn selected_option_is_loaded_and_label_backfilled() {
    let f = store_field();
    let mut resolver = OptionResolver::new(registry(), EngineConfig::default());
    let mut model = FormModel::new();
    model.insert(&f.key, FieldValue::Choice(SelectOption::new(6, "")));
    resolver.ensure_selected_loaded(&f, &mut model).unwrap();
    assert!(resolver.is_loading(&f.key));
    settle(&mut resolver, &mut model, &f.key);
    assert_eq!(model.value(&f.key), FieldValue::Choice(SelectOption::new(6, "SRV")));
    assert_eq!(resolver.options(&f.key)[0], SelectOption::new(6, "SRV"));
}

#[test]
fn labelled_selection_already_listed_is_a_no_op() {
    let mut f = FieldSpec::new("status", FieldKind::Select);
    f.options = Some(vec![SelectOption::new("on", "On")]);
    let mut resolver = OptionResolver::new(Arc::new(StoreRegistry::new()), EngineConfig::default());
    let mut model = FormModel::new();
    model.insert("status", FieldValue::Choice(SelectOption::new("on", "")));
    resolver.setup_field(&f, &mut model).unwrap();
    assert_eq!(model.value("status"), FieldValue::Choice(SelectOption::new("on", "On")));
    assert!(!resolver.is_loading("status"));
}

#[test]
fn user_source_resolves_selection() {
    let source = StaticSource(vec![SelectOption::new("br", "Brazil"), SelectOption::new("pt", "Portugal")]);
    let f = FieldSpec::new("country", FieldKind::Select).with_hooks(FieldHooks {
        options: Some(Arc::new(source)),
        ..Default::default()
    });
    let mut resolver = OptionResolver::new(Arc::new(StoreRegistry::new()), EngineConfig::default());
    let mut model = FormModel::new();
    model.insert("country", FieldValue::Choice(SelectOption::new("pt", "")));
    resolver.setup_field(&f, &mut model).unwrap();
    let want = FieldValue::Choice(SelectOption::new("pt", "Portugal"));
    let deadline = Instant::now() + Duration::from_secs(2);
    while model.value("country") != want && Instant::now() < deadline {
        resolver.poll(&mut model);
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(model.value("country"), want);
}

#[test]
fn search_is_debounced_per_field() {
    let f = store_field();
    let section = Section::with_fields(vec![f.clone()]);
    let mut resolver = OptionResolver::new(registry(), EngineConfig::default());
    let t0 = Instant::now();
    resolver.handle_search(&f, "re", t0);
    resolver.handle_search(&f, "ret", t0 + Duration::from_millis(100));
    assert!(resolver.is_loading(&f.key));
    assert_eq!(resolver.tick(&section, t0 + Duration::from_millis(350)).unwrap(), 0);
    assert_eq!(resolver.tick(&section, t0 + Duration::from_millis(400)).unwrap(), 1);
    assert!(!resolver.state(&f.key).unwrap().has_pending_search());
    let mut model = FormModel::new();
    settle(&mut resolver, &mut model, &f.key);
    assert_eq!(resolver.options(&f.key), &[SelectOption::new(4, "Retail")]);
    assert_eq!(resolver.state(&f.key).unwrap().search, "ret");
}

#[test]
fn focus_fetches_only_when_empty() {
    let mut f = FieldSpec::new("status", FieldKind::Select);
    f.options = Some(vec![SelectOption::new("on", "On")]);
    let mut resolver = OptionResolver::new(Arc::new(StoreRegistry::new()), EngineConfig::default());
    assert!(resolver.handle_focus(&f).unwrap().is_some());
    assert!(resolver.handle_focus(&f).unwrap().is_none());
    assert!(resolver.handle_show(&f).is_ok());
}

#[test]
fn search_only_source_falls_back_to_the_store_for_the_selected_id() {
    let f = store_field().with_hooks(FieldHooks {
        options: Some(Arc::new(SearchOnly)),
        ..Default::default()
    });
    let mut resolver = OptionResolver::new(registry(), EngineConfig::default());
    let mut model = FormModel::new();
    model.insert(&f.key, FieldValue::Number(5.0));
    resolver.ensure_selected_loaded(&f, &mut model).unwrap();
    settle(&mut resolver, &mut model, &f.key);
    assert_eq!(model.value(&f.key), FieldValue::Choice(SelectOption::new(5, "Food")));
    assert_eq!(resolver.options(&f.key), &[SelectOption::new(5, "Food")]);
}

#[test]
fn source_without_a_store_leaves_unresolved_ids_alone() {
    let f = FieldSpec::new("tag", FieldKind::Select).with_hooks(FieldHooks {
        options: Some(Arc::new(SearchOnly)),
        ..Default::default()
    });
    let mut resolver = OptionResolver::new(Arc::new(StoreRegistry::new()), EngineConfig::default());
    let mut model = FormModel::new();
    model.insert("tag", FieldValue::Number(9.0));
    resolver.ensure_selected_loaded(&f, &mut model).unwrap();
    settle(&mut resolver, &mut model, "tag");
    assert_eq!(model.value("tag"), FieldValue::Number(9.0));
    assert!(resolver.options("tag").is_empty());
}

#[test]
fn tick_keeps_searches_of_fields_outside_the_scope() {
    let f = store_field();
    let other = Section::with_fields(vec![FieldSpec::new("name", FieldKind::Text)]);
    let mut resolver = OptionResolver::new(registry(), EngineConfig::default());
    let t0 = Instant::now();
    resolver.handle_search(&f, "foo", t0);
    let later = t0 + Duration::from_secs(1);
    assert_eq!(resolver.tick(&other, later).unwrap(), 0);
    assert!(resolver.state(&f.key).unwrap().has_pending_search());

    let own = Section::with_fields(vec![f.clone()]);
    assert_eq!(resolver.tick(&own, later).unwrap(), 1);
    let mut model = FormModel::new();
    settle(&mut resolver, &mut model, &f.key);
    assert_eq!(resolver.options(&f.key), &[SelectOption::new(5, "Food")]);
}

#[test]
fn command_source_backfills_the_label_from_the_store() {
    use crate::services::loader::CommandOptions;
    let source = CommandOptions {
        cmdline: "chi-app business_types".into(),
        unwrap: Some("items[].id/name".into()),
    };
    let f = store_field().with_hooks(FieldHooks {
        options: Some(Arc::new(source)),
        ..Default::default()
    });
    let mut resolver = OptionResolver::new(registry(), EngineConfig::default());
    let mut model = FormModel::new();
    model.insert(&f.key, FieldValue::Choice(SelectOption::new(4, "")));
    resolver.ensure_selected_loaded(&f, &mut model).unwrap();
    settle(&mut resolver, &mut model, &f.key);
    assert_eq!(model.value(&f.key), FieldValue::Choice(SelectOption::new(4, "Retail")));
}
