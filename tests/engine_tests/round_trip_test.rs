use fabric::template::{
    query_expr, DocumentBlock, MetaBlock, PluginBlock, SectionBlock, Template, VarSet,
};
use fabric::{Engine, EngineConfig, Value};
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test]
async fn test_inline_data_renders_through_text() {
    let template = Template::new().with_document(
        DocumentBlock::new("doc")
            .with_data(PluginBlock::data("inline", "x").with_args(json!({"v": 1})))
            .with_content(
                PluginBlock::content("text", None)
                    .with_args(json!({"value": "{{.data.inline.x.v}}"})),
            ),
    );
    let engine = Engine::with_builtins(EngineConfig::default());
    engine.load(&template).unwrap();

    let rendered = engine.render("doc", &[]).await.unwrap();
    assert_eq!(rendered.tree.markdown(), "1");
    assert_eq!(
        rendered.data.get_path(&["data", "inline", "x", "v"]),
        Some(&Value::from(1))
    );
}

#[tokio::test]
async fn test_sections_vars_and_toc() {
    let template = Template::new().with_document(
        DocumentBlock::new("report")
            .with_meta(MetaBlock {
                name: Some("Weekly".to_string()),
                ..MetaBlock::default()
            })
            .with_vars(VarSet::new().with("team", "core"))
            .with_content(
                PluginBlock::content("text", None)
                    .with_args(json!({"value": "{{ .document.meta.name }} report"})),
            )
            .with_content(PluginBlock::content("toc", None))
            .with_content(
                SectionBlock::new(Some("summary"))
                    .with_title("Summary")
                    .with_vars(VarSet::new().with("owner", query_expr(".vars.team + \"-lead\"")))
                    .with_content(
                        PluginBlock::content("text", None)
                            .with_args(json!({"value": "owned by {{ .vars.owner }}"})),
                    )
                    .with_content(
                        SectionBlock::new(None)
                            .with_title("Details")
                            .with_content(
                                PluginBlock::content("text", None)
                                    .with_args(json!({"value": "team {{ .vars.team }}"})),
                            ),
                    ),
            ),
    );
    let engine = Engine::with_builtins(EngineConfig::default());
    engine.load(&template).unwrap();

    let rendered = engine.render("report", &[]).await.unwrap();
    assert_eq!(
        rendered.tree.markdown(),
        [
            "Weekly report",
            "- [Summary](#summary)\n  - [Details](#details)",
            "# Summary",
            "owned by core-lead",
            "## Details",
            "team core",
        ]
        .join("\n\n")
    );
}

#[tokio::test]
async fn test_excluded_content_leaves_no_gap() {
    let template = Template::new().with_document(
        DocumentBlock::new("doc")
            .with_content(PluginBlock::content("text", None).with_args(json!({"value": "a"})))
            .with_content(
                PluginBlock::content("text", None)
                    .with_args(json!({"value": "b"}))
                    .with_is_included(query_expr(".vars.show == true")),
            )
            .with_content(PluginBlock::content("text", None).with_args(json!({"value": "c"}))),
    );
    let engine = Engine::with_builtins(EngineConfig::default());
    engine.load(&template).unwrap();

    let rendered = engine.render("doc", &[]).await.unwrap();
    assert_eq!(rendered.tree.markdown(), "a\n\nc");
    let children = rendered.tree.children(rendered.tree.root());
    assert_eq!(children.len(), 2);
}
