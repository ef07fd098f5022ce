use fabric::template::{query_expr, DocumentBlock, DynamicBlock, PluginBlock, SectionBlock, Template};
use fabric::{Engine, EngineConfig};
use pretty_assertions::assert_eq;
use serde_json::json;

fn item_text() -> PluginBlock {
    PluginBlock::content("text", None)
        .with_args(json!({"value": "{{ .vars.dynamic_item_index }}:{{ .vars.dynamic_item }}"}))
}

async fn render(template: Template) -> String {
    let engine = Engine::with_builtins(EngineConfig::default());
    engine.load(&template).unwrap();
    engine.render("doc", &[]).await.unwrap().tree.markdown()
}

#[tokio::test]
async fn test_one_expansion_per_item() {
    let template = Template::new().with_document(
        DocumentBlock::new("doc").with_content(
            DynamicBlock::new()
                .with_items(json!(["x", "y", "z"]))
                .with_content(item_text()),
        ),
    );
    assert_eq!(render(template).await, "0:x\n\n1:y\n\n2:z");
}

#[tokio::test]
async fn test_items_from_data() {
    let template = Template::new().with_document(
        DocumentBlock::new("doc")
            .with_data(PluginBlock::data("inline", "team").with_args(json!({"ann": "lead", "bo": "dev"})))
            .with_content(
                DynamicBlock::new()
                    .with_items(query_expr(".data.inline.team"))
                    .with_condition(query_expr(".vars.dynamic_item != \"dev\""))
                    .with_content(item_text()),
            ),
    );
    assert_eq!(render(template).await, "ann:lead");
}

#[tokio::test]
async fn test_dynamic_sections_repeat() {
    let template = Template::new().with_document(
        DocumentBlock::new("doc").with_content(
            DynamicBlock::new().with_items(json!(["a", "b"])).with_content(
                SectionBlock::new(None)
                    .with_title("{{ .vars.dynamic_item }}")
                    .with_content(item_text()),
            ),
        ),
    );
    assert_eq!(render(template).await, "# a\n\n0:a\n\n# b\n\n1:b");
}
