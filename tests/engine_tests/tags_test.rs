use fabric::template::{DocumentBlock, PluginBlock, SectionBlock, Template};
use fabric::{Engine, EngineConfig};
use pretty_assertions::assert_eq;
use serde_json::json;

use super::tags;

fn text(value: &str, tags: &[&str]) -> PluginBlock {
    PluginBlock::content("text", None)
        .with_args(json!({ "value": value }))
        .with_tags(tags.iter().copied())
}

fn template() -> Template {
    Template::new().with_document(
        DocumentBlock::new("doc")
            .with_content(text("intro", &[]))
            .with_content(
                SectionBlock::new(Some("details"))
                    .with_tags(["other"])
                    .with_content(text("keep", &["wanted"]))
                    .with_content(text("drop", &[])),
            )
            .with_content(
                SectionBlock::new(Some("appendix"))
                    .with_tags(["wanted", "extra"])
                    .with_content(text("untagged child", &[])),
            ),
    )
}

#[tokio::test]
async fn test_section_keeps_only_matching_children() {
    let engine = Engine::with_builtins(EngineConfig::default());
    engine.load(&template()).unwrap();
    let rendered = engine.render("doc", &tags(&["wanted"])).await.unwrap();
    assert_eq!(rendered.tree.markdown(), "keep\n\nuntagged child");
    assert!(rendered.warnings.is_empty());
}

#[tokio::test]
async fn test_every_required_tag_must_match() {
    let engine = Engine::with_builtins(EngineConfig::default());
    engine.load(&template()).unwrap();
    let rendered = engine.render("doc", &tags(&["wanted", "extra"])).await.unwrap();
    assert_eq!(rendered.tree.markdown(), "untagged child");
}

#[tokio::test]
async fn test_default_tags_apply_when_none_given() {
    let config = EngineConfig {
        default_required_tags: tags(&["wanted"]),
        ..EngineConfig::default()
    };
    let engine = Engine::with_builtins(config);
    engine.load(&template()).unwrap();
    let rendered = engine.render("doc", &[]).await.unwrap();
    assert_eq!(rendered.tree.markdown(), "keep\n\nuntagged child");
}

#[tokio::test]
async fn test_no_filter_renders_everything() {
    let engine = Engine::with_builtins(EngineConfig::default());
    engine.load(&template()).unwrap();
    let rendered = engine.render("doc", &[]).await.unwrap();
    assert_eq!(
        rendered.tree.markdown(),
        "intro\n\nkeep\n\ndrop\n\nuntagged child"
    );
}

#[tokio::test]
async fn test_pruned_section_keeps_its_title() {
    let template = Template::new().with_document(
        DocumentBlock::new("doc").with_content(
            SectionBlock::new(Some("results"))
                .with_title("Results")
                .with_tags(["other"])
                .with_content(text("keep", &["wanted"]))
                .with_content(text("drop", &[])),
        ),
    );
    let engine = Engine::with_builtins(EngineConfig::default());
    engine.load(&template).unwrap();
    let rendered = engine.render("doc", &tags(&["wanted"])).await.unwrap();
    assert_eq!(rendered.tree.markdown(), "# Results\n\nkeep");
}
