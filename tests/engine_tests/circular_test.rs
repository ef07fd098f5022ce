use fabric::diagnostics::SourceRange;
use fabric::template::{BlockKind, BlockPath, DocumentBlock, PluginBlock, SectionBlock, Template};
use fabric::{Engine, EngineConfig};
use pretty_assertions::assert_eq;

fn content_ref(target: &str, name: &str, line: usize) -> PluginBlock {
    PluginBlock::reference(
        BlockKind::Content,
        BlockPath::new(BlockKind::Content, "ref", target),
        Some(name),
    )
    .at(SourceRange::at("cycle.fabric", line, 1))
}

#[test]
fn test_ref_cycle_reports_full_traceback() {
    let template = Template::new()
        .with_global(content_ref("b", "a", 1))
        .with_global(content_ref("c", "b", 2))
        .with_global(content_ref("a", "c", 3))
        .with_document(DocumentBlock::new("doc").with_content(content_ref("a", "entry", 10)));
    let engine = Engine::with_builtins(EngineConfig::default());

    let err = engine.load(&template).unwrap_err();
    let diags = err.diagnostics().unwrap();
    assert_eq!(diags.len(), 1);
    let diag = diags.iter().next().unwrap();
    assert_eq!(diag.summary, "Circular reference detected");
    let mut lines: Vec<_> = diag.traceback().unwrap().iter().map(|r| r.start.line).collect();
    lines.sort();
    assert_eq!(lines, vec![1, 2, 3]);
    assert!(engine.document_names().is_empty());
}

#[test]
fn test_section_ref_cycle_is_detected() {
    let template = Template::new()
        .with_global_section(SectionBlock::reference("two", Some("one")))
        .with_global_section(SectionBlock::reference("one", Some("two")))
        .with_document(
            DocumentBlock::new("doc").with_content(SectionBlock::reference("one", None)),
        );
    let engine = Engine::with_builtins(EngineConfig::default());

    let err = engine.load(&template).unwrap_err();
    let summaries: Vec<_> = err
        .diagnostics()
        .unwrap()
        .iter()
        .map(|d| d.summary.clone())
        .collect();
    assert_eq!(summaries, vec!["Circular reference detected".to_string()]);
}

#[test]
fn test_unrelated_documents_still_load_errors_together() {
    let template = Template::new()
        .with_global(content_ref("b", "a", 1))
        .with_global(content_ref("a", "b", 2))
        .with_document(DocumentBlock::new("broken").with_content(content_ref("a", "x", 5)))
        .with_document(
            DocumentBlock::new("fine").with_content(PluginBlock::content("text", None)),
        );
    let engine = Engine::with_builtins(EngineConfig::default());

    let err = engine.load(&template).unwrap_err();
    assert_eq!(err.diagnostics().unwrap().len(), 1);
}

#[test]
fn test_section_including_itself_is_detected() {
    let template = Template::new()
        .with_global_section(
            SectionBlock::new(Some("a"))
                .with_content(
                    SectionBlock::reference("a", Some("inner"))
                        .at(SourceRange::at("cycle.fabric", 2, 1)),
                )
                .at(SourceRange::at("cycle.fabric", 1, 1)),
        )
        .with_document(DocumentBlock::new("doc").with_content(
            SectionBlock::reference("a", Some("top")).at(SourceRange::at("cycle.fabric", 9, 1)),
        ));
    let engine = Engine::with_builtins(EngineConfig::default());

    let err = engine.load(&template).unwrap_err();
    let diags = err.diagnostics().unwrap();
    assert_eq!(diags.len(), 1);
    let diag = diags.iter().next().unwrap();
    assert_eq!(diag.summary, "Circular reference detected");
    let lines: Vec<_> = diag.traceback().unwrap().iter().map(|r| r.start.line).collect();
    assert_eq!(lines, vec![2]);
    assert!(engine.document_names().is_empty());
}
