//! Plugins that ship with the engine.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    Content, ContentParams, ContentProvider, ContentResult, DataParams, DataSource,
    InvocationOrder, PluginRegistry, PublishParams, Publisher,
};
use crate::diagnostics::{DiagResult, Diagnostics};
use crate::query::template;
use crate::value::Value;

pub fn register(registry: &PluginRegistry) {
    registry.register_data_source("inline", Arc::new(InlineData));
    registry.register_content_provider("text", Arc::new(TextContent));
    registry.register_content_provider("title", Arc::new(TitleContent));
    registry.register_content_provider("toc", Arc::new(TocContent));
    registry.register_publisher("local_file", Arc::new(LocalFilePublisher));
}

fn required_str<'a>(args: &'a Value, key: &str, plugin: &str) -> DiagResult<&'a str> {
    args.get(key).and_then(Value::as_str).ok_or_else(|| {
        Diagnostics::error(
            "Invalid arguments",
            format!("{} requires a string argument {:?}", plugin, key),
        )
    })
}

fn interpolate(text: &str, data: &Value) -> DiagResult<String> {
    template::render(text, data)
        .map_err(|err| Diagnostics::error("Failed to render template", err.to_string()))
}

/// Returns its arguments unchanged.
pub struct InlineData;

#[async_trait]
impl DataSource for InlineData {
    async fn execute(&self, params: DataParams, _cancel: CancellationToken) -> DiagResult<Value> {
        Ok(params.args)
    }
}

/// Renders `value`, interpolating `{{ query }}` segments against the data context.
pub struct TextContent;

#[async_trait]
impl ContentProvider for TextContent {
    async fn execute(
        &self,
        params: ContentParams,
        _cancel: CancellationToken,
    ) -> DiagResult<ContentResult> {
        let text = match params.args.get("value") {
            Some(value) if value.as_str().is_none() => value.to_string(),
            _ => required_str(&params.args, "value", "text")?.to_string(),
        };
        let markdown = interpolate(&text, &params.data_context)?;
        Ok(Content::markdown(markdown).into())
    }
}

/// A markdown heading. `level` defaults to 1.
pub struct TitleContent;

#[async_trait]
impl ContentProvider for TitleContent {
    async fn execute(
        &self,
        params: ContentParams,
        _cancel: CancellationToken,
    ) -> DiagResult<ContentResult> {
        let text = interpolate(
            required_str(&params.args, "value", "title")?,
            &params.data_context,
        )?;
        let level = params
            .args
            .get("level")
            .and_then(Value::as_i64)
            .unwrap_or(1)
            .clamp(1, 6);
        let meta = Value::map([("title", Value::from(text.as_str())), ("level", Value::from(level))]);
        Ok(Content::Element {
            markdown: format!("{} {}", "#".repeat(level as usize), text),
            meta: Some(meta),
        }
        .into())
    }
}

/// A table of contents built from the titles already in the tree.
///
/// Runs in the `end` phase so every other unit has rendered by then.
pub struct TocContent;

impl TocContent {
    fn collect(node: &Value, min: i64, max: i64, out: &mut Vec<String>) {
        if let Some(title) = node.get_path(&["meta", "extra", "title"]).and_then(Value::as_str) {
            let level = node
                .get_path(&["meta", "extra", "level"])
                .and_then(Value::as_i64)
                .unwrap_or(1);
            if (min..=max).contains(&level) {
                let indent = "  ".repeat((level - min) as usize);
                let anchor: String = title
                    .to_lowercase()
                    .chars()
                    .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-')
                    .map(|c| if c == ' ' { '-' } else { c })
                    .collect();
                out.push(format!("{}- [{}](#{})", indent, title, anchor));
            }
        }
        for child in node.get("children").and_then(Value::as_list).unwrap_or_default() {
            Self::collect(child, min, max, out);
        }
    }
}

#[async_trait]
impl ContentProvider for TocContent {
    fn invocation_order(&self) -> InvocationOrder {
        InvocationOrder::End
    }

    async fn execute(
        &self,
        params: ContentParams,
        _cancel: CancellationToken,
    ) -> DiagResult<ContentResult> {
        let min = params.args.get("start_level").and_then(Value::as_i64).unwrap_or(1);
        let max = params.args.get("end_level").and_then(Value::as_i64).unwrap_or(3);
        let mut lines = Vec::new();
        if let Some(tree) = params.data_context.get_path(&["document", "content"]) {
            Self::collect(tree, min, max, &mut lines);
        }
        debug!(entries = lines.len(), "built table of contents");
        Ok(Content::markdown(lines.join("\n")).into())
    }
}

/// Writes the document's markdown to `path`.
pub struct LocalFilePublisher;

#[async_trait]
impl Publisher for LocalFilePublisher {
    async fn execute(&self, params: PublishParams, cancel: CancellationToken) -> DiagResult<()> {
        let path = interpolate(
            required_str(&params.args, "path", "local_file")?,
            &params.data_context,
        )?;
        let path = PathBuf::from(path);
        if cancel.is_cancelled() {
            return Err(Diagnostics::error("Publish cancelled", path.display().to_string()));
        }
        let io_error = |err: std::io::Error| {
            Diagnostics::error(
                "Failed to write output file",
                format!("{}: {}", path.display(), err),
            )
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        let mut markdown = params.content.markdown();
        markdown.push('\n');
        tokio::fs::write(&path, markdown).await.map_err(io_error)?;
        info!(document = %params.document_name, path = %path.display(), "published document");
        Ok(())
    }
}
