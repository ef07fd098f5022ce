mod circular_test;
mod data_test;
mod dynamic_test;
mod memoization_test;
mod ordering_test;
mod publish_test;
mod query_test;
mod round_trip_test;
mod tags_test;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fabric::plugin::{Content, ContentResult, InvocationOrder, MockContentProvider, PluginRegistry};
use fabric::{Engine, EngineConfig};

/// A mock provider in `order` that sleeps `delay_ms`, records `label` in `log` and
/// renders `label`.
pub fn recording(
    label: &'static str,
    order: InvocationOrder,
    delay_ms: u64,
    log: Arc<Mutex<Vec<&'static str>>>,
) -> MockContentProvider {
    let mut provider = MockContentProvider::new();
    provider.expect_invocation_order().return_const(order);
    provider.expect_execute().returning(move |_, _| {
        std::thread::sleep(Duration::from_millis(delay_ms));
        log.lock().unwrap().push(label);
        Ok(ContentResult::from(Content::markdown(label)))
    });
    provider
}

pub fn engine_with(providers: Vec<(&str, MockContentProvider)>) -> Engine {
    let registry = PluginRegistry::with_builtins();
    for (name, provider) in providers {
        registry.register_content_provider(name, Arc::new(provider));
    }
    Engine::new(Arc::new(registry), EngineConfig::default())
}

pub fn tags(tags: &[&str]) -> Vec<String> {
    tags.iter().map(|t| t.to_string()).collect()
}
