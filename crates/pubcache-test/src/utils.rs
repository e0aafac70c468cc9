//! Shared helpers for the integration tests.

use std::sync::{Arc, Once};

use bytes::Bytes;
use pubcache_common::config::SnapDictionaryConfig;
use pubcache_common::types::ContentNode;
use pubcache_snapdict::{CacheKey, CacheValue, SnapDictionary};
use tracing::debug;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per process.
///
/// The filter comes from `RUST_LOG` and defaults to warnings only.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_names(true)
            .try_init();
    });
}

/// Creates a dictionary with automatic collection off.
pub fn test_dictionary<K: CacheKey, V: CacheValue>() -> SnapDictionary<K, V> {
    init_tracing();
    let dict = SnapDictionary::with_config(SnapDictionaryConfig::for_testing())
        .unwrap_or_else(|e| panic!("test config rejected: {e}"));
    debug!(dictionary = %dict.id(), "test dictionary created");
    dict
}

/// Builds a published content item under the root content node 1046.
pub fn content(id: i32, title: &str) -> Arc<ContentNode> {
    let data = serde_json::json!({ "title": title }).to_string();
    Arc::new(
        ContentNode::new(id, 0x1046_0000 + u128::from(id.unsigned_abs()))
            .with_path(format!("-1,1046,{id}"))
            .with_sort_order(id)
            .with_content_type(1)
            .with_data(Bytes::from(data)),
    )
}

/// Reads the `title` property back out of a content item.
pub fn title(node: &ContentNode) -> Option<String> {
    let data = node.data.as_ref()?;
    let value: serde_json::Value = serde_json::from_slice(data).ok()?;
    value.get("title")?.as_str().map(str::to_string)
}
