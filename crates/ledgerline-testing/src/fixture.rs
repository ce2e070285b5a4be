//! Fixture loader for canonical provider payloads under `fixtures/`.

use std::path::{Path, PathBuf};

use serde_json::Value;

/// Load fixture files relative to the workspace root.
///
/// # Example
/// ```no_run
/// use ledgerline_testing::fixture::Fixture;
/// let event = Fixture::load("fixtures/stripe/checkout_session_completed.json");
/// ```
pub struct Fixture;

impl Fixture {
    /// Load and parse a fixture JSON file at `workspace_root/path`.
    ///
    /// Panics if the file is missing or invalid JSON.
    pub fn load(relative_path: &str) -> Value {
        let bytes = Self::load_bytes(relative_path);
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|e| panic!("invalid JSON in fixture {relative_path}: {e}"))
    }

    /// Load a fixture's raw bytes. Webhook tests sign these exact bytes.
    pub fn load_bytes(relative_path: &str) -> Vec<u8> {
        let full_path = workspace_root().join(relative_path);
        std::fs::read(&full_path)
            .unwrap_or_else(|e| panic!("fixture not found at {}: {e}", full_path.display()))
    }
}

fn workspace_root() -> PathBuf {
    std::env::var("CARGO_MANIFEST_DIR")
        .map(|dir| {
            // Walk up from the crate dir to the directory holding `fixtures/`.
            let p = Path::new(&dir);
            p.ancestors()
                .find(|a| a.join("fixtures").is_dir())
                .unwrap_or(p)
                .to_path_buf()
        })
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_default())
}
