//! Fuzz testing for the redaction engine.
//!
//! Feeds arbitrary JSON documents and dotted paths to `redact` and checks
//! that it:
//!
//! - Never panics, whatever the document shape or path
//! - Never mutates its input
//! - Returns the input unchanged when the marker never appears in the output
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_redaction -- -max_total_time=60
//! ```

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use request_pipeline::redact::{REDACTED, redact};
use serde_json::Value;

#[derive(Debug, Arbitrary)]
struct Input {
    document: String,
    paths: Vec<String>,
}

fuzz_target!(|input: Input| {
    let Ok(tree) = serde_json::from_str::<Value>(&input.document) else {
        return;
    };
    let before = tree.clone();

    let out = redact(&tree, &input.paths);
    assert_eq!(tree, before);

    if !out.to_string().contains(REDACTED) {
        assert_eq!(out, tree);
    }
});
