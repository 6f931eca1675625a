//! Parsing the canonical rendering of parsed blocks changes nothing.

use orchestra_core::parser::{parse_response, render_blocks};
use proptest::prelude::*;

fn response_line() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("Create: src/new.rs".to_string()),
        Just("### src/lib.rs".to_string()),
        Just("- **Modify: `app/main.py`**".to_string()),
        Just("Delete: old/legacy.go".to_string()),
        Just("web/index.ts (new)".to_string()),
        Just("File: Dockerfile".to_string()),
        Just("```rust".to_string()),
        Just("```".to_string()),
        Just("````".to_string()),
        Just("~~~".to_string()),
        Just("~~~ {.toml}".to_string()),
        Just("fn main() {}".to_string()),
        Just("Here is the change you asked for.".to_string()),
        Just(String::new()),
        "[a-z ]{0,16}",
        "[ `~]{0,6}",
    ]
}

fn response() -> impl Strategy<Value = String> {
    prop::collection::vec(response_line(), 0..40).prop_map(|lines| lines.join("\n"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn render_then_parse_is_identity(text in response()) {
        let first = parse_response(&text);
        let rendered = render_blocks(&first.blocks);
        let second = parse_response(&rendered);
        prop_assert_eq!(&second.blocks, &first.blocks);
        prop_assert!(second.skipped.is_empty(), "skipped: {:?}", second.skipped);
    }

    #[test]
    fn parsed_paths_are_unique(text in response()) {
        let outcome = parse_response(&text);
        let mut paths: Vec<&str> = outcome.blocks.iter().map(|b| b.path.as_str()).collect();
        let total = paths.len();
        paths.sort_unstable();
        paths.dedup();
        prop_assert_eq!(paths.len(), total);
    }
}

#[test]
fn multi_file_response() {
    let text = "\
I'll split this into two files.

**src/config.rs**
```rust
pub struct Config;
```

Then update the entry point:

Modify: src/main.rs
```rust
mod config;
fn main() {}
```

Delete: src/old.rs
";
    let outcome = parse_response(text);
    let paths: Vec<&str> = outcome.blocks.iter().map(|b| b.path.as_str()).collect();
    assert_eq!(paths, vec!["src/config.rs", "src/main.rs", "src/old.rs"]);
    assert!(outcome.skipped.is_empty());
    assert_eq!(outcome.blocks[2].content, None);
}
