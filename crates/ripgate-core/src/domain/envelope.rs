//! Path-labelled envelope around chunk text, and content fingerprints.
//!
//! A wrapped chunk looks like:
//!
//! ```text
//! File: `src/main.rs`
//! ```shell
//! <chunk text>```
//! ```
//!
//! `wrap` and `unwrap` must stay exact inverses; `Chunk::verify_fingerprint`
//! checks that on every embedding call.

use sha2::{Digest, Sha256};

const HEADER_PREFIX: &str = "File: `";
const HEADER_SUFFIX: &str = "`\n";
const FENCE_OPEN: &str = "```shell\n";
const FENCE_CLOSE: &str = "```";

/// Wrap `text` in the path-labelled envelope.
#[must_use]
pub fn wrap(path: &str, text: &str) -> String {
    let mut out = String::with_capacity(
        HEADER_PREFIX.len()
            + path.len()
            + HEADER_SUFFIX.len()
            + FENCE_OPEN.len()
            + text.len()
            + FENCE_CLOSE.len(),
    );
    out.push_str(HEADER_PREFIX);
    out.push_str(path);
    out.push_str(HEADER_SUFFIX);
    out.push_str(FENCE_OPEN);
    out.push_str(text);
    out.push_str(FENCE_CLOSE);
    out
}

/// Extract the plain text from an envelope.
///
/// Drops the header line, then one opening fence and one closing fence if
/// present. Input without a header line is returned as is.
#[must_use]
pub fn unwrap(envelope: &str) -> &str {
    let Some(newline) = envelope.find('\n') else {
        return envelope;
    };
    let body = &envelope[newline + 1..];
    let body = body.strip_prefix(FENCE_OPEN).unwrap_or(body);
    body.strip_suffix(FENCE_CLOSE).unwrap_or(body)
}

/// Lowercase hex SHA-256 of `text`.
#[must_use]
pub fn fingerprint(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_layout() {
        assert_eq!(
            wrap("src/lib.rs", "fn main() {}\n"),
            "File: `src/lib.rs`\n```shell\nfn main() {}\n```"
        );
    }

    #[test]
    fn test_unwrap_inverts_wrap() {
        for text in ["", "a\n", "one\ntwo", "ends with tick`", "```\nfenced\n```\n"] {
            assert_eq!(unwrap(&wrap("p.txt", text)), text, "text: {text:?}");
        }
    }

    #[test]
    fn test_multiline_path_does_not_round_trip() {
        // The header is a single line; a path with a newline cannot round-trip.
        let wrapped = wrap("evil\npath", "body");
        assert_ne!(unwrap(&wrapped), "body");
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let a = fingerprint("hello\n");
        assert_eq!(a, fingerprint("hello\n"));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, fingerprint("hello"));
        assert_eq!(
            fingerprint(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
