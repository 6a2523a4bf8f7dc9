//! Decoding of the legacy source-text layout
//!
//! Format 1 logs stored definition text as a single digest string in which
//! every referenced object appeared as its position in double quotes, e.g.
//! `select "412" from "388"`. There was no separate reference list. The
//! references are recovered by scanning the digest. Legacy records are only
//! ever decoded; new records are always written in the current layout.

use std::sync::LazyLock;

use regex::Regex;

use super::errors::{CodecError, CodecResult};
use crate::physical::Source;
use crate::position::Position;

static DIGEST_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(\d+)""#).expect("static digest pattern"));

/// Recovers referenced positions from a legacy digest, in first-seen order.
pub fn decode_digest(offset: u64, digest: String) -> CodecResult<Source> {
    let mut refs = Vec::new();
    for caps in DIGEST_REF.captures_iter(&digest) {
        let raw = &caps[1];
        let value: u64 = raw.parse().map_err(|_| {
            CodecError::legacy(offset, format!("digest reference \"{}\" out of range", raw))
        })?;
        let pos = Position::new(value);
        if pos.is_local() || pos.is_none() {
            return Err(CodecError::legacy(
                offset,
                format!("digest reference {} is not a log position", value),
            ));
        }
        if !refs.contains(&pos) {
            refs.push(pos);
        }
    }

    Ok(Source { text: digest, refs })
}
