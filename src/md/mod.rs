//! MD difference tag codec.
//!
//! The tag alternates match run lengths with mismatching reference bases and
//! `^`-prefixed deleted reference bases, e.g. `3^T2A0C4`. Skipped reference
//! regions (`N`) are not represented.

use crate::cigar::CigarOpKind;
use crate::frame::FrameLayout;
use crate::RecordError;

/// Base written for skipped reference positions the tag cannot describe.
pub const UNKNOWN_BASE: u8 = b'N';

/// Token of a parsed MD tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MdToken {
    /// Run of reference bases equal to the aligned query bases.
    Matches(usize),
    /// Single reference base differing from the aligned query base.
    Mismatch(u8),
    /// Reference bases absent from the query.
    Deletion(Vec<u8>),
}

/// Split an MD tag into tokens.
pub fn parse_md(tag: &str) -> Result<Vec<MdToken>, RecordError> {
    if tag.is_empty() {
        return Err(RecordError::tag_format(tag, "empty tag"));
    }

    let bytes = tag.as_bytes();
    let mut tokens = Vec::new();
    let mut idx = 0;
    while idx < bytes.len() {
        let byte = bytes[idx];
        if byte.is_ascii_digit() {
            let run_end = bytes[idx..]
                .iter()
                .position(|b| !b.is_ascii_digit())
                .map_or(bytes.len(), |len| idx + len);
            let run = tag[idx..run_end]
                .parse()
                .map_err(|_| RecordError::tag_format(tag, "match run out of range"))?;
            tokens.push(MdToken::Matches(run));
            idx = run_end;
        } else if byte == b'^' {
            let bases_end = bytes[idx + 1..]
                .iter()
                .position(|b| !b.is_ascii_alphabetic())
                .map_or(bytes.len(), |len| idx + 1 + len);
            if bases_end == idx + 1 {
                return Err(RecordError::tag_format(
                    tag,
                    format!("deletion at offset {idx} has no bases"),
                ));
            }
            tokens.push(MdToken::Deletion(
                bytes[idx + 1..bases_end].to_ascii_uppercase(),
            ));
            idx = bases_end;
        } else if byte.is_ascii_alphabetic() {
            tokens.push(MdToken::Mismatch(byte.to_ascii_uppercase()));
            idx += 1;
        } else {
            return Err(RecordError::tag_format(
                tag,
                format!("unexpected '{}' at offset {idx}", byte as char),
            ));
        }
    }

    Ok(tokens)
}

#[derive(Clone, Copy)]
enum TagBase {
    FromQuery,
    Mismatch(u8),
    Deleted(u8),
}

/// Reconstruct the reference span of an alignment from its MD tag.
///
/// `query` is the clip-trimmed query in reference orientation. The result
/// has one base per reference position of the layout; bases inside skipped
/// regions are [`UNKNOWN_BASE`].
pub fn decode_md(tag: &str, layout: &FrameLayout, query: &[u8]) -> Result<Vec<u8>, RecordError> {
    RecordError::check_len("query", layout.query_len(), query.len())?;

    let mut bases = parse_md(tag)?.into_iter().flat_map(|token| {
        let expanded: Vec<TagBase> = match token {
            MdToken::Matches(run) => vec![TagBase::FromQuery; run],
            MdToken::Mismatch(base) => vec![TagBase::Mismatch(base)],
            MdToken::Deletion(deleted) => deleted.into_iter().map(TagBase::Deleted).collect(),
        };
        expanded
    });

    let mut reference = Vec::with_capacity(layout.reference_len());
    for slot in layout.slots().iter().filter(|slot| slot.reference.is_some()) {
        if slot.kind == CigarOpKind::Skip {
            reference.push(UNKNOWN_BASE);
            continue;
        }
        let base = bases
            .next()
            .ok_or_else(|| RecordError::tag_format(tag, "tag shorter than alignment"))?;
        let decoded = match (base, slot.query) {
            (TagBase::FromQuery, Some(offset)) => query[offset].to_ascii_uppercase(),
            (TagBase::Mismatch(base), Some(_)) => base,
            (TagBase::Deleted(base), None) => base,
            (TagBase::Deleted(_), Some(_)) => {
                return Err(RecordError::tag_format(tag, "deletion over aligned bases"));
            }
            (_, None) => {
                return Err(RecordError::tag_format(tag, "aligned base over deletion"));
            }
        };
        reference.push(decoded);
    }

    if bases.next().is_some() {
        return Err(RecordError::tag_format(tag, "tag longer than alignment"));
    }
    Ok(reference)
}

/// Encode the differences between a reference span and the trimmed query.
///
/// The tag always starts and ends with a match run and separates adjacent
/// mismatch or deletion tokens with `0`.
pub fn encode_md(
    reference: &[u8],
    query: &[u8],
    layout: &FrameLayout,
) -> Result<String, RecordError> {
    RecordError::check_len("reference", layout.reference_len(), reference.len())?;
    RecordError::check_len("query", layout.query_len(), query.len())?;

    let mut md = String::new();
    let mut matches = 0usize;
    let mut in_deletion = false;
    for slot in layout.slots() {
        let ref_offset = match slot.reference {
            Some(offset) if slot.kind != CigarOpKind::Skip => offset,
            _ => {
                in_deletion = false;
                continue;
            }
        };
        let ref_base = reference[ref_offset];
        match slot.query {
            None => {
                if !in_deletion {
                    md.push_str(&matches.to_string());
                    md.push('^');
                    matches = 0;
                    in_deletion = true;
                }
                md.push(ref_base as char);
            }
            Some(query_offset) => {
                in_deletion = false;
                if ref_base.eq_ignore_ascii_case(&query[query_offset]) {
                    matches += 1;
                } else {
                    md.push_str(&matches.to_string());
                    md.push(ref_base as char);
                    matches = 0;
                }
            }
        }
    }
    md.push_str(&matches.to_string());
    Ok(md)
}
