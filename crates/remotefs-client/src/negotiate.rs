//! Probe-then-fill buffer negotiation.
//!
//! Variable-length results (xattr values, xattr name lists) are fetched by
//! asking for the size with no buffer, allocating exactly that much, and
//! filling. If the result grew in between, the fill fails `OutOfRange` and
//! the size is probed again. The number of rounds is bounded so a store
//! whose answer keeps growing cannot spin a caller forever.

use remotefs_types::{FsError, FsResult};

/// Probe/fill rounds before giving up.
pub const MAX_NEGOTIATION_ROUNDS: usize = 8;

/// Run the negotiation with `call`, which behaves like a two-phase getter:
/// `None` (or an empty slice) returns the needed size, a slice is filled and
/// the written length returned, and a too-small slice fails `OutOfRange`.
pub fn negotiate<F>(what: &str, mut call: F) -> FsResult<Vec<u8>>
where
    F: FnMut(Option<&mut [u8]>) -> FsResult<usize>,
{
    for round in 0..MAX_NEGOTIATION_ROUNDS {
        let size = call(None)?;
        let mut buf = vec![0u8; size];
        match call(Some(&mut buf)) {
            Ok(written) => {
                buf.truncate(written);
                return Ok(buf);
            }
            Err(e) if e.is_retryable() => {
                tracing::debug!(what, round, size, "result outgrew probed size");
            }
            Err(e) => return Err(e),
        }
    }
    tracing::warn!(
        what,
        rounds = MAX_NEGOTIATION_ROUNDS,
        "buffer negotiation did not settle"
    );
    Err(FsError::out_of_range(format!(
        "{what}: size kept changing after {MAX_NEGOTIATION_ROUNDS} rounds"
    )))
}

/// Copy `data` into an optional caller buffer following the two-phase rules.
pub fn fill(data: &[u8], buf: Option<&mut [u8]>) -> FsResult<usize> {
    match buf {
        None => Ok(data.len()),
        Some(buf) if buf.is_empty() => Ok(data.len()),
        Some(buf) if buf.len() < data.len() => Err(FsError::out_of_range(format!(
            "need {} bytes, buffer holds {}",
            data.len(),
            buf.len()
        ))),
        Some(buf) => {
            buf[..data.len()].copy_from_slice(data);
            Ok(data.len())
        }
    }
}

/// Join names into the NUL-terminated wire list.
pub fn join_nul_list<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<u8> {
    let mut out = Vec::new();
    for name in names {
        out.extend_from_slice(name.as_bytes());
        out.push(0);
    }
    out
}

/// Split a NUL-terminated name list.
pub fn split_nul_list(buf: &[u8]) -> Vec<String> {
    buf.split(|&b| b == 0)
        .filter(|name| !name.is_empty())
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use remotefs_types::FsErrorKind;
    use std::cell::Cell;

    #[test]
    fn test_fill_two_phase() {
        assert_eq!(fill(b"abc", None).unwrap(), 3);
        assert_eq!(fill(b"abc", Some(&mut [])).unwrap(), 3);

        let mut small = [0u8; 2];
        let err = fill(b"abc", Some(&mut small)).unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::OutOfRange);

        let mut big = [0u8; 8];
        assert_eq!(fill(b"abc", Some(&mut big)).unwrap(), 3);
        assert_eq!(&big[..3], b"abc");
    }

    #[test]
    fn test_negotiate_stable() {
        let value = b"hello".to_vec();
        let got = negotiate("test", |buf| fill(&value, buf)).unwrap();
        assert_eq!(got, value);
    }

    #[test]
    fn test_negotiate_recovers_from_growth() {
        // Grows once between the first probe and fill, then settles.
        let calls = Cell::new(0);
        let got = negotiate("test", |buf| {
            calls.set(calls.get() + 1);
            let value: &[u8] = if calls.get() <= 1 { b"ab" } else { b"abcd" };
            fill(value, buf)
        })
        .unwrap();
        assert_eq!(got, b"abcd");
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn test_negotiate_gives_up() {
        let size = Cell::new(1usize);
        let err = negotiate("test", |buf| {
            let value = vec![b'x'; size.get()];
            size.set(size.get() + 1);
            fill(&value, buf)
        })
        .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::OutOfRange);
        assert_eq!(size.get(), 1 + 2 * MAX_NEGOTIATION_ROUNDS);
    }

    #[test]
    fn test_negotiate_passes_other_errors() {
        let err = negotiate("test", |_| Err(FsError::no_data("user.x"))).unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::NoData);
    }

    #[test]
    fn test_nul_lists() {
        let list = join_nul_list(["user.a", "user.b"]);
        assert_eq!(list, b"user.a\0user.b\0");
        assert_eq!(split_nul_list(&list), ["user.a", "user.b"]);
        assert!(split_nul_list(b"").is_empty());
    }
}
