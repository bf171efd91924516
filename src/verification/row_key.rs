//! Row keys of the verification result table.
//!
//! A key is `run_ts|index_table|region|start_row|stop_row` with the run
//! timestamp in decimal. Fields are not escaped; a field containing the
//! separator produces a key that cannot be split back.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{timestamp::Timestamp, verification::RowKeyError};

pub const ROW_KEY_SEPARATOR: u8 = b'|';

const ROW_KEY_FIELDS: usize = 5;

/// Fields recovered from a result row key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRowKey {
    pub run_ts: Timestamp,
    pub index_table: Bytes,
    pub region: Bytes,
    pub start_row: Bytes,
    pub stop_row: Bytes,
}

pub fn generate_row_key(
    run_ts: Timestamp,
    index_table: &[u8],
    region: &[u8],
    start_row: &[u8],
    stop_row: &[u8],
) -> Bytes {
    let prefix = run_prefix(run_ts);
    let fields = [index_table, region, start_row, stop_row];
    let len = prefix.len() + fields.iter().map(|field| field.len() + 1).sum::<usize>();

    let mut key = BytesMut::with_capacity(len);
    key.put_slice(&prefix);
    for field in fields {
        key.put_u8(ROW_KEY_SEPARATOR);
        key.put_slice(field);
    }
    key.freeze()
}

pub fn split_row_key(key: &Bytes) -> Result<ResultRowKey, RowKeyError> {
    let fields = key
        .split(|byte| *byte == ROW_KEY_SEPARATOR)
        .collect::<Vec<_>>();
    if fields.len() != ROW_KEY_FIELDS {
        return Err(RowKeyError::FieldCount {
            row: key.clone(),
            found: fields.len(),
        });
    }
    let run_ts = std::str::from_utf8(fields[0])
        .ok()
        .and_then(|ts| ts.parse::<u64>().ok())
        .ok_or_else(|| RowKeyError::Timestamp { row: key.clone() })?;

    Ok(ResultRowKey {
        run_ts: Timestamp::new(run_ts),
        index_table: key.slice_ref(fields[1]),
        region: key.slice_ref(fields[2]),
        start_row: key.slice_ref(fields[3]),
        stop_row: key.slice_ref(fields[4]),
    })
}

/// Decimal run timestamp every row key of the run starts with.
pub fn run_prefix(run_ts: Timestamp) -> Bytes {
    Bytes::from(run_ts.to_string())
}

/// Smallest key greater than every key starting with `prefix`, or an empty
/// key (no upper bound) when there is none.
pub fn next_row_key_after_prefix(prefix: &[u8]) -> Bytes {
    match prefix.iter().rposition(|byte| *byte != u8::MAX) {
        Some(last) => {
            let mut next = BytesMut::from(&prefix[..=last]);
            next[last] += 1;
            next.freeze()
        }
        None => Bytes::new(),
    }
}
