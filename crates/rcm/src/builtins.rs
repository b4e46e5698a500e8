//! Functions registered as static symbols by `rcm run`.
//!
//! Integer arguments and results travel as little-endian `i32` payloads.

use std::thread;
use std::time::Duration;

use bytes::BytesMut;
use rcm_server::FxnDesc;

pub fn builtin_fxns() -> Vec<FxnDesc> {
    vec![
        FxnDesc::new("inc", inc),
        FxnDesc::new("echo", echo),
        FxnDesc::new("sleep_ms", sleep_ms),
        FxnDesc::new("fail", fail),
    ]
}

pub fn encode_int(value: i32) -> [u8; 4] {
    value.to_le_bytes()
}

pub fn decode_int(payload: &[u8]) -> Option<i32> {
    let bytes: [u8; 4] = payload.get(..4)?.try_into().ok()?;
    Some(i32::from_le_bytes(bytes))
}

/// Replace the payload integer with its successor.
fn inc(payload: &mut BytesMut) -> i32 {
    let Some(value) = decode_int(payload) else {
        return -1;
    };
    let next = value.wrapping_add(1);
    payload.clear();
    payload.extend_from_slice(&encode_int(next));
    next
}

/// Leave the payload untouched; the result is its length.
fn echo(payload: &mut BytesMut) -> i32 {
    i32::try_from(payload.len()).unwrap_or(i32::MAX)
}

fn sleep_ms(payload: &mut BytesMut) -> i32 {
    match decode_int(payload) {
        Some(ms) if ms >= 0 => {
            thread::sleep(Duration::from_millis(ms as u64));
            ms
        }
        _ => -1,
    }
}

fn fail(_payload: &mut BytesMut) -> i32 {
    -1
}
