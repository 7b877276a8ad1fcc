//! Shared SMF-building helpers for the integration suite. Not a test file
//! itself (see `tests/end_to_end.rs`'s `mod common;`).

pub fn encode_vlq(mut value: u32) -> Vec<u8> {
    let mut stack = vec![(value & 0x7F) as u8];
    value >>= 7;
    while value > 0 {
        stack.push(((value & 0x7F) as u8) | 0x80);
        value >>= 7;
    }
    stack.reverse();
    stack
}

pub fn build_smf(num_tracks: u16, ppq: u16, track_bodies: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"MThd\0\0\0\x06");
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&num_tracks.to_be_bytes());
    out.extend_from_slice(&ppq.to_be_bytes());
    for body in track_bodies {
        out.extend_from_slice(b"MTrk");
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(body);
    }
    out
}

/// Appends one event (delta ticks + raw status/data bytes) to a track body.
pub fn push_event(body: &mut Vec<u8>, delta_ticks: u32, bytes: &[u8]) {
    body.extend(encode_vlq(delta_ticks));
    body.extend_from_slice(bytes);
}

pub fn end_of_track(body: &mut Vec<u8>, delta_ticks: u32) {
    push_event(body, delta_ticks, &[0xFF, 0x2F, 0x00]);
}
