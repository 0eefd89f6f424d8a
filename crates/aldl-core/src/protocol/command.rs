//! ALDL request frames
//!
//! A request frame is `device id, 0x55 + body length, mode, payload..., checksum`,
//! where the body is the mode byte plus payload and the checksum brings the
//! byte sum of the whole frame to zero (mod 256).

/// Bias added to the body length in the second frame byte
pub const LENGTH_BIAS: u8 = 0x55;

/// Mode 1: transmit a data stream message
pub const MODE_DATA_STREAM: u8 = 0x01;

/// Two's-complement checksum of `bytes`
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    0u8.wrapping_sub(sum)
}

/// Whether a complete frame (checksum included) sums to zero
pub fn verify_checksum(frame: &[u8]) -> bool {
    !frame.is_empty() && checksum(frame) == 0
}

/// Build a request frame for `device_id`
pub fn build_request(device_id: u8, mode: u8, payload: &[u8]) -> Vec<u8> {
    let body_len = 1 + payload.len();
    let mut frame = Vec::with_capacity(body_len + 3);
    frame.push(device_id);
    frame.push(LENGTH_BIAS.wrapping_add(body_len as u8));
    frame.push(mode);
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame));
    frame
}

/// Mode 1 request for data stream `message`
pub fn data_stream_request(device_id: u8, message: u8) -> Vec<u8> {
    build_request(device_id, MODE_DATA_STREAM, &[message])
}
