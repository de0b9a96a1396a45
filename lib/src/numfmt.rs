//! Allocation-free number formatting for debug output paths.

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

pub const HEX_U32_LEN: usize = 10;

/// Format `value` as `0x` followed by eight upper-case hex digits.
pub fn u32_to_hex(value: u32, buffer: &mut [u8; HEX_U32_LEN]) -> &[u8] {
    buffer[0] = b'0';
    buffer[1] = b'x';
    for i in 0..8 {
        let nibble = (value >> ((7 - i) * 4)) & 0xF;
        buffer[2 + i] = HEX_DIGITS[nibble as usize];
    }
    &buffer[..]
}
