//! MPEG program stream pack header - System Clock Reference extraction
//!
//! ```text
//!  name                   bits  notes
//!  pack start code        32    0x000001BA
//!  marker                 2     '01'
//!  SCR [32..30]           3
//!  marker                 1
//!  SCR [29..15]           15
//!  marker                 1
//!  SCR [14..0]            15
//!  marker                 1
//!
//!    [4]      [5]      [6]      [7]      [8]
//!  01xxx1xx xxxxxxxx xxxxx1xx xxxxxxxx xxxxx1xx
//! ```
//!
//! The SCR is a 90 kHz counter; only the first nine bytes of a block are
//! inspected.

/// Bytes of a block needed to recover the clock
pub const HEADER_LEN: usize = 9;

/// Pack start code
pub const PACK_START_CODE: [u8; 4] = [0x00, 0x00, 0x01, 0xBA];

/// Exclusive upper bound of the 33-bit clock domain
pub const SCR_MODULUS: u64 = 1 << 33;

/// Clock ticks per second
pub const SCR_HZ: u64 = 90_000;

/// Parse the System Clock Reference from the start of a block.
///
/// Returns `None` unless the pack start code and all marker bits are
/// present. Extra bytes beyond [`HEADER_LEN`] are ignored.
pub fn parse_scr(buf: &[u8]) -> Option<u64> {
    if buf.len() < HEADER_LEN || buf[..4] != PACK_START_CODE {
        return None;
    }

    let (b4, b5, b6, b7, b8) = (
        buf[4] as u64,
        buf[5] as u64,
        buf[6] as u64,
        buf[7] as u64,
        buf[8] as u64,
    );

    if b4 >> 6 != 0b01 || b4 & 0x04 == 0 || b6 & 0x04 == 0 || b8 & 0x04 == 0 {
        return None;
    }

    let scr = ((b4 >> 3) & 0x07) << 30
        | (b4 & 0x03) << 28
        | b5 << 20
        | (b6 >> 3) << 15
        | (b6 & 0x03) << 13
        | b7 << 5
        | b8 >> 3;

    Some(scr)
}

/// Build the nine header bytes carrying `scr` (reduced to 33 bits).
pub fn encode_scr(scr: u64) -> [u8; HEADER_LEN] {
    let v = scr % SCR_MODULUS;
    [
        PACK_START_CODE[0],
        PACK_START_CODE[1],
        PACK_START_CODE[2],
        PACK_START_CODE[3],
        0x40 | (((v >> 30) & 0x07) << 3) as u8 | 0x04 | ((v >> 28) & 0x03) as u8,
        ((v >> 20) & 0xFF) as u8,
        (((v >> 15) & 0x1F) << 3) as u8 | 0x04 | ((v >> 13) & 0x03) as u8,
        ((v >> 5) & 0xFF) as u8,
        ((v & 0x1F) << 3) as u8 | 0x04,
    ]
}

/// Seconds represented by a clock difference
pub fn ticks_to_secs(ticks: u64) -> f64 {
    ticks as f64 / SCR_HZ as f64
}
