//! Text decoding for bytes produced by the target.

/// Decode UTF-16LE. Trailing bytes the next fragment may complete (an odd
/// byte, a high surrogate, or both) are returned undecoded.
pub fn decode_utf16le(bytes: &[u8]) -> (String, &[u8]) {
    let mut end = bytes.len() & !1;
    if end >= 2 && is_high_surrogate(u16::from_le_bytes([bytes[end - 2], bytes[end - 1]])) {
        end -= 2;
    }
    let units: Vec<u16> = bytes[..end]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    (String::from_utf16_lossy(&units), &bytes[end..])
}

fn is_high_surrogate(unit: u16) -> bool {
    (0xD800..=0xDBFF).contains(&unit)
}

/// Decode text in the system ANSI code page.
#[cfg(windows)]
pub fn decode_ansi(bytes: &[u8]) -> String {
    use windows_sys::Win32::Globalization::{MultiByteToWideChar, CP_ACP};

    if bytes.is_empty() {
        return String::new();
    }
    let Ok(len) = i32::try_from(bytes.len()) else {
        return String::from_utf8_lossy(bytes).into_owned();
    };
    // One UTF-16 unit per input byte is always enough.
    let mut wide = vec![0u16; bytes.len()];
    let written = unsafe {
        MultiByteToWideChar(CP_ACP, 0, bytes.as_ptr(), len, wide.as_mut_ptr(), len)
    };
    if written <= 0 {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    String::from_utf16_lossy(&wide[..written as usize])
}

/// Without a Windows code page the bytes are taken as UTF-8.
#[cfg(not(windows))]
pub fn decode_ansi(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
