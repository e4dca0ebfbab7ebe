/// Internet checksum according to https://www.rfc-editor.org/rfc/rfc1071.
///
/// Words are accumulated in network byte order, so the result can be written
/// into a header with `to_be_bytes` on any host.
pub fn checksum(buf: &[u8]) -> u16 {
    // 64 bits hold the carries of any buffer that fits in memory.
    let mut sum: u64 = 0;

    let mut words = buf.chunks_exact(2);
    for word in &mut words {
        sum += u64::from(u16::from_be_bytes([word[0], word[1]]));
    }
    // An odd trailing byte is padded with a zero octet.
    if let Some(&last) = words.remainder().first() {
        sum += u64::from(u16::from_be_bytes([last, 0]));
    }

    // Fold carry bits back into the 16 least significant bits.
    while (sum >> 16) != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

/// Writes the checksum of `buf` into `buf[at..at + 2]`.
///
/// The field must be zero when this is called.
pub fn write_checksum(buf: &mut [u8], at: usize) {
    let sum = checksum(buf);
    buf[at..at + 2].copy_from_slice(&sum.to_be_bytes());
}
