//! Small helpers shared by the crate and its tests.

/// Formats the slice in a pretty hexdump way, for trace-level packet logs.
pub fn hexdump(slice: &[u8]) -> String {
    const WIDTH: usize = 16;
    let mut out = String::new();
    let mut offset = 0;

    for row in slice.chunks(WIDTH) {
        let row_hex: String = row.iter().map(|x| format!("{0:02X} ", x)).collect();

        // For each byte on this row, only print out the ascii printable ones.
        let row_str: String = row
            .iter()
            .map(|x| {
                if x.is_ascii_graphic() || *x == b' ' {
                    *x as char
                } else {
                    '.'
                }
            })
            .collect();

        out.push_str(&format!("{0:>08x}: {1:<48} {2:}\n", offset, row_hex, row_str));

        offset += WIDTH
    }

    out
}

#[cfg(test)]
mod tests {
    use super::hexdump;

    #[test]
    fn test_hexdump() {
        let dump = hexdump(b"\x00\x01abc");
        assert!(dump.starts_with("00000000: 00 01 61 62 63"));
        assert!(dump.trim_end().ends_with("..abc"));
    }
}
