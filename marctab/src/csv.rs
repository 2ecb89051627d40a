//! CSV egress for runs that write to a file instead of the database.

use std::io::{self, BufWriter, Write};

use crate::types::TabRow;

/// Writes output rows as CSV lines, one per row, in table column order.
///
/// Text columns are double-quoted with backslash escapes; integer columns
/// are written bare.
pub struct CsvWriter<W: Write> {
    inner: BufWriter<W>,
}

impl<W: Write> CsvWriter<W> {
    pub fn new(writer: W) -> Self {
        CsvWriter {
            inner: BufWriter::new(writer),
        }
    }

    pub fn write_row(&mut self, row: &TabRow) -> io::Result<()> {
        writeln!(
            self.inner,
            "{},{},{},{},{},{},{},{},{},{},{}",
            quote(&row.srs_id),
            row.line,
            quote(&row.matched_id),
            quote(&row.instance_hrid),
            quote(&row.instance_id),
            quote(&row.field),
            quote(&row.ind1),
            quote(&row.ind2),
            row.ord,
            quote(&row.sf),
            quote(&row.content),
        )
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Double-quotes a value, escaping quotes, backslashes, and the common
/// control characters with backslashes.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> TabRow {
        TabRow {
            srs_id: "AAA".to_string(),
            line: 3,
            matched_id: String::new(),
            instance_hrid: "in1".to_string(),
            instance_id: "INST1".to_string(),
            field: "999".to_string(),
            ind1: "f".to_string(),
            ind2: "f".to_string(),
            ord: 1,
            sf: "i".to_string(),
            content: "INST1".to_string(),
        }
    }

    #[test]
    fn quoting_escapes_specials() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(quote("back\\slash"), "\"back\\\\slash\"");
        assert_eq!(quote("a\nb"), "\"a\\nb\"");
        assert_eq!(quote("a\tb"), "\"a\\tb\"");
        assert_eq!(quote("\u{1}"), "\"\\x01\"");
    }

    #[test]
    fn writes_rows_in_column_order() {
        let mut buf = Vec::new();
        {
            let mut writer = CsvWriter::new(&mut buf);
            writer.write_row(&sample_row()).unwrap();
            writer.flush().unwrap();
        }
        let line = String::from_utf8(buf).unwrap();
        assert_eq!(
            line,
            "\"AAA\",3,\"\",\"in1\",\"INST1\",\"999\",\"f\",\"f\",1,\"i\",\"INST1\"\n"
        );
    }
}
