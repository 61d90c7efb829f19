//! Lightweight CSV writing with basic quoting and numeric formatting.
//!
//! Cells containing a comma, quote, carriage return, or newline are quoted
//! with embedded quotes doubled. Floating point values go through
//! [`float_cell`] so every emitter shares the same fixed 17-digit precision.

use std::borrow::Cow;
use std::io::{self, Write};

/// Writes rows of pre-formatted cells to an underlying writer.
#[derive(Debug)]
pub struct CsvWriter<W: Write> {
    inner: W,
}

impl<W: Write> CsvWriter<W> {
    /// Wraps a writer.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes one row, quoting cells as needed.
    ///
    /// # Errors
    /// Propagates failures of the underlying writer.
    pub fn write_row<I, S>(&mut self, cells: I) -> io::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for (index, cell) in cells.into_iter().enumerate() {
            if index > 0 {
                self.inner.write_all(b",")?;
            }
            self.inner.write_all(escape_cell(cell.as_ref()).as_bytes())?;
        }
        self.inner.write_all(b"\n")
    }

    /// Flushes and returns the underlying writer.
    ///
    /// # Errors
    /// Propagates failures of the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Formats a float with fixed 17-digit precision.
#[must_use]
pub fn float_cell(value: f64) -> String {
    format!("{value:.17}")
}

fn needs_quoting(cell: &str) -> bool {
    cell.contains([',', '"', '\n', '\r'])
}

fn escape_cell(cell: &str) -> Cow<'_, str> {
    if needs_quoting(cell) {
        Cow::Owned(format!("\"{}\"", cell.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    fn render(rows: &[Vec<&str>]) -> String {
        let mut csv = CsvWriter::new(Vec::new());
        for row in rows {
            csv.write_row(row.iter().copied()).expect("write succeeds");
        }
        String::from_utf8(csv.finish().expect("flush succeeds")).expect("utf8 output")
    }

    #[test]
    fn writes_plain_rows() {
        let text = render(&[vec!["a", "b", "c"], vec!["1", "2", "3"]]);
        assert_eq!(text, "a,b,c\n1,2,3\n");
    }

    #[rstest]
    #[case::comma("a,b", "\"a,b\"")]
    #[case::quote("say \"hi\"", "\"say \"\"hi\"\"\"")]
    #[case::newline("line\nbreak", "\"line\nbreak\"")]
    #[case::plain("plain", "plain")]
    fn quotes_only_when_needed(#[case] cell: &str, #[case] expected: &str) {
        let text = render(&[vec![cell]]);
        assert_eq!(text, format!("{expected}\n"));
    }

    #[test]
    fn float_cells_use_fixed_precision() {
        assert_eq!(float_cell(0.5), "0.50000000000000000");
        assert!(float_cell(1.0 / 3.0).starts_with("0.3333333333333333"));
    }
}
