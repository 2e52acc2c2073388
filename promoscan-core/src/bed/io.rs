use std::io::{self, BufRead};
use std::marker::PhantomData;
use std::str::FromStr;

/// An iterator over records of a BED reader.
///
/// This is created by calling [`Reader::into_records`].
pub struct IntoRecords<B, R> {
    inner: Reader<R>,
    buf: String,
    line: usize,
    phantom: PhantomData<B>,
}

impl<B, R> Iterator for IntoRecords<B, R>
where
    R: BufRead,
    B: FromStr,
    <B as FromStr>::Err: std::error::Error + Send + Sync + 'static,
{
    type Item = anyhow::Result<B>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.inner.read_record(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line += 1;
                    if is_header(&self.buf) {
                        continue;
                    }
                    let line = self.line;
                    return Some(self.buf.parse().map_err(|e: B::Err| {
                        anyhow::Error::new(e).context(format!("failed to parse line {}", line))
                    }));
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

/// A BED reader.
pub struct Reader<R> {
    inner: R,
}

impl<R> Reader<R>
where
    R: BufRead,
{
    /// Creates a BED reader.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads a single raw BED record.
    pub fn read_record(&mut self, buf: &mut String) -> io::Result<usize> {
        read_line(&mut self.inner, buf)
    }

    /// Returns an iterator over records starting from the current stream position.
    /// Comment, `track` and `browser` lines are skipped.
    pub fn into_records<B: FromStr>(self) -> IntoRecords<B, R> {
        IntoRecords {
            inner: self,
            buf: String::new(),
            line: 0,
            phantom: PhantomData,
        }
    }
}

fn is_header(line: &str) -> bool {
    line.is_empty()
        || line.starts_with('#')
        || line.starts_with("track")
        || line.starts_with("browser")
}

fn read_line<R>(reader: &mut R, buf: &mut String) -> io::Result<usize>
where
    R: BufRead,
{
    const LINE_FEED: char = '\n';
    const CARRIAGE_RETURN: char = '\r';

    match reader.read_line(buf) {
        Ok(0) => Ok(0),
        Ok(n) => {
            if buf.ends_with(LINE_FEED) {
                buf.pop();

                if buf.ends_with(CARRIAGE_RETURN) {
                    buf.pop();
                }
            }
            Ok(n)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bed::{BEDLike, NarrowPeak};

    #[test]
    fn test_read_line() {
        fn t(buf: &mut String, mut reader: &[u8], expected: &str) {
            buf.clear();
            read_line(&mut reader, buf).unwrap();
            assert_eq!(buf, expected);
        }

        let mut buf = String::new();

        t(&mut buf, b"chr1\t10\n", "chr1\t10");
        t(&mut buf, b"chr1\t10\r\n", "chr1\t10");
        t(&mut buf, b"chr1", "chr1");
    }

    #[test]
    fn test_read_records() {
        let data = b"\
track name=dnase
chr1\t200\t1000\tr1\t100\t+\t5.1\t-1\t-1\t20
# comment
chr2\t220\t2000\tr2\t2\t-\t3.3\t4.0\t-1\t-1
" as &[u8];
        let records: Vec<NarrowPeak> = Reader::new(data)
            .into_records()
            .collect::<anyhow::Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].start(), 201);
        assert_eq!(records[1].chrom(), "chr2");
        assert_eq!(records[1].p_value, Some(4.0));
    }

    #[test]
    fn test_bad_record_reports_line() {
        let data = b"chr1\t200\t1000\tr1\t100\t+\t5.1\t-1\t-1\t20\nchr1\tx\n" as &[u8];
        let err = Reader::new(data)
            .into_records::<NarrowPeak>()
            .collect::<anyhow::Result<Vec<_>>>()
            .unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
