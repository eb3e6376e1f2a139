use liblzma::write::XzEncoder;
use std::fs::File;
use std::io::{BufWriter, Error, IntoInnerError, Write};

/// Flushes any trailing stream state and hands back the inner writer.
pub trait Finish<O> {
    fn finish(self) -> Result<O, Error>;
}

impl<W: Write> Finish<W> for XzEncoder<W> {
    fn finish(self) -> Result<W, Error> {
        self.finish()
    }
}

impl<W: Write> Finish<W> for BufWriter<W> {
    fn finish(self) -> Result<W, Error> {
        self.into_inner().map_err(IntoInnerError::into_error)
    }
}

/// Finishes the stream, then forces the underlying file to disk.
pub fn finish_and_sync<F: Finish<File>>(writer: F) -> Result<File, Error> {
    let file = writer.finish()?;
    file.sync_all()?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct TestFinisher {
        inner: Cursor<Vec<u8>>,
        should_fail: bool,
    }

    impl Finish<Cursor<Vec<u8>>> for TestFinisher {
        fn finish(self) -> Result<Cursor<Vec<u8>>, Error> {
            if self.should_fail {
                Err(Error::other("Test failure"))
            } else {
                Ok(self.inner)
            }
        }
    }

    #[test]
    fn test_finish_trait_success() {
        let finisher = TestFinisher {
            inner: Cursor::new(vec![1, 2, 3]),
            should_fail: false,
        };

        let returned_cursor = finisher.finish().unwrap();
        assert_eq!(returned_cursor.get_ref(), &vec![1, 2, 3]);
    }

    #[test]
    fn test_finish_trait_failure() {
        let finisher = TestFinisher {
            inner: Cursor::new(vec![1, 2, 3]),
            should_fail: true,
        };

        let error = finisher.finish().unwrap_err();
        assert_eq!(error.kind(), std::io::ErrorKind::Other);
        assert_eq!(error.to_string(), "Test failure");
    }

    #[test]
    fn test_xz_encoder_finish_impl() {
        let encoder = XzEncoder::new(Cursor::new(Vec::new()), 1);
        let cursor = Finish::finish(encoder).unwrap();
        assert!(!cursor.get_ref().is_empty());
    }

    #[test]
    fn test_finish_and_sync_writes_file() {
        let file = tempfile::tempfile().unwrap();
        let mut writer = BufWriter::new(file);
        writer.write_all(b"payload").unwrap();
        let file = finish_and_sync(writer).unwrap();
        assert_eq!(file.metadata().unwrap().len(), 7);
    }
}
