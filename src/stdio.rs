use std::fmt;
use std::io::{self, Read, Write};
use std::process::Stdio;

const RELAY_CHUNK: usize = 8192;

/// Destination for one of the child's output streams
#[derive(Default)]
pub enum Sink {
    /// Hand the supervisor's own descriptor to the child
    ///
    /// Nothing is copied; the child writes straight to the terminal, which
    /// keeps TTY detection working for interactive agents.
    #[default]
    Inherit,
    /// Discard the stream
    Null,
    /// Relay the stream into a writer as data arrives
    Writer(Box<dyn Write + Send>),
}

impl Sink {
    pub fn writer(writer: impl Write + Send + 'static) -> Self {
        Self::Writer(Box::new(writer))
    }

    pub(crate) fn stdio(&self) -> Stdio {
        match self {
            Self::Inherit => Stdio::inherit(),
            Self::Null => Stdio::null(),
            Self::Writer(_) => Stdio::piped(),
        }
    }

    pub(crate) fn into_writer(self) -> Option<Box<dyn Write + Send>> {
        match self {
            Self::Writer(writer) => Some(writer),
            Self::Inherit | Self::Null => None,
        }
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inherit => f.write_str("Inherit"),
            Self::Null => f.write_str("Null"),
            Self::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

/// Copy `reader` into `writer` chunk by chunk, flushing after every chunk
///
/// Returns once the reader hits end of file.
pub(crate) fn relay(mut reader: impl Read, writer: &mut dyn Write) -> io::Result<u64> {
    let mut buf = [0u8; RELAY_CHUNK];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        writer.flush()?;
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingWriter {
        data: Vec<u8>,
        flushes: usize,
    }

    impl Write for CountingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn test_relay_copies_and_flushes() {
        let mut writer = CountingWriter {
            data: Vec::new(),
            flushes: 0,
        };
        let copied = relay(&b"hello sandbox"[..], &mut writer).unwrap();

        assert_eq!(copied, 13);
        assert_eq!(writer.data, b"hello sandbox");
        assert!(writer.flushes >= 1);
    }

    #[test]
    fn test_relay_empty_stream() {
        let mut out = Vec::new();
        assert_eq!(relay(io::empty(), &mut out).unwrap(), 0);
        assert!(out.is_empty());
    }
}
