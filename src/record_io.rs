//! Record container files and the per-record compression wrapper
//!
//! Record files use TFRecord framing:
//!
//! ```text
//! u64 LE length | u32 masked crc32c(length) | data | u32 masked crc32c(data)
//! ```
//!
//! A file is stored plain, as gzip members, or as a zstd stream; the choice
//! is made by extension on read and by configuration on write.

use crate::error::{ShuffleContext, ShuffleError, ShuffleResult};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;

const MASK_DELTA: u32 = 0xa282_ead8;
const ZSTD_LEVEL: i32 = 3;

/// Stream compression of a whole record file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

impl Compression {
    /// File extension used for shards written with this compression
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => "tfrecord",
            Compression::Gzip => "tfrecord.gz",
            Compression::Zstd => "tfrecord.zst",
        }
    }

    /// Infer compression of an existing file from its name
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz") | Some("gzip") => Compression::Gzip,
            Some("zst") | Some("zstd") => Compression::Zstd,
            _ => Compression::None,
        }
    }
}

impl FromStr for Compression {
    type Err = ShuffleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "plain" => Ok(Compression::None),
            "gzip" | "gz" => Ok(Compression::Gzip),
            "zstd" | "zst" => Ok(Compression::Zstd),
            _ => Err(ShuffleError::config(&format!("unknown compression: {s}"))),
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Zstd => "zstd",
        };
        write!(f, "{name}")
    }
}

#[inline]
fn masked_crc(data: &[u8]) -> u32 {
    let crc = crc32c::crc32c(data);
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

/// Reads framed records from any byte source
pub struct RecordReader<R: Read> {
    inner: R,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next record, or `None` at a clean end of stream
    pub fn read_record(&mut self) -> ShuffleResult<Option<Vec<u8>>> {
        let mut header = [0u8; 8];
        if !self.fill_or_eof(&mut header)? {
            return Ok(None);
        }

        let mut crc = [0u8; 4];
        self.read_exact_framed(&mut crc, "length checksum")?;
        if u32::from_le_bytes(crc) != masked_crc(&header) {
            return Err(ShuffleError::malformed("length checksum mismatch"));
        }

        let len = usize::try_from(u64::from_le_bytes(header))
            .map_err(|_| ShuffleError::malformed("record length does not fit in memory"))?;
        let mut data = vec![0u8; len];
        self.read_exact_framed(&mut data, "record data")?;

        self.read_exact_framed(&mut crc, "data checksum")?;
        if u32::from_le_bytes(crc) != masked_crc(&data) {
            return Err(ShuffleError::malformed("data checksum mismatch"));
        }

        Ok(Some(data))
    }

    /// Fill `buf` completely; `Ok(false)` if the stream ended before any byte
    fn fill_or_eof(&mut self, buf: &mut [u8]) -> ShuffleResult<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(false),
                Ok(0) => return Err(ShuffleError::malformed("truncated record header")),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    fn read_exact_framed(&mut self, buf: &mut [u8], what: &str) -> ShuffleResult<()> {
        self.inner.read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                ShuffleError::malformed(&format!("truncated {what}"))
            } else {
                ShuffleError::Io(e)
            }
        })
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = ShuffleResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

/// Writes framed records to any byte sink
pub struct RecordWriter<W: Write> {
    inner: W,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_record(&mut self, data: &[u8]) -> io::Result<()> {
        let header = (data.len() as u64).to_le_bytes();
        self.inner.write_all(&header)?;
        self.inner.write_all(&masked_crc(&header).to_le_bytes())?;
        self.inner.write_all(data)?;
        self.inner.write_all(&masked_crc(data).to_le_bytes())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Open a record file, decompressing according to its extension
pub fn open_record_file(path: &Path) -> ShuffleResult<RecordReader<Box<dyn Read>>> {
    let name = path.display().to_string();
    let file = File::open(path).with_file_context(&name)?;
    let reader: Box<dyn Read> = match Compression::from_path(path) {
        Compression::None => Box::new(BufReader::new(file)),
        Compression::Gzip => Box::new(MultiGzDecoder::new(BufReader::new(file))),
        Compression::Zstd => {
            Box::new(zstd::stream::read::Decoder::new(file).with_file_context(&name)?)
        }
    };
    Ok(RecordReader::new(reader))
}

/// Byte sink of an output record file
pub enum RecordFileSink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
    Zstd(zstd::stream::write::Encoder<'static, BufWriter<File>>),
}

impl Write for RecordFileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            RecordFileSink::Plain(w) => w.write(buf),
            RecordFileSink::Gzip(w) => w.write(buf),
            RecordFileSink::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            RecordFileSink::Plain(w) => w.flush(),
            RecordFileSink::Gzip(w) => w.flush(),
            RecordFileSink::Zstd(w) => w.flush(),
        }
    }
}

impl RecordFileSink {
    /// Flush buffers and terminate the compression stream
    pub fn finish(self) -> io::Result<()> {
        let mut inner = match self {
            RecordFileSink::Plain(w) => w,
            RecordFileSink::Gzip(w) => w.finish()?,
            RecordFileSink::Zstd(w) => w.finish()?,
        };
        inner.flush()?;
        inner.get_ref().sync_all()
    }
}

/// Create (truncating) a record file with the given compression
pub fn create_record_file(
    path: &Path,
    compression: Compression,
) -> ShuffleResult<RecordWriter<RecordFileSink>> {
    let name = path.display().to_string();
    let file = BufWriter::new(File::create(path).with_file_context(&name)?);
    let sink = match compression {
        Compression::None => RecordFileSink::Plain(file),
        Compression::Gzip => {
            RecordFileSink::Gzip(GzEncoder::new(file, flate2::Compression::default()))
        }
        Compression::Zstd => RecordFileSink::Zstd(
            zstd::stream::write::Encoder::new(file, ZSTD_LEVEL).with_file_context(&name)?,
        ),
    };
    Ok(RecordWriter::new(sink))
}

/// Compress one record for transient storage (memory or spill files)
pub fn pack_record(record: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(record)
}

/// Inverse of [`pack_record`]
pub fn unpack_record(packed: &[u8]) -> ShuffleResult<Vec<u8>> {
    lz4_flex::decompress_size_prepended(packed)
        .map_err(|e| ShuffleError::internal(&format!("corrupt packed record: {e}")))
}
