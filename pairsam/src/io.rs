use std::{
    fmt::{self, Display},
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{anyhow, Context, Result};
use noodles::sam::alignment::RecordBuf;
use noodles::{bam, sam};

use crate::error::ConfigError;

/// Open a file, possibly compressed. Supports gzip and zstd.
pub fn open_file_for_read<P: AsRef<Path>>(file: P) -> io::Result<Box<dyn Read + Send>> {
    let reader: Box<dyn Read + Send> = match detect_compression(file.as_ref())? {
        Some(Compression::Gzip) => Box::new(flate2::read::MultiGzDecoder::new(File::open(file.as_ref())?)),
        Some(Compression::Zstd) => Box::new(zstd::stream::read::Decoder::new(File::open(file.as_ref())?)?),
        None => Box::new(File::open(file.as_ref())?),
    };
    Ok(reader)
}

/// Determine the file compression type. Supports gzip and zstd.
fn detect_compression<P: AsRef<Path>>(file: P) -> io::Result<Option<Compression>> {
    if flate2::read::MultiGzDecoder::new(File::open(file.as_ref())?).header().is_some() {
        Ok(Some(Compression::Gzip))
    } else if file.as_ref().extension().is_some_and(|ext| ext == "zst") {
        Ok(Some(Compression::Zstd))
    } else {
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Zstd,
}

impl TryFrom<&PathBuf> for Compression {
    type Error = anyhow::Error;

    fn try_from(path: &PathBuf) -> Result<Self> {
        let ext = path.extension().unwrap_or(std::ffi::OsStr::new(""));
        if ext == "gz" {
            Ok(Compression::Gzip)
        } else if ext == "zst" {
            Ok(Compression::Zstd)
        } else {
            Err(anyhow!("unsupported compression: {:?}", path))
        }
    }
}

/// Output file, optionally compressed.
///
/// Compressed streams end with a trailer. [`OutputWriter::try_finish`] writes
/// it and reports failures; dropping the writer without finishing writes it
/// too but ignores errors.
pub enum OutputWriter {
    Plain(BufWriter<File>),
    Gzip(flate2::write::GzEncoder<BufWriter<File>>),
    Zstd(zstd::stream::Encoder<'static, BufWriter<File>>),
    Stdout(BufWriter<io::Stdout>),
}

impl OutputWriter {
    pub fn stdout() -> Self {
        OutputWriter::Stdout(BufWriter::new(io::stdout()))
    }

    /// Write any compression trailer and flush everything to the file.
    pub fn try_finish(&mut self) -> io::Result<()> {
        match self {
            OutputWriter::Plain(w) => w.flush(),
            OutputWriter::Gzip(w) => {
                w.try_finish()?;
                w.get_mut().flush()
            }
            OutputWriter::Zstd(w) => {
                w.do_finish()?;
                w.get_mut().flush()
            }
            OutputWriter::Stdout(w) => w.flush(),
        }
    }
}

impl Write for OutputWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputWriter::Plain(w) => w.write(buf),
            OutputWriter::Gzip(w) => w.write(buf),
            OutputWriter::Zstd(w) => w.write(buf),
            OutputWriter::Stdout(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputWriter::Plain(w) => w.flush(),
            OutputWriter::Gzip(w) => w.flush(),
            OutputWriter::Zstd(w) => w.flush(),
            OutputWriter::Stdout(w) => w.flush(),
        }
    }
}

impl Drop for OutputWriter {
    fn drop(&mut self) {
        let _ = self.try_finish();
    }
}

impl fmt::Debug for OutputWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            OutputWriter::Plain(_) => "Plain",
            OutputWriter::Gzip(_) => "Gzip",
            OutputWriter::Zstd(_) => "Zstd",
            OutputWriter::Stdout(_) => "Stdout",
        };
        f.debug_tuple("OutputWriter").field(&kind).finish()
    }
}

fn wrap_writer(
    file: File,
    compression: Option<Compression>,
    compression_level: Option<u32>,
    num_threads: u32,
) -> io::Result<OutputWriter> {
    let buffer = BufWriter::new(file);
    let writer = match compression {
        None => OutputWriter::Plain(buffer),
        Some(Compression::Gzip) => OutputWriter::Gzip(flate2::write::GzEncoder::new(
            buffer,
            flate2::Compression::new(compression_level.unwrap_or(6)),
        )),
        Some(Compression::Zstd) => {
            let mut zstd = zstd::stream::Encoder::new(buffer, compression_level.unwrap_or(9) as i32)?;
            if num_threads > 1 {
                zstd.multithread(num_threads)?;
            }
            OutputWriter::Zstd(zstd)
        }
    };
    Ok(writer)
}

pub fn open_file_for_write<P: AsRef<Path>>(
    filename: P,
    compression: Option<Compression>,
    compression_level: Option<u32>,
    num_threads: u32,
) -> Result<OutputWriter> {
    let file = File::create(&filename).with_context(|| format!("cannot create file: {}", filename.as_ref().display()))?;
    Ok(wrap_writer(file, compression, compression_level, num_threads)?)
}

/// Like [`open_file_for_write`], but fails instead of truncating an existing
/// file. Existence check and creation happen in one `open` call.
pub fn create_new_file<P: AsRef<Path>>(
    filename: P,
    compression: Option<Compression>,
    compression_level: Option<u32>,
    num_threads: u32,
) -> Result<OutputWriter, ConfigError> {
    let path = filename.as_ref().to_path_buf();
    let file = OpenOptions::new().write(true).create_new(true).open(&path).map_err(|e| {
        if e.kind() == io::ErrorKind::AlreadyExists {
            ConfigError::SinkExists { path: path.clone() }
        } else {
            ConfigError::CreateSink { path: path.clone(), source: e }
        }
    })?;
    wrap_writer(file, compression, compression_level, num_threads)
        .map_err(|source| ConfigError::CreateSink { path, source })
}

/// Where alignment records come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Stdin,
    Path(PathBuf),
}

impl Input {
    fn open(&self, format: AlignmentFormat) -> io::Result<Box<dyn Read + Send>> {
        match (self, format) {
            (Input::Stdin, _) => Ok(Box::new(io::stdin())),
            // BAM is already BGZF compressed; only text SAM may be wrapped
            (Input::Path(path), AlignmentFormat::Bam) => Ok(Box::new(File::open(path)?)),
            (Input::Path(path), AlignmentFormat::Sam) => open_file_for_read(path),
        }
    }

    /// Guess the format from the file extension; standard input is assumed to
    /// be SAM text.
    pub fn detect_format(&self) -> AlignmentFormat {
        match self {
            Input::Path(path) if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("bam")) => {
                AlignmentFormat::Bam
            }
            _ => AlignmentFormat::Sam,
        }
    }
}

impl From<&str> for Input {
    fn from(s: &str) -> Self {
        if s == "-" {
            Input::Stdin
        } else {
            Input::Path(PathBuf::from(s))
        }
    }
}

impl From<PathBuf> for Input {
    fn from(path: PathBuf) -> Self {
        if path.as_os_str() == "-" {
            Input::Stdin
        } else {
            Input::Path(path)
        }
    }
}

impl Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::Stdin => f.write_str("<stdin>"),
            Input::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentFormat {
    /// Text
    Sam,
    /// Binary
    Bam,
}

impl FromStr for AlignmentFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sam" => Ok(AlignmentFormat::Sam),
            "bam" => Ok(AlignmentFormat::Bam),
            _ => Err(ConfigError::UnknownFormat(s.to_string())),
        }
    }
}

trait ReadRecordBuf {
    fn read_record_buf(&mut self, header: &sam::Header, record: &mut RecordBuf) -> io::Result<usize>;
}

impl<R: BufRead> ReadRecordBuf for sam::io::Reader<R> {
    fn read_record_buf(&mut self, header: &sam::Header, record: &mut RecordBuf) -> io::Result<usize> {
        sam::io::Reader::read_record_buf(self, header, record)
    }
}

impl<R: Read> ReadRecordBuf for bam::io::Reader<R> {
    fn read_record_buf(&mut self, header: &sam::Header, record: &mut RecordBuf) -> io::Result<usize> {
        bam::io::Reader::read_record_buf(self, header, record)
    }
}

/// A SAM or BAM stream yielding one [`RecordBuf`] at a time.
///
/// End of stream is `None`; a read failure is `Some(Err(_))`.
pub struct AlignmentReader {
    inner: Box<dyn ReadRecordBuf + Send>,
    header: sam::Header,
    format: AlignmentFormat,
}

impl AlignmentReader {
    /// Open `input`, reading its header. If `format` is `None` it is detected
    /// from the file extension.
    pub fn open(input: &Input, format: Option<AlignmentFormat>) -> Result<Self, ConfigError> {
        let format = format.unwrap_or_else(|| input.detect_format());
        let reader = input
            .open(format)
            .map_err(|source| ConfigError::OpenInput { input: input.to_string(), source })?;
        Self::from_reader(reader, format)
            .map_err(|source| ConfigError::ReadHeader { input: input.to_string(), source })
    }

    pub fn from_reader<R: Read + Send + 'static>(reader: R, format: AlignmentFormat) -> io::Result<Self> {
        match format {
            AlignmentFormat::Sam => {
                let mut reader = sam::io::Reader::new(BufReader::new(reader));
                let header = reader.read_header()?;
                Ok(Self { inner: Box::new(reader), header, format })
            }
            AlignmentFormat::Bam => {
                let mut reader = bam::io::Reader::new(reader);
                let header = reader.read_header()?;
                Ok(Self { inner: Box::new(reader), header, format })
            }
        }
    }

    pub fn header(&self) -> &sam::Header {
        &self.header
    }

    pub fn format(&self) -> AlignmentFormat {
        self.format
    }
}

impl Iterator for AlignmentReader {
    type Item = io::Result<RecordBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut record = RecordBuf::default();
        match self.inner.read_record_buf(&self.header, &mut record) {
            Ok(0) => None,
            Ok(_) => Some(Ok(record)),
            Err(e) => Some(Err(e)),
        }
    }
}
