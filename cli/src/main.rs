use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use noodles::fastq;
use pairsam::io::{open_file_for_write, Compression, OutputWriter};
use pairsam::utils::QualityEncoding;
use pairsam::{
    AlignmentFormat, AlignmentReader, DemuxError, DemuxOptions, DemuxStats, Demultiplexer, Input, Mate,
    OrphanReporter, OrphanSink, ReadPair, SequenceIdentifier, MAX_LEN,
};

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// Rebuild read pairs from a SAM or BAM file whose mates may appear in any
/// order, writing them as FASTQ.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Input SAM/BAM file, `-` for standard input.
    #[arg(short = 'f', long = "input")]
    input: PathBuf,

    /// Treat the input as BAM.
    #[arg(short = 'b', long, conflicts_with = "sam")]
    bam: bool,

    /// Treat the input as SAM text.
    #[arg(long)]
    sam: bool,

    /// Barcode tag added to every read name.
    #[arg(short = 'B', long)]
    tag: Option<String>,

    /// Longest input read accepted; longer reads become orphans.
    #[arg(long, default_value_t = MAX_LEN)]
    max_read_len: usize,

    /// Write records that could not be paired to this FASTQ file. The file must
    /// not exist.
    #[arg(long)]
    orphans: Option<PathBuf>,

    /// Write orphan qualities with the Phred+64 offset.
    #[arg(short = '6', long)]
    phred64: bool,

    /// Log every orphan when no orphan file is given.
    #[arg(short = 'd', long)]
    debug_orphans: bool,

    /// Output FASTQ for the first read of each pair.
    #[arg(short = '1', long, requires = "read2")]
    read1: Option<PathBuf>,

    /// Output FASTQ for the second read of each pair.
    #[arg(short = '2', long, requires = "read1")]
    read2: Option<PathBuf>,

    /// Write run counters to this file as `name<TAB>value` lines.
    #[arg(long)]
    metrics: Option<PathBuf>,

    /// Show a spinner while reading.
    #[arg(long)]
    progress: bool,
}

type FastqWriter = fastq::io::Writer<OutputWriter>;

/// Pairs are written to two files, or interleaved into one stream.
struct PairWriter {
    read1: FastqWriter,
    read2: Option<FastqWriter>,
}

impl PairWriter {
    fn new(read1: Option<&Path>, read2: Option<&Path>) -> Result<Self> {
        match (read1, read2) {
            (Some(read1), Some(read2)) => Ok(Self {
                read1: create_fastq(read1)?,
                read2: Some(create_fastq(read2)?),
            }),
            _ => Ok(Self { read1: fastq::io::Writer::new(OutputWriter::stdout()), read2: None }),
        }
    }

    fn write(&mut self, pair: &ReadPair<'_>) -> io::Result<()> {
        self.read1.write_record(&to_fastq(pair.id, &pair.forward, 1))?;
        let read2 = self.read2.as_mut().unwrap_or(&mut self.read1);
        read2.write_record(&to_fastq(pair.id, &pair.reverse, 2))
    }

    fn finish(&mut self) -> io::Result<()> {
        self.read1.get_mut().try_finish()?;
        if let Some(read2) = self.read2.as_mut() {
            read2.get_mut().try_finish()?;
        }
        Ok(())
    }
}

fn create_fastq(path: &Path) -> Result<FastqWriter> {
    let path = path.to_path_buf();
    let compression = Compression::try_from(&path).ok();
    Ok(fastq::io::Writer::new(open_file_for_write(&path, compression, None, 1)?))
}

/// Render a mate the way the sequencer read it, with Phred+33 qualities.
fn to_fastq(id: &SequenceIdentifier, mate: &Mate<'_>, segment: u8) -> fastq::Record {
    fastq::Record::new(
        fastq::record::Definition::new(format!("{}/{}", id, segment), ""),
        mate.read_sequence(),
        QualityEncoding::Phred33.encode_all(&mate.qualities()),
    )
}

/// Exit status of a run that stopped part way through the input.
const EXIT_ABORTED: u8 = 3;

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_status(&e))
        }
    }
}

fn exit_status(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<DemuxError>() {
        Some(e) if e.is_aborted_stream() => EXIT_ABORTED,
        _ => 1,
    }
}

fn write_metrics(path: &Path, stats: &DemuxStats) -> Result<()> {
    let mut writer = open_file_for_write(path, None, None, 1)?;
    write!(writer, "{}", stats.to_metrics())?;
    writer.try_finish()?;
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let format = if args.bam {
        Some(AlignmentFormat::Bam)
    } else if args.sam {
        Some(AlignmentFormat::Sam)
    } else {
        None
    };
    let input = Input::from(args.input);
    let reader = AlignmentReader::open(&input, format)?;
    info!("Reading {:?} records from {}", reader.format(), input);

    let mut options = DemuxOptions::new().with_max_len(args.max_read_len)?;
    if let Some(tag) = args.tag {
        options = options.with_tag(tag)?;
    }

    let sink = args.orphans.as_ref().map(OrphanSink::create).transpose()?;
    if let Some(sink) = &sink {
        info!("Writing orphans to {}", sink.path().display());
    }
    let encoding = if args.phred64 { QualityEncoding::Phred64 } else { QualityEncoding::Phred33 };
    let orphans = OrphanReporter::new(sink)
        .with_quality_encoding(encoding)
        .with_log_orphans(args.debug_orphans);

    let mut demux = Demultiplexer::new(reader, options).with_orphan_reporter(orphans);
    let mut output = PairWriter::new(args.read1.as_deref(), args.read2.as_deref())?;

    let progress = if args.progress {
        let style = ProgressStyle::with_template("{spinner} [{elapsed}] {human_pos} pairs ({per_sec})")?;
        ProgressBar::new_spinner().with_style(style)
    } else {
        ProgressBar::hidden()
    };

    while let Some(pair) = demux.next_pair()? {
        output.write(&pair).context("cannot write read pair")?;
        progress.inc(1);
    }
    progress.finish_and_clear();
    output.finish().context("cannot write read pair")?;
    drop(output);

    let stats = demux.finish()?;
    eprint!("{}", stats);
    if let Some(path) = &args.metrics {
        write_metrics(path, &stats).with_context(|| format!("cannot write metrics to {}", path.display()))?;
    }
    Ok(())
}
