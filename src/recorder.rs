// src/recorder.rs
use chrono::Local;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use log::{error, info, warn};
use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::SessionConfig;
use crate::drivers::{PersistenceQueue, Result, StreamError};
use crate::types::Sample;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Writes one line per sample and flushes after every line.
pub struct DataRecorder<W: Write = BufWriter<File>> {
    path: PathBuf,
    writer: W,
    origin: Option<f64>,
    lines_written: u64,
}

impl DataRecorder {
    /// Opens `path` and writes the header block.
    pub fn create(path: impl AsRef<Path>, config: &SessionConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|source| StreamError::Persistence {
            path: path.clone(),
            source,
        })?;
        let recorder = Self::from_writer(BufWriter::new(file), path, config)?;
        info!("recording to {}", recorder.path().display());
        Ok(recorder)
    }
}

impl<W: Write> DataRecorder<W> {
    /// Records into an already open sink; `path` only labels errors and logs.
    pub fn from_writer(
        mut writer: W,
        path: impl Into<PathBuf>,
        config: &SessionConfig,
    ) -> Result<Self> {
        let path = path.into();
        writer
            .write_all(header_block(config).as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|source| StreamError::Persistence {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            writer,
            origin: None,
            lines_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    /// Persists one sample; a failed write is retried once before giving up.
    pub fn write_record(&mut self, sample: &Sample) -> Result<()> {
        let origin = *self.origin.get_or_insert(sample.timestamp);
        let line = format_record(sample, sample.timestamp - origin);
        let mut queued = false;
        if let Err(first) = write_and_flush(&mut self.writer, &line, &mut queued) {
            error!("write to {} failed ({first}), retrying once", self.path.display());
            write_and_flush(&mut self.writer, &line, &mut queued).map_err(|source| {
                StreamError::Persistence {
                    path: self.path.clone(),
                    source,
                }
            })?;
        }
        self.lines_written += 1;
        Ok(())
    }
}

fn write_and_flush<W: Write>(writer: &mut W, line: &str, queued: &mut bool) -> io::Result<()> {
    if !*queued {
        writer.write_all(line.as_bytes())?;
        *queued = true;
    }
    writer.flush()
}

fn header_block(config: &SessionConfig) -> String {
    let now = Local::now();
    let mut header = String::new();
    let _ = writeln!(header, "# date: {}", now.format("%Y-%m-%d"));
    let _ = writeln!(header, "# start_time: {}", now.format("%H:%M:%S%.3f"));
    let _ = writeln!(header, "# subject: {}", config.subject);
    let _ = writeln!(header, "# sample_rate_hz: {}", config.sample_rate_hz);
    let _ = writeln!(header, "# mode: {:?}", config.mode);
    let _ = writeln!(header, "# reference: {}", config.reference);
    let _ = writeln!(header, "# channels: {}", config.channel_names.join(","));
    let _ = writeln!(
        header,
        "index,elapsed_seconds,{},trigger",
        config.channel_names.join(",")
    );
    header
}

/// `index, elapsed_seconds, channel_0 .. channel_{N-1}, trigger`
pub fn format_record(sample: &Sample, elapsed_seconds: f64) -> String {
    let mut line = format!("{},{:.6}", sample.index, elapsed_seconds);
    for value in &sample.channels {
        let _ = write!(line, ",{value}");
    }
    let _ = writeln!(line, ",{}", u8::from(sample.trigger));
    line
}

/// A persisted line read back from disk.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub index: u64,
    pub elapsed_seconds: f64,
    pub channels: Vec<f64>,
    pub trigger: bool,
}

pub fn parse_record(line: &str) -> Option<Record> {
    let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
    if fields.len() < 3 {
        return None;
    }
    let index = fields[0].parse().ok()?;
    let elapsed_seconds = fields[1].parse().ok()?;
    let trigger = match fields[fields.len() - 1] {
        "0" => false,
        "1" => true,
        _ => return None,
    };
    let channels = fields[2..fields.len() - 1]
        .iter()
        .map(|f| f.parse().ok())
        .collect::<Option<Vec<f64>>>()?;
    Some(Record {
        index,
        elapsed_seconds,
        channels,
        trigger,
    })
}

/// Reads every record of a recording, skipping the header block.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<Record>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| StreamError::Persistence {
        path: path.to_path_buf(),
        source,
    })?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| StreamError::Persistence {
            path: path.to_path_buf(),
            source,
        })?;
        if line.starts_with('#') || line.starts_with("index,") {
            continue;
        }
        if let Some(record) = parse_record(&line) {
            records.push(record);
        }
    }
    Ok(records)
}

/// Single consumer draining the persistence queue into a [`DataRecorder`].
/// The queue accepts samples only while the writer runs.
pub struct PersistenceWriter {
    path: PathBuf,
    queue: PersistenceQueue,
    stop: Arc<AtomicBool>,
    worker: JoinHandle<Result<u64>>,
}

impl PersistenceWriter {
    pub fn spawn<W>(mut recorder: DataRecorder<W>, queue: PersistenceQueue) -> Self
    where
        W: Write + Send + 'static,
    {
        let path = recorder.path().to_path_buf();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let stale = queue.clear();
        if stale > 0 {
            warn!("discarded {stale} samples queued before saving started");
        }
        queue.set_accepting(true);
        let worker_queue = queue.clone();
        let worker = thread::spawn(move || {
            let rx = worker_queue.receiver();
            let outcome = drain_into(&mut recorder, &rx, &stop_flag);
            if let Err(err) = &outcome {
                worker_queue.set_accepting(false);
                let dropped = worker_queue.clear();
                error!("persistence writer stopped: {err}; {dropped} queued samples dropped");
            }
            // The sink is released here on every path.
            outcome
        });
        Self {
            path,
            queue,
            stop,
            worker,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once the writer thread has exited, e.g. after a write failure.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Closes the queue, lets the writer drain what is already queued and
    /// exit; returns the number of lines written.
    pub fn stop(self) -> Result<u64> {
        self.queue.set_accepting(false);
        self.stop.store(true, Ordering::SeqCst);
        let written = self
            .worker
            .join()
            .map_err(|_| StreamError::InvalidState("persistence writer panicked"))??;
        info!("saved {written} samples to {}", self.path.display());
        Ok(written)
    }
}

fn drain_into<W: Write>(
    recorder: &mut DataRecorder<W>,
    queue: &Receiver<Sample>,
    stop: &AtomicBool,
) -> Result<u64> {
    loop {
        if stop.load(Ordering::SeqCst) {
            for sample in queue.try_iter() {
                recorder.write_record(&sample)?;
            }
            return Ok(recorder.lines_written());
        }
        match queue.recv_timeout(POLL_INTERVAL) {
            Ok(sample) => recorder.write_record(&sample)?,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Ok(recorder.lines_written()),
        }
    }
}
