// src/bus.rs
//! Input-stream and output-sink contracts.
//!
//! The message-bus client itself is out of scope; the engine only requires
//! these two collaborators. Frames are u32-LE length-prefixed envelope
//! payloads, both in replay files and on TCP streams.

use bytes::Bytes;
use memmap2::Mmap;
use serde_json::json;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{FatalError, PublishError};

/// One message pulled from the upstream partition.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub partition: i32,
    pub offset: u64,
    pub payload: Bytes,
}

/// Result of a single poll.
#[derive(Debug)]
pub enum Fetch {
    Msg(InboundMessage),
    /// Nothing available within the timeout.
    Idle,
    /// Stream drained cleanly (replay file exhausted, peer closed).
    Ended,
}

pub trait InputStream: Send {
    /// May block cooperatively up to `timeout` waiting for bytes.
    fn next(&mut self, timeout: Duration) -> Result<Fetch, FatalError>;
    fn close(&mut self);
}

pub trait OutputSink: Send + Sync {
    /// Fire-and-forget: must not await broker acknowledgement.
    fn publish(
        &self,
        topic: &str,
        partition: Option<u32>,
        key: &str,
        payload: &[u8],
    ) -> Result<(), PublishError>;

    fn flush(&self, timeout: Duration) -> Result<(), PublishError>;
}

pub const FRAME_HEADER: usize = 4;

pub fn write_frame(out: &mut impl Write, payload: &[u8]) -> std::io::Result<()> {
    out.write_all(&(payload.len() as u32).to_le_bytes())?;
    out.write_all(payload)
}

/// Replay source over an mmap'd capture file.
pub struct FileSource {
    mmap: Mmap,
    pos: usize,
    offset: u64,
}

impl FileSource {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap,
            pos: 0,
            offset: 0,
        })
    }
}

impl InputStream for FileSource {
    fn next(&mut self, _timeout: Duration) -> Result<Fetch, FatalError> {
        let buf = self.mmap.as_ref();
        if self.pos >= buf.len() {
            return Ok(Fetch::Ended);
        }
        if buf.len() - self.pos < FRAME_HEADER {
            return Err(FatalError::InputLost("truncated frame header".to_string()));
        }

        let len = u32::from_le_bytes(buf[self.pos..self.pos + 4].try_into().unwrap()) as usize;
        let start = self.pos + FRAME_HEADER;
        if buf.len() - start < len {
            return Err(FatalError::InputLost("truncated frame body".to_string()));
        }

        self.pos = start + len;
        let offset = self.offset;
        self.offset += 1;
        Ok(Fetch::Msg(InboundMessage {
            partition: 0,
            offset,
            payload: Bytes::copy_from_slice(&buf[start..start + len]),
        }))
    }

    fn close(&mut self) {}
}

/// Live source over a TCP stream of the same framing. Partial frames are
/// buffered across polls so a read timeout never loses sync.
pub struct TcpSource {
    stream: TcpStream,
    pending: Vec<u8>,
    offset: u64,
}

impl TcpSource {
    pub fn connect(addr: std::net::SocketAddr) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true).ok();
        Ok(Self {
            stream,
            pending: Vec::with_capacity(1 << 16),
            offset: 0,
        })
    }

    fn take_frame(&mut self) -> Option<Bytes> {
        if self.pending.len() < FRAME_HEADER {
            return None;
        }
        let len = u32::from_le_bytes(self.pending[..4].try_into().unwrap()) as usize;
        if self.pending.len() < FRAME_HEADER + len {
            return None;
        }
        let payload = Bytes::copy_from_slice(&self.pending[FRAME_HEADER..FRAME_HEADER + len]);
        self.pending.drain(..FRAME_HEADER + len);
        Some(payload)
    }
}

impl InputStream for TcpSource {
    fn next(&mut self, timeout: Duration) -> Result<Fetch, FatalError> {
        self.stream.set_read_timeout(Some(timeout)).ok();

        loop {
            if let Some(payload) = self.take_frame() {
                let offset = self.offset;
                self.offset += 1;
                return Ok(Fetch::Msg(InboundMessage {
                    partition: 0,
                    offset,
                    payload,
                }));
            }

            let mut tmp = [0u8; 64 * 1024];
            match self.stream.read(&mut tmp) {
                Ok(0) => return Ok(Fetch::Ended),
                Ok(n) => self.pending.extend_from_slice(&tmp[..n]),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return Ok(Fetch::Idle)
                }
                Err(e) => return Err(FatalError::InputLost(e.to_string())),
            }
        }
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

/// Sink that appends one JSON line per published message. Stands in for the
/// broker producer in replay runs and the smoke test.
pub struct JsonlSink {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
}

impl JsonlSink {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(Box::new(file))),
        })
    }

    pub fn stdout() -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(Box::new(std::io::stdout()))),
        }
    }
}

impl OutputSink for JsonlSink {
    fn publish(
        &self,
        topic: &str,
        partition: Option<u32>,
        key: &str,
        payload: &[u8],
    ) -> Result<(), PublishError> {
        let line = json!({
            "topic": topic,
            "partition": partition,
            "key": key,
            "payload": String::from_utf8_lossy(payload),
        });
        let mut w = self
            .writer
            .lock()
            .map_err(|_| PublishError::Rejected {
                topic: topic.to_string(),
                reason: "sink writer poisoned".to_string(),
            })?;
        writeln!(w, "{line}")?;
        Ok(())
    }

    fn flush(&self, _timeout: Duration) -> Result<(), PublishError> {
        let mut w = self.writer.lock().map_err(|_| PublishError::Rejected {
            topic: String::new(),
            reason: "sink writer poisoned".to_string(),
        })?;
        w.flush()?;
        Ok(())
    }
}

/// In-memory source for tests: yields queued frames then ends.
pub struct MemorySource {
    frames: VecDeque<Bytes>,
    offset: u64,
}

impl MemorySource {
    pub fn new(frames: impl IntoIterator<Item = Bytes>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            offset: 0,
        }
    }
}

impl InputStream for MemorySource {
    fn next(&mut self, _timeout: Duration) -> Result<Fetch, FatalError> {
        match self.frames.pop_front() {
            Some(payload) => {
                let offset = self.offset;
                self.offset += 1;
                Ok(Fetch::Msg(InboundMessage {
                    partition: 0,
                    offset,
                    payload,
                }))
            }
            None => Ok(Fetch::Ended),
        }
    }

    fn close(&mut self) {}
}

/// In-memory sink recording every publish; can reject selected topics to
/// exercise the error path.
#[derive(Default)]
pub struct MemorySink {
    pub records: Mutex<Vec<SinkRecord>>,
    pub reject_topic: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SinkRecord {
    pub topic: String,
    pub partition: Option<u32>,
    pub key: String,
    pub payload: String,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(topic: impl Into<String>) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            reject_topic: Some(topic.into()),
        }
    }

    pub fn take(&self) -> Vec<SinkRecord> {
        std::mem::take(&mut self.records.lock().unwrap())
    }
}

impl OutputSink for MemorySink {
    fn publish(
        &self,
        topic: &str,
        partition: Option<u32>,
        key: &str,
        payload: &[u8],
    ) -> Result<(), PublishError> {
        if self.reject_topic.as_deref() == Some(topic) {
            return Err(PublishError::Rejected {
                topic: topic.to_string(),
                reason: "rejected by test sink".to_string(),
            });
        }
        self.records.lock().unwrap().push(SinkRecord {
            topic: topic.to_string(),
            partition,
            key: key.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
        });
        Ok(())
    }

    fn flush(&self, _timeout: Duration) -> Result<(), PublishError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_source_walks_frames_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.bin");
        {
            let mut f = File::create(&path).unwrap();
            write_frame(&mut f, b"alpha").unwrap();
            write_frame(&mut f, b"beta").unwrap();
        }

        let mut src = FileSource::open(&path).unwrap();
        let Fetch::Msg(m) = src.next(Duration::from_millis(1)).unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(&m.payload[..], b"alpha");
        assert_eq!(m.offset, 0);

        let Fetch::Msg(m) = src.next(Duration::from_millis(1)).unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(&m.payload[..], b"beta");
        assert_eq!(m.offset, 1);

        assert!(matches!(
            src.next(Duration::from_millis(1)).unwrap(),
            Fetch::Ended
        ));
    }

    #[test]
    fn file_source_detects_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.bin");
        std::fs::write(&path, 100u32.to_le_bytes()).unwrap();

        let mut src = FileSource::open(&path).unwrap();
        assert!(src.next(Duration::from_millis(1)).is_err());
    }

    #[test]
    fn memory_sink_records_and_rejects() {
        let sink = MemorySink::rejecting("bad_topic");
        sink.publish("good", Some(1), "KEY", b"payload").unwrap();
        assert!(sink.publish("bad_topic", None, "KEY", b"x").is_err());

        let records = sink.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].topic, "good");
        assert_eq!(records[0].partition, Some(1));
    }
}
