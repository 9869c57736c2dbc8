//! Incremental decoding of a container into chunks.

use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, TryRecvError};

use crate::config::Config;
use crate::db::source::Resource;
use crate::error::{Result, TraceError};
use crate::wire::chunk::{decode_part, frame_chunk, Chunk, ChunkType, Part, PartType};
use crate::wire::header::{ContainerHeader, ContainerKind};
use crate::wire::legacy::parse_legacy_header;
use crate::wire::resource::{InlineResolver, Resolution, ResourceResolver};
use crate::wire::HEADER_LEN;

/// Receives decoded chunks from a [`WireStreamDecoder`].
pub trait ChunkHandler {
    /// Called once per chunk, in the order the chunks were framed.
    fn handle_chunk(&mut self, chunk: Chunk) -> Result<()>;

    /// Called once, after the last chunk was handled.
    fn handle_end(&mut self) -> Result<()> {
        Ok(())
    }
}

enum Slot {
    Ready(Part),
    Waiting(Receiver<Result<Resource>>),
}

struct PendingChunk {
    id: u32,
    chunk_type: ChunkType,
    time_start: u32,
    time_end: u32,
    slots: Vec<Slot>,
}

impl PendingChunk {
    fn resolved(id: u32, chunk_type: ChunkType, parts: Vec<Part>) -> Self {
        Self {
            id,
            chunk_type,
            time_start: 0,
            time_end: 0,
            slots: parts.into_iter().map(Slot::Ready).collect(),
        }
    }

    /// Collect whatever deferred parts have arrived. True once all have.
    fn poll(&mut self, block: bool) -> Result<bool> {
        for slot in &mut self.slots {
            let Slot::Waiting(rx) = slot else {
                continue;
            };
            let received = if block {
                rx.recv().map_err(|_| abandoned(self.id))?
            } else {
                match rx.try_recv() {
                    Ok(received) => received,
                    Err(TryRecvError::Empty) => return Ok(false),
                    Err(TryRecvError::Disconnected) => return Err(abandoned(self.id)),
                }
            };
            *slot = Slot::Ready(Part::Resource(received?));
        }
        Ok(true)
    }

    fn into_chunk(self) -> Chunk {
        let parts = self
            .slots
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Ready(part) => Some(part),
                Slot::Waiting(_) => None,
            })
            .collect();
        Chunk {
            id: self.id,
            chunk_type: self.chunk_type,
            time_start: self.time_start,
            time_end: self.time_end,
            parts,
        }
    }
}

fn abandoned(chunk: u32) -> TraceError {
    TraceError::fatal(format!("resource for chunk {chunk} was abandoned"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Chunked,
    Legacy,
    Failed,
}

/// Frames a byte stream into chunks.
///
/// Bytes may arrive in ranges of any size. Chunks are queued as soon as they
/// are complete and handed to the [`ChunkHandler`] strictly in framing order:
/// a chunk waiting on a deferred resource holds back every chunk behind it.
/// The end signal fires once, after [`WireStreamDecoder::end`] and after the
/// queue has drained. Any error fails the stream for good.
pub struct WireStreamDecoder<R = InlineResolver> {
    max_tool_version: u32,
    max_format_version: u32,
    resolver: R,
    state: State,
    header: Option<ContainerHeader>,
    buffer: Vec<u8>,
    pending: VecDeque<PendingChunk>,
    end_pending: bool,
    ended: bool,
    chunks_framed: usize,
}

impl WireStreamDecoder<InlineResolver> {
    pub fn new(config: &Config) -> Self {
        Self::with_resolver(config, InlineResolver)
    }
}

impl<R: ResourceResolver> WireStreamDecoder<R> {
    pub fn with_resolver(config: &Config, resolver: R) -> Self {
        Self {
            max_tool_version: config.max_tool_version,
            max_format_version: config.max_format_version,
            resolver,
            state: State::Header,
            header: None,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            end_pending: false,
            ended: false,
            chunks_framed: 0,
        }
    }

    /// Container header, once the first 12 bytes have been seen.
    pub fn header(&self) -> Option<&ContainerHeader> {
        self.header.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.state == State::Failed
    }

    /// Whether the end signal has been delivered.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Chunks framed but not yet handed out.
    pub fn pending_chunks(&self) -> usize {
        self.pending.len()
    }

    /// Append a byte range and dispatch every chunk that became ready.
    pub fn feed(&mut self, data: &[u8], handler: &mut dyn ChunkHandler) -> Result<()> {
        let result = self.feed_inner(data, handler);
        self.fail_on_error(result)
    }

    /// Mark the end of input. Returns whether the end signal was delivered,
    /// which waits on any chunk still holding a deferred resource.
    pub fn end(&mut self, handler: &mut dyn ChunkHandler) -> Result<bool> {
        let result = self.end_inner(handler);
        self.fail_on_error(result)
    }

    /// Retry chunks waiting on deferred resources without blocking.
    pub fn poll(&mut self, handler: &mut dyn ChunkHandler) -> Result<bool> {
        let result = self.check_usable().and_then(|_| self.pump(handler, false));
        self.fail_on_error(result).map(|_| self.ended)
    }

    /// End the input and block until every deferred resource has arrived.
    pub fn finish(&mut self, handler: &mut dyn ChunkHandler) -> Result<()> {
        if !self.end(handler)? {
            let result = self.pump(handler, true);
            self.fail_on_error(result)?;
        }
        Ok(())
    }

    fn fail_on_error<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if self.state != State::Failed {
                tracing::warn!("Trace stream failed: {}", err);
            }
            self.state = State::Failed;
        }
        result
    }

    fn check_usable(&self) -> Result<()> {
        if self.state == State::Failed {
            return Err(TraceError::fatal("stream already failed"));
        }
        Ok(())
    }

    fn feed_inner(&mut self, data: &[u8], handler: &mut dyn ChunkHandler) -> Result<()> {
        self.check_usable()?;
        if self.end_pending {
            return Err(TraceError::fatal("data received after end of stream"));
        }
        self.buffer.extend_from_slice(data);

        if self.state == State::Header {
            if self.buffer.len() < HEADER_LEN {
                return Ok(());
            }
            let header = ContainerHeader::parse(
                &self.buffer[..HEADER_LEN],
                self.max_tool_version,
                self.max_format_version,
            )?;
            tracing::debug!(
                "Container header: {:?}, tool {:#x}, format {}",
                header.kind,
                header.tool_version,
                header.format_version
            );
            self.buffer.drain(..HEADER_LEN);
            self.state = match header.kind {
                ContainerKind::Chunked => State::Chunked,
                ContainerKind::Legacy => State::Legacy,
            };
            self.header = Some(header);
        }

        if self.state == State::Chunked {
            self.frame_chunks()?;
        }
        self.pump(handler, false)
    }

    fn frame_chunks(&mut self) -> Result<()> {
        let mut consumed = 0;
        while let Some((raw, len)) = frame_chunk(&self.buffer[consumed..])? {
            consumed += len;
            let Some(chunk_type) = ChunkType::from_wire(raw.chunk_type) else {
                tracing::warn!("Skipping chunk {} of unknown type {:#x}", raw.id, raw.chunk_type);
                continue;
            };

            let mut slots = Vec::with_capacity(raw.parts.len());
            for part in &raw.parts {
                let Some(part_type) = PartType::from_wire(part.part_type) else {
                    tracing::warn!(
                        "Skipping part of unknown type {:#x} in chunk {}",
                        part.part_type,
                        raw.id
                    );
                    continue;
                };
                let slot = if part_type.is_resource() {
                    match self.resolver.resolve(part_type, part.data)? {
                        Resolution::Ready(resource) => Slot::Ready(Part::Resource(resource)),
                        Resolution::Deferred(rx) => Slot::Waiting(rx),
                    }
                } else {
                    Slot::Ready(decode_part(part_type, part.data)?)
                };
                slots.push(slot);
            }

            self.chunks_framed += 1;
            self.pending.push_back(PendingChunk {
                id: raw.id,
                chunk_type,
                time_start: raw.time_start,
                time_end: raw.time_end,
                slots,
            });
        }
        self.buffer.drain(..consumed);
        Ok(())
    }

    fn end_inner(&mut self, handler: &mut dyn ChunkHandler) -> Result<bool> {
        self.check_usable()?;
        if self.end_pending {
            return Ok(self.ended);
        }
        match self.state {
            State::Header => {
                return Err(TraceError::fatal(format!(
                    "stream ended after {} bytes, before the container header",
                    self.buffer.len()
                )))
            }
            State::Chunked if !self.buffer.is_empty() => {
                return Err(TraceError::fatal(format!(
                    "stream ended inside a chunk ({} bytes left over)",
                    self.buffer.len()
                )))
            }
            State::Legacy => {
                let data = std::mem::take(&mut self.buffer);
                let (header, offset) = parse_legacy_header(&data)?;
                self.pending.push_back(PendingChunk::resolved(
                    0,
                    ChunkType::FileHeader,
                    vec![Part::FileHeader(header)],
                ));
                self.pending.push_back(PendingChunk::resolved(
                    1,
                    ChunkType::EventData,
                    vec![Part::LegacyEvents(data[offset..].to_vec())],
                ));
                self.chunks_framed += 2;
            }
            _ => {}
        }
        self.end_pending = true;
        tracing::debug!("End of stream after {} chunks", self.chunks_framed);
        self.pump(handler, false)?;
        Ok(self.ended)
    }

    /// Dispatch from the front of the queue while the front is resolved.
    fn pump(&mut self, handler: &mut dyn ChunkHandler, block: bool) -> Result<()> {
        while let Some(front) = self.pending.front_mut() {
            if !front.poll(block)? {
                break;
            }
            if let Some(ready) = self.pending.pop_front() {
                let chunk = ready.into_chunk();
                tracing::trace!("Dispatching chunk {} ({:?})", chunk.id, chunk.chunk_type);
                handler.handle_chunk(chunk)?;
            }
        }
        if self.pending.is_empty() && self.end_pending && !self.ended {
            self.ended = true;
            handler.handle_end()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::writer::ContainerWriter;
    use crate::wire::{FileHeader, FORMAT_VERSION};
    use std::sync::mpsc;

    #[derive(Default)]
    struct Recorder {
        chunks: Vec<(u32, usize)>,
        resources: Vec<Resource>,
        ends: usize,
    }

    impl ChunkHandler for Recorder {
        fn handle_chunk(&mut self, chunk: Chunk) -> Result<()> {
            self.resources.extend(chunk.resources().cloned());
            self.chunks.push((chunk.id, chunk.parts.len()));
            Ok(())
        }

        fn handle_end(&mut self) -> Result<()> {
            self.ends += 1;
            Ok(())
        }
    }

    fn resource_container() -> Vec<u8> {
        let mut writer = ContainerWriter::new(&FileHeader::new(0.0)).unwrap();
        writer.write_raw_chunk(0x2, &[(0x30000, b"a\0"), (0x40000, b"payload")]);
        writer.write_raw_chunk(0x2, &[(0x30000, b"b\0")]);
        writer.finish().unwrap()
    }

    #[test]
    fn test_trickle_feed() {
        let bytes = resource_container();
        let mut decoder = WireStreamDecoder::new(&Config::default());
        let mut recorder = Recorder::default();
        for byte in &bytes {
            decoder.feed(std::slice::from_ref(byte), &mut recorder).unwrap();
        }
        assert!(decoder.end(&mut recorder).unwrap());
        assert_eq!(recorder.chunks, vec![(0, 1), (1, 2), (2, 1)]);
        assert_eq!(recorder.resources, vec![Resource::Binary(b"payload".to_vec())]);
        assert_eq!(recorder.ends, 1);
        assert!(decoder.end(&mut recorder).unwrap());
        assert_eq!(recorder.ends, 1);
    }

    #[test]
    fn test_deferred_resource_holds_back_later_chunks() {
        let (tx, rx) = mpsc::channel();
        let mut rx = Some(rx);
        let resolver = move |_: PartType, _: &[u8]| -> Result<Resolution> {
            rx.take()
                .map(Resolution::Deferred)
                .ok_or_else(|| TraceError::fatal("resolved twice"))
        };
        let mut decoder = WireStreamDecoder::with_resolver(&Config::default(), resolver);
        let mut recorder = Recorder::default();

        decoder.feed(&resource_container(), &mut recorder).unwrap();
        assert_eq!(recorder.chunks, vec![(0, 1)]);
        assert_eq!(decoder.pending_chunks(), 2);
        assert!(!decoder.end(&mut recorder).unwrap());
        assert!(!decoder.poll(&mut recorder).unwrap());
        assert_eq!(recorder.ends, 0);

        tx.send(Ok(Resource::Text("late".into()))).unwrap();
        assert!(decoder.poll(&mut recorder).unwrap());
        assert_eq!(recorder.chunks, vec![(0, 1), (1, 2), (2, 1)]);
        assert_eq!(recorder.resources, vec![Resource::Text("late".into())]);
        assert_eq!(recorder.ends, 1);
    }

    #[test]
    fn test_finish_blocks_for_resources() {
        let (tx, rx) = mpsc::channel();
        let mut rx = Some(rx);
        let resolver = move |_: PartType, _: &[u8]| -> Result<Resolution> {
            rx.take()
                .map(Resolution::Deferred)
                .ok_or_else(|| TraceError::fatal("resolved twice"))
        };
        let mut decoder = WireStreamDecoder::with_resolver(&Config::default(), resolver);
        let mut recorder = Recorder::default();
        decoder.feed(&resource_container(), &mut recorder).unwrap();

        let sender = std::thread::spawn(move || {
            tx.send(Ok(Resource::Binary(vec![9]))).unwrap();
        });
        decoder.finish(&mut recorder).unwrap();
        sender.join().unwrap();
        assert_eq!(recorder.chunks.len(), 3);
        assert_eq!(recorder.ends, 1);
    }

    #[test]
    fn test_newer_format_rejected_before_dispatch() {
        let mut bytes = resource_container();
        bytes[8..12].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
        let mut decoder = WireStreamDecoder::new(&Config::default());
        let mut recorder = Recorder::default();
        let err = decoder.feed(&bytes, &mut recorder).unwrap_err();
        assert!(err.is_fatal());
        assert!(recorder.chunks.is_empty());
        assert!(decoder.is_failed());
        assert!(decoder.feed(&[], &mut recorder).is_err());
        assert_eq!(decoder.header(), None);
    }

    #[test]
    fn test_unknown_types_skipped_and_truncation() {
        let mut writer = ContainerWriter::new(&FileHeader::new(0.0)).unwrap();
        writer.write_raw_chunk(0x99, &[(0x30000, b"x\0")]);
        writer.write_raw_chunk(0x2, &[(0x77777, b"??"), (0x30000, b"x\0")]);
        let bytes = writer.finish().unwrap();

        let mut decoder = WireStreamDecoder::new(&Config::default());
        let mut recorder = Recorder::default();
        decoder.feed(&bytes, &mut recorder).unwrap();
        decoder.end(&mut recorder).unwrap();
        assert_eq!(recorder.chunks, vec![(0, 1), (2, 1)]);

        let mut decoder = WireStreamDecoder::new(&Config::default());
        let mut recorder = Recorder::default();
        decoder.feed(&bytes[..bytes.len() - 3], &mut recorder).unwrap();
        assert!(decoder.end(&mut recorder).unwrap_err().is_fatal());
        assert_eq!(recorder.ends, 0);
    }
}
