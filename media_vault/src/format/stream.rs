//! Media Vault - Chunked Stream Format
//!
//! ```text
//! [HEADER][METADATA BLOCK?]{[LEN 4B LE][NONCE 12B][CIPHERTEXT LEN][TAG 16B]}*
//! ```
//!
//! Each chunk is sealed independently with a fresh nonce, so content of any
//! size is processed with one chunk of plaintext in memory. Chunks carry no
//! associated data; dropped trailing chunks are caught by comparing the
//! decrypted total against ORIGINAL_SIZE.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use zeroize::Zeroizing;

use super::header::{
    open_metadata, seal_metadata, MediaType, StreamHeader, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE,
    ORIGINAL_SIZE_OFFSET,
};
use super::{read_full, EntryReader};
use crate::control::{Phase, StreamControl};
use crate::crypto::{open_in_place, seal_in_place, VaultSession, NONCE_LEN, TAG_LEN};
use crate::error::{VaultError, VaultResult};
use crate::secure_fs::{create_new, open_existing, PartialFile};

/// Per-record framing: LEN + NONCE + TAG
pub const CHUNK_OVERHEAD: usize = 4 + NONCE_LEN + TAG_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptOptions {
    pub media_type: MediaType,
    pub chunk_size: u32,
    /// Raw metadata document embedded (encrypted) after the header
    pub metadata: Option<Vec<u8>>,
}

impl EncryptOptions {
    pub fn new(media_type: MediaType) -> Self {
        Self {
            media_type,
            chunk_size: DEFAULT_CHUNK_SIZE,
            metadata: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// What a finished write produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub header: StreamHeader,
    pub chunks: u64,
}

// ═══════════════════════════════════════════════════════════════════════════
// WRITER
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    WritingHeader,
    WritingMetadata,
    WritingChunks,
    Finalized,
}

/// Stream writer. `begin` emits the header (and metadata block), then any
/// number of `write_chunk` calls, then `finish` patches ORIGINAL_SIZE.
pub struct StreamWriter<'s, W: Write + Seek> {
    out: W,
    session: &'s VaultSession,
    header: StreamHeader,
    state: WriteState,
    chunks: u64,
    consumed: u64,
}

impl<'s, W: Write + Seek> StreamWriter<'s, W> {
    pub fn new(
        out: W,
        session: &'s VaultSession,
        media_type: MediaType,
        chunk_size: u32,
    ) -> VaultResult<Self> {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(VaultError::EncryptionFailed(format!(
                "chunk size {chunk_size} out of range"
            )));
        }
        Ok(Self {
            out,
            session,
            header: StreamHeader::new(media_type, chunk_size, 0),
            state: WriteState::WritingHeader,
            chunks: 0,
            consumed: 0,
        })
    }

    fn expect_state(&self, expected: WriteState) -> VaultResult<()> {
        if self.state != expected {
            return Err(VaultError::EncryptionFailed(format!(
                "stream writer is {:?}, expected {:?}",
                self.state, expected
            )));
        }
        Ok(())
    }

    /// Write the header and, if given, the sealed metadata document.
    pub fn begin(&mut self, metadata: Option<&[u8]>) -> VaultResult<()> {
        self.expect_state(WriteState::WritingHeader)?;
        let block = metadata
            .map(|doc| seal_metadata(self.session, doc))
            .transpose()?;

        self.header.metadata_len = match &block {
            Some(block) => u32::try_from(block.len()).map_err(|_| {
                VaultError::EncryptionFailed("metadata document too large".into())
            })?,
            None => 0,
        };
        self.out.write_all(&self.header.encode())?;
        self.state = WriteState::WritingMetadata;

        if let Some(block) = block {
            self.out.write_all(&block)?;
        }
        self.state = WriteState::WritingChunks;
        Ok(())
    }

    /// Seal one chunk of at most `chunk_size` bytes. The buffer is encrypted
    /// in place, so no plaintext remains in it afterwards.
    pub fn write_chunk(&mut self, buffer: &mut [u8]) -> VaultResult<()> {
        self.expect_state(WriteState::WritingChunks)?;
        if buffer.is_empty() {
            return Ok(());
        }
        if buffer.len() > self.header.chunk_size as usize {
            return Err(VaultError::EncryptionFailed(format!(
                "chunk of {} bytes exceeds chunk size {}",
                buffer.len(),
                self.header.chunk_size
            )));
        }

        let (nonce, tag) = seal_in_place(self.session.encryption_key(), buffer)?;
        self.out.write_all(&(buffer.len() as u32).to_le_bytes())?;
        self.out.write_all(&nonce)?;
        self.out.write_all(buffer)?;
        self.out.write_all(&tag)?;

        self.chunks += 1;
        self.consumed += buffer.len() as u64;
        Ok(())
    }

    /// Plaintext bytes sealed so far
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Patch ORIGINAL_SIZE and flush.
    pub fn finish(mut self) -> VaultResult<(W, StreamSummary)> {
        self.expect_state(WriteState::WritingChunks)?;
        self.header.original_size = self.consumed;

        self.out.seek(SeekFrom::Start(ORIGINAL_SIZE_OFFSET))?;
        self.out.write_all(&self.consumed.to_le_bytes())?;
        self.out.seek(SeekFrom::End(0))?;
        self.out.flush()?;
        self.state = WriteState::Finalized;

        let summary = StreamSummary {
            header: self.header,
            chunks: self.chunks,
        };
        Ok((self.out, summary))
    }
}

/// Encrypt everything `source` yields into a new stream file at `dest`.
///
/// `dest` must not exist. On any error or cancellation the partial file is
/// removed.
pub fn encrypt_to_file(
    source: &mut dyn Read,
    dest: &Path,
    session: &VaultSession,
    options: &EncryptOptions,
    control: &StreamControl,
) -> VaultResult<StreamSummary> {
    let file = create_new(dest)?;
    let guard = PartialFile::new(dest);

    let mut writer = StreamWriter::new(
        BufWriter::new(file),
        session,
        options.media_type,
        options.chunk_size,
    )?;
    writer.begin(options.metadata.as_deref())?;

    let mut buffer = Zeroizing::new(vec![0u8; options.chunk_size as usize]);
    loop {
        control.checkpoint()?;
        let n = read_full(source, &mut buffer)?;
        if n == 0 {
            break;
        }
        writer.write_chunk(&mut buffer[..n])?;
        control.report(Phase::Encrypt, writer.consumed(), None);
        if n < buffer.len() {
            break;
        }
    }

    let (out, summary) = writer.finish()?;
    let file = out.into_inner().map_err(|e| VaultError::Io(e.into_error()))?;
    file.sync_all()?;
    guard.commit();

    log::debug!(
        "Encrypted {} bytes into {} chunks at {}",
        summary.header.original_size,
        summary.chunks,
        dest.display()
    );
    Ok(summary)
}

// ═══════════════════════════════════════════════════════════════════════════
// READER
// ═══════════════════════════════════════════════════════════════════════════

/// Header-level access to a stream file
pub struct StreamReader<R> {
    inner: R,
    header: StreamHeader,
}

impl<R: Read + Seek> StreamReader<R> {
    pub fn new(mut inner: R) -> VaultResult<Self> {
        inner.seek(SeekFrom::Start(0))?;
        let header = StreamHeader::decode(&mut inner)?;
        Ok(Self { inner, header })
    }

    pub fn header(&self) -> &StreamHeader {
        &self.header
    }

    /// Decrypt the embedded metadata document; `None` for files without one.
    pub fn read_metadata(&mut self, session: &VaultSession) -> VaultResult<Option<Zeroizing<Vec<u8>>>> {
        if self.header.metadata_len == 0 {
            return Ok(None);
        }
        let header_len = self.header.header_len();
        let metadata_len = self.header.metadata_len as usize;

        self.inner.seek(SeekFrom::Start(header_len as u64))?;
        let mut block = vec![0u8; metadata_len];
        let n = read_full(&mut self.inner, &mut block)?;
        if n < metadata_len {
            return Err(VaultError::IncompleteHeader {
                expected: header_len + metadata_len,
                actual: header_len + n,
            });
        }
        open_metadata(session, &block).map(Some)
    }

    /// Skip past the metadata block and iterate the chunk records.
    pub fn into_chunks(mut self, session: &VaultSession) -> VaultResult<ChunkReader<'_, R>> {
        self.inner.seek(SeekFrom::Start(self.header.body_offset()))?;
        Ok(ChunkReader {
            inner: self.inner,
            session,
            header: self.header,
            index: 0,
            produced: 0,
            done: false,
        })
    }
}

/// Finite iterator of decrypted chunks. Stops for good after the first
/// error.
pub struct ChunkReader<'s, R> {
    inner: R,
    session: &'s VaultSession,
    header: StreamHeader,
    index: u64,
    produced: u64,
    done: bool,
}

impl<'s, R: Read> ChunkReader<'s, R> {
    pub fn header(&self) -> &StreamHeader {
        &self.header
    }

    /// Plaintext bytes yielded so far
    pub fn produced(&self) -> u64 {
        self.produced
    }

    fn corrupted(&self, reason: impl Into<String>) -> VaultError {
        VaultError::CorruptedChunkLength {
            chunk: self.index,
            reason: reason.into(),
        }
    }

    fn read_exact_or_corrupt(&mut self, buf: &mut [u8]) -> VaultResult<()> {
        let n = read_full(&mut self.inner, buf)?;
        if n < buf.len() {
            return Err(self.corrupted("record shorter than announced"));
        }
        Ok(())
    }

    fn next_chunk(&mut self) -> VaultResult<Option<Zeroizing<Vec<u8>>>> {
        let mut prefix = [0u8; 4];
        let n = read_full(&mut self.inner, &mut prefix)?;
        if n == 0 {
            if self.produced != self.header.original_size {
                return Err(self.corrupted(format!(
                    "stream ended after {} of {} bytes",
                    self.produced, self.header.original_size
                )));
            }
            return Ok(None);
        }
        if n < prefix.len() {
            return Err(self.corrupted("truncated length prefix"));
        }

        let len = u32::from_le_bytes(prefix);
        if len == 0 || len > self.header.chunk_size {
            return Err(self.corrupted(format!(
                "length {len} outside 1..={}",
                self.header.chunk_size
            )));
        }
        if self.produced + len as u64 > self.header.original_size {
            return Err(self.corrupted("chunk runs past the declared size"));
        }

        let mut nonce = [0u8; NONCE_LEN];
        self.read_exact_or_corrupt(&mut nonce)?;
        let mut body = Zeroizing::new(vec![0u8; len as usize]);
        self.read_exact_or_corrupt(&mut body)?;
        let mut tag = [0u8; TAG_LEN];
        self.read_exact_or_corrupt(&mut tag)?;

        let plaintext = open_in_place(self.session.encryption_key(), &nonce, body, &tag)?;
        self.produced += len as u64;
        self.index += 1;
        Ok(Some(plaintext))
    }
}

impl<'s, R: Read> Iterator for ChunkReader<'s, R> {
    type Item = VaultResult<Zeroizing<Vec<u8>>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Open a stream file and parse its header.
pub fn open_stream(path: &Path) -> VaultResult<StreamReader<BufReader<File>>> {
    StreamReader::new(BufReader::new(open_existing(path)?))
}

/// Pull chunks into `sink`, checking for cancellation before each one.
pub(crate) fn drain_chunks<I>(
    mut chunks: I,
    sink: &mut dyn Write,
    control: &StreamControl,
    phase: Phase,
    total: Option<u64>,
) -> VaultResult<u64>
where
    I: Iterator<Item = VaultResult<Zeroizing<Vec<u8>>>>,
{
    let mut written = 0u64;
    loop {
        control.checkpoint()?;
        let Some(chunk) = chunks.next() else { break };
        let chunk = chunk?;
        sink.write_all(&chunk)?;
        written += chunk.len() as u64;
        control.report(phase, written, total);
    }
    sink.flush()?;
    Ok(written)
}

/// Decrypt a stream file into `sink`.
pub fn decrypt_to_writer(
    path: &Path,
    session: &VaultSession,
    sink: &mut dyn Write,
    control: &StreamControl,
) -> VaultResult<u64> {
    let reader = open_stream(path)?;
    let total = reader.header().original_size;
    let chunks = reader.into_chunks(session)?;
    drain_chunks(chunks, sink, control, Phase::Decrypt, Some(total))
}

/// Decrypt a stream file into memory. Returns nothing unless every chunk
/// authenticated.
pub fn decrypt_to_vec(
    path: &Path,
    session: &VaultSession,
    control: &StreamControl,
) -> VaultResult<Zeroizing<Vec<u8>>> {
    let mut out = Zeroizing::new(Vec::new());
    decrypt_to_writer(path, session, &mut *out, control)?;
    Ok(out)
}

/// Read and decrypt only the metadata block.
pub fn read_metadata(path: &Path, session: &VaultSession) -> VaultResult<Option<Zeroizing<Vec<u8>>>> {
    open_stream(path)?.read_metadata(session)
}

/// [`EntryReader`] for stream files
#[derive(Debug, Clone, Copy)]
pub struct StreamFormat {
    header: StreamHeader,
}

impl StreamFormat {
    pub fn new(header: StreamHeader) -> Self {
        Self { header }
    }

    pub fn header(&self) -> &StreamHeader {
        &self.header
    }
}

impl EntryReader for StreamFormat {
    fn decrypt_into(
        &self,
        path: &Path,
        session: &VaultSession,
        sink: &mut dyn Write,
        control: &StreamControl,
    ) -> VaultResult<u64> {
        decrypt_to_writer(path, session, sink, control)
    }

    fn read_metadata(
        &self,
        path: &Path,
        session: &VaultSession,
    ) -> VaultResult<Option<Zeroizing<Vec<u8>>>> {
        if self.header.metadata_len == 0 {
            return Ok(None);
        }
        read_metadata(path, session)
    }
}
