use crate::config::StageSpec;
use crate::error::{Result, TsError};
use crate::format::ts::{PacketBatch, PacketMetadata, TsPacket, TS_PACKET_SIZE};
use crate::pipeline::{Flow, Stage, StageRole};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileOptions {
    pub path: PathBuf,
}

/// Reads packets from a file.
///
/// The input must be a plain sequence of 188-byte packets. A lost sync byte
/// or a truncated last packet stops the pipeline.
pub struct FileInput {
    options: FileOptions,
    reader: Option<BufReader<File>>,
    started: Option<Instant>,
    packets: u64,
}

impl FileInput {
    pub fn new(options: FileOptions) -> Self {
        Self {
            options,
            reader: None,
            started: None,
            packets: 0,
        }
    }

    pub fn create(spec: &StageSpec) -> Result<Box<dyn Stage>> {
        Ok(Box::new(Self::new(spec.options()?)))
    }
}

#[async_trait]
impl Stage for FileInput {
    fn name(&self) -> &str {
        "file"
    }

    fn role(&self) -> StageRole {
        StageRole::Source
    }

    async fn start(&mut self) -> Result<()> {
        let path = &self.options.path;
        let file = File::open(path)
            .await
            .map_err(|e| TsError::stage("file", format!("cannot open {}: {}", path.display(), e)))?;
        let metadata = file.metadata().await?;
        if metadata.is_file() && metadata.len() % TS_PACKET_SIZE as u64 != 0 {
            log::warn!(
                "file: {} is {} bytes, not a multiple of {}",
                path.display(),
                metadata.len(),
                TS_PACKET_SIZE
            );
        }
        log::info!("file: reading {}", path.display());
        self.reader = Some(BufReader::new(file));
        self.started = Some(Instant::now());
        Ok(())
    }

    async fn process_batch(&mut self, batch: &mut PacketBatch) -> Result<Flow> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| TsError::InvalidData("input file is not open".into()))?;
        let mut buf = [0u8; TS_PACKET_SIZE];

        while !batch.is_full() {
            match read_packet(reader, &mut buf).await? {
                0 => return Ok(Flow::EndOfStream),
                TS_PACKET_SIZE => {}
                partial => {
                    return Err(TsError::InvalidData(format!(
                        "truncated packet at end of input ({} bytes)",
                        partial
                    )))
                }
            }
            let packet = TsPacket::from_slice(&buf).map_err(|_| {
                TsError::InvalidData(format!("synchronization lost at packet {}", self.packets))
            })?;
            let mut metadata = PacketMetadata::new();
            if let Some(started) = self.started {
                metadata = metadata.with_input_timestamp(started.elapsed());
            }
            batch.push(packet, metadata)?;
            self.packets += 1;
        }
        Ok(Flow::Continue)
    }

    async fn stop(&mut self) -> Result<()> {
        self.reader = None;
        log::info!("file: {} packets read from {}", self.packets, self.options.path.display());
        Ok(())
    }

    async fn abort(&mut self) {
        self.reader = None;
    }
}

/// Fills `buf` unless the input ends first; returns the bytes read.
async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8; TS_PACKET_SIZE]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Writes every packet to a file.
pub struct FileOutput {
    options: FileOptions,
    writer: Option<BufWriter<File>>,
    packets: u64,
}

impl FileOutput {
    pub fn new(options: FileOptions) -> Self {
        Self {
            options,
            writer: None,
            packets: 0,
        }
    }

    pub fn create(spec: &StageSpec) -> Result<Box<dyn Stage>> {
        Ok(Box::new(Self::new(spec.options()?)))
    }
}

#[async_trait]
impl Stage for FileOutput {
    fn name(&self) -> &str {
        "file"
    }

    fn role(&self) -> StageRole {
        StageRole::Sink
    }

    async fn start(&mut self) -> Result<()> {
        let path = &self.options.path;
        let file = File::create(path)
            .await
            .map_err(|e| TsError::stage("file", format!("cannot create {}: {}", path.display(), e)))?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    async fn process_batch(&mut self, batch: &mut PacketBatch) -> Result<Flow> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| TsError::InvalidData("output file is not open".into()))?;
        for packet in batch.packets() {
            writer.write_all(packet.as_bytes()).await?;
        }
        self.packets += batch.len() as u64;
        Ok(Flow::Continue)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await?;
            writer.get_mut().sync_all().await?;
        }
        log::info!("file: {} packets written to {}", self.packets, self.options.path.display());
        Ok(())
    }

    async fn abort(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush().await {
                log::warn!("file: error flushing {}: {}", self.options.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ts::TSHeader;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use tokio::runtime::Runtime;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tspipe-file-{}-{}", std::process::id(), name))
    }

    fn write_packets(path: &Path, count: u16, extra: &[u8]) {
        let mut data = Vec::new();
        for pid in 0..count {
            let packet = TsPacket::build(&TSHeader::new(0x100 + pid), None, &[0xAB; 10]).unwrap();
            data.extend_from_slice(packet.as_bytes());
        }
        data.extend_from_slice(extra);
        std::fs::write(path, data).unwrap();
    }

    #[test]
    fn test_reads_in_batches_until_end() {
        Runtime::new().unwrap().block_on(async {
            let path = temp_path("batches.ts");
            write_packets(&path, 10, &[]);

            let mut input = FileInput::new(FileOptions { path: path.clone() });
            input.start().await.unwrap();
            let mut first = PacketBatch::with_capacity(4);
            assert_eq!(input.process_batch(&mut first).await.unwrap(), Flow::Continue);
            assert_eq!(first.len(), 4);
            assert_eq!(first.packets()[3].pid(), 0x103);
            assert!(first.metadata()[0].input_timestamp.is_some());

            let mut second = PacketBatch::with_capacity(8);
            assert_eq!(input.process_batch(&mut second).await.unwrap(), Flow::EndOfStream);
            assert_eq!(second.len(), 6);
            input.stop().await.unwrap();
            std::fs::remove_file(&path).unwrap();
        });
    }

    #[test]
    fn test_truncated_packet_is_fatal() {
        Runtime::new().unwrap().block_on(async {
            let path = temp_path("truncated.ts");
            write_packets(&path, 2, &[0x47, 0x00, 0x10]);

            let mut input = FileInput::new(FileOptions { path: path.clone() });
            input.start().await.unwrap();
            let mut batch = PacketBatch::with_capacity(16);
            let err = input.process_batch(&mut batch).await.unwrap_err();
            assert!(err.to_string().contains("truncated packet"));
            std::fs::remove_file(&path).unwrap();
        });
    }

    #[test]
    fn test_lost_sync_is_fatal() {
        Runtime::new().unwrap().block_on(async {
            let path = temp_path("nosync.ts");
            write_packets(&path, 1, &[0u8; TS_PACKET_SIZE]);

            let mut input = FileInput::new(FileOptions { path: path.clone() });
            input.start().await.unwrap();
            let mut batch = PacketBatch::with_capacity(16);
            let err = input.process_batch(&mut batch).await.unwrap_err();
            assert!(err.to_string().contains("synchronization lost at packet 1"));
            std::fs::remove_file(&path).unwrap();
        });
    }

    #[test]
    fn test_missing_input_fails_at_start() {
        Runtime::new().unwrap().block_on(async {
            let mut input = FileInput::new(FileOptions {
                path: temp_path("does-not-exist.ts"),
            });
            let err = input.start().await.unwrap_err();
            assert!(err.to_string().starts_with("stage file failed: cannot open"));
        });
    }

    #[test]
    fn test_output_writes_packets() {
        Runtime::new().unwrap().block_on(async {
            let path = temp_path("out.ts");
            let mut output = FileOutput::new(FileOptions { path: path.clone() });
            output.start().await.unwrap();

            let mut batch = PacketBatch::with_capacity(3);
            for _ in 0..3 {
                batch.push(TsPacket::null(), PacketMetadata::new()).unwrap();
            }
            output.process_batch(&mut batch).await.unwrap();
            output.stop().await.unwrap();

            let written = std::fs::read(&path).unwrap();
            assert_eq!(written.len(), 3 * TS_PACKET_SIZE);
            assert_eq!(&written[..TS_PACKET_SIZE], TsPacket::null().as_bytes());
            std::fs::remove_file(&path).unwrap();
        });
    }
}
