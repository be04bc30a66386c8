use super::demuxer::{BinaryTable, SectionDemux, TableHandler};
use super::continuity::{CcMode, ContinuityRegulator};
use super::packet::{PacketMetadata, TsPacket};
use super::packetizer::Packetizer;
use super::parser::{Pat, Pmt};
use super::pcr::PcrAnalyzer;
use super::retention::RetentionWindow;
use super::segment::{BoundaryConfig, BoundaryPolicy, Decision, ReferenceStream};
use super::types::*;
use crate::error::{Result, TsError};
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use url::Url;

/// One closed media segment as listed in a playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HLSSegment {
    pub uri: String,
    pub path: PathBuf,
    pub duration: Duration,
    pub bitrate: u64,
    pub packets: u64,
    pub sequence_number: u64,
    pub created_at: DateTime<Utc>,
}

/// A media playlist (RFC 8216 §4.3.3), rendered with integer arithmetic.
#[derive(Debug, Clone)]
pub struct HLSPlaylist {
    pub version: u8,
    pub target_duration: Duration,
    pub media_sequence: u64,
    pub segments: Vec<HLSSegment>,
    pub is_endlist: bool,
    /// Adds `#EXT-X-PLAYLIST-TYPE:VOD`.
    pub is_vod: bool,
}

impl HLSPlaylist {
    pub fn new(target_duration: Duration) -> Self {
        Self {
            version: 3,
            target_duration,
            media_sequence: 0,
            segments: Vec::new(),
            is_endlist: false,
            is_vod: false,
        }
    }

    pub fn with_media_sequence(mut self, sequence: u64) -> Self {
        self.media_sequence = sequence;
        self
    }

    pub fn with_vod(mut self, vod: bool) -> Self {
        self.is_vod = vod;
        self
    }

    /// Appends a segment. A segment with the same URI is never listed twice.
    pub fn add_segment(&mut self, segment: HLSSegment) -> bool {
        if self.segments.iter().any(|s| s.uri == segment.uri) {
            return false;
        }
        self.segments.push(segment);
        true
    }

    /// Removes the oldest segment and advances the media sequence.
    pub fn pop_first_segment(&mut self) -> Option<HLSSegment> {
        if self.segments.is_empty() {
            return None;
        }
        self.media_sequence += 1;
        Some(self.segments.remove(0))
    }

    /// `#EXT-X-TARGETDURATION`: the configured target, raised to cover the
    /// rounded duration of every listed segment.
    pub fn target_duration_secs(&self) -> u64 {
        let target = (self.target_duration.as_millis() as u64).div_ceil(1000);
        self.segments
            .iter()
            .map(|s| (s.duration.as_millis() as u64 + 500) / 1000)
            .fold(target, u64::max)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("#EXTM3U\n");
        out.push_str(&format!("#EXT-X-VERSION:{}\n", self.version));
        out.push_str(&format!(
            "#EXT-X-TARGETDURATION:{}\n",
            self.target_duration_secs()
        ));
        out.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{}\n", self.media_sequence));
        // EVENT playlists may not drop segments, so a live window has no type
        if self.is_vod {
            out.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");
        }
        for segment in &self.segments {
            let ms = segment.duration.as_millis();
            out.push_str(&format!("#EXTINF:{}.{:03},\n", ms / 1000, ms % 1000));
            out.push_str(&segment.uri);
            out.push('\n');
        }
        if self.is_endlist {
            out.push_str("#EXT-X-ENDLIST\n");
        }
        out
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(self.render().as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Replaces `path` atomically: the playlist is written next to it and renamed.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        let mut file = File::create(&temp).await?;
        self.write_to(&mut file).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp, path).await?;
        Ok(())
    }
}

/// Generates segment file names from a template.
///
/// `dir/foo.ts` yields `dir/foo-000000.ts`, `dir/foo-000001.ts`, ... A
/// template whose stem already ends in digits seeds the counter with them
/// and keeps their width: `foo-027.ts` yields `foo-027.ts`, `foo-028.ts`.
#[derive(Debug, Clone)]
pub struct SegmentNamer {
    prefix: String,
    extension: String,
    width: usize,
    next: u64,
}

const DEFAULT_COUNTER_WIDTH: usize = 6;

impl SegmentNamer {
    /// Fails when the trailing digits of the template do not fit a `u64`.
    pub fn new(template: &str) -> Result<Self> {
        let file_start = template.rfind(|c: char| c == '/' || c == '\\').map_or(0, |i| i + 1);
        let (stem, extension) = match template[file_start..].rfind('.') {
            Some(dot) if dot > 0 => template.split_at(file_start + dot),
            _ => (template, ""),
        };

        let digits = stem.len() - stem.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        let (prefix, width, next) = if digits > 0 {
            let (prefix, number) = stem.split_at(stem.len() - digits);
            let next = number.parse().map_err(|_| {
                TsError::Config(format!(
                    "segment template {}: counter {} is out of range",
                    template, number
                ))
            })?;
            (prefix.to_string(), digits, next)
        } else {
            (format!("{}-", stem), DEFAULT_COUNTER_WIDTH, 0)
        };

        Ok(Self {
            prefix,
            extension: extension.to_string(),
            width,
            next,
        })
    }

    pub fn next_name(&mut self) -> String {
        let name = format!(
            "{}{:0width$}{}",
            self.prefix,
            self.next,
            self.extension,
            width = self.width
        );
        self.next += 1;
        name
    }
}

/// URI of `segment` relative to the directory holding `playlist`.
pub fn relative_uri(playlist: &Path, segment: &Path) -> String {
    let fallback = || {
        segment
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    };
    match (
        Url::from_file_path(absolute(playlist)),
        Url::from_file_path(absolute(segment)),
    ) {
        (Ok(base), Ok(target)) => base.make_relative(&target).unwrap_or_else(fallback),
        _ => fallback(),
    }
}

fn absolute(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|dir| dir.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Collects the PAT and the PMT of the first program, and keeps a
/// packetized copy of each for the head of every segment.
#[derive(Debug, Default)]
struct ProgramTracker {
    pmt_pid: Option<u16>,
    new_pmt_pid: Option<u16>,
    reference: Option<ReferenceStream>,
    pat_packets: Vec<TsPacket>,
    pmt_packets: Vec<TsPacket>,
}

impl ProgramTracker {
    fn take_new_pmt_pid(&mut self) -> Option<u16> {
        self.new_pmt_pid.take()
    }

    fn head_packets(&self) -> impl Iterator<Item = &TsPacket> {
        self.pat_packets.iter().chain(self.pmt_packets.iter())
    }
}

impl TableHandler for ProgramTracker {
    fn handle_table(&mut self, table: &BinaryTable) {
        match table.table_id() {
            TABLE_ID_PAT => {
                let pat = match Pat::from_table(table) {
                    Ok(pat) => pat,
                    Err(e) => {
                        log::warn!("invalid PAT: {}", e);
                        return;
                    }
                };
                if let Some(program) = pat.programs.iter().min_by_key(|p| p.program_number) {
                    if self.pmt_pid != Some(program.program_map_pid) {
                        log::info!(
                            "using service id 0x{:X} ({}) as reference, PMT PID 0x{:X} ({})",
                            program.program_number,
                            program.program_number,
                            program.program_map_pid,
                            program.program_map_pid
                        );
                        self.pmt_pid = Some(program.program_map_pid);
                        self.new_pmt_pid = Some(program.program_map_pid);
                    }
                }
                self.pat_packets = Packetizer::new(table.pid()).packetize_table(table);
            }
            TABLE_ID_PMT if Some(table.pid()) == self.pmt_pid => {
                let pmt = match Pmt::from_table(table) {
                    Ok(pmt) => pmt,
                    Err(e) => {
                        log::warn!("invalid PMT: {}", e);
                        return;
                    }
                };
                self.reference = pmt.first_video().map(|stream| ReferenceStream {
                    pid: stream.elementary_pid,
                    stream_type: stream.stream_type,
                });
                match self.reference {
                    Some(video) => log::info!(
                        "using video PID 0x{:X} ({}) as reference",
                        video.pid,
                        video.pid
                    ),
                    None => log::warn!(
                        "no video PID found in service 0x{:X} ({})",
                        pmt.program_number,
                        pmt.program_number
                    ),
                }
                self.pmt_packets = Packetizer::new(table.pid()).packetize_table(table);
            }
            _ => {}
        }
    }
}

/// Settings of an [`HLSSegmenter`].
#[derive(Debug, Clone)]
pub struct HLSConfig {
    /// Segment file name template.
    pub template: String,
    pub playlist: Option<PathBuf>,
    pub boundary: BoundaryConfig,
    /// Number of segments kept in live mode; 0 selects archival mode.
    pub live_depth: usize,
    pub start_media_sequence: u64,
}

struct OpenSegment {
    path: PathBuf,
    writer: BufWriter<File>,
    created_at: DateTime<Utc>,
}

/// Cuts a transport stream into segment files and maintains the playlist.
///
/// Every segment starts with the current PAT and PMT. Cuts follow the
/// [`BoundaryPolicy`], aligned on the first video stream of the first
/// program; segment timing comes from the PCRs seen inside the segment.
pub struct HLSSegmenter {
    config: HLSConfig,
    namer: SegmentNamer,
    policy: BoundaryPolicy,
    demux: SectionDemux,
    tracker: ProgramTracker,
    pcr: PcrAnalyzer,
    cc: ContinuityRegulator,
    playlist: Option<HLSPlaylist>,
    retention: RetentionWindow<PathBuf>,
    current: Option<OpenSegment>,
    closed_segments: u64,
}

impl HLSSegmenter {
    pub fn new(config: HLSConfig) -> Result<Self> {
        if config.template.is_empty() {
            return Err(TsError::Config("segment template must not be empty".into()));
        }
        let policy = BoundaryPolicy::new(config.boundary.clone())?;
        let playlist = config.playlist.as_ref().map(|_| {
            HLSPlaylist::new(config.boundary.target_duration)
                .with_media_sequence(config.start_media_sequence)
                .with_vod(config.live_depth == 0)
        });

        Ok(Self {
            namer: SegmentNamer::new(&config.template)?,
            policy,
            demux: SectionDemux::with_pids([PID_PAT].into_iter().collect()),
            tracker: ProgramTracker::default(),
            pcr: PcrAnalyzer::new(1, 4),
            cc: ContinuityRegulator::new(CcMode::Generate).with_pids([PID_PAT].into_iter().collect()),
            playlist,
            retention: RetentionWindow::new(config.live_depth),
            current: None,
            closed_segments: 0,
            config,
        })
    }

    pub fn config(&self) -> &HLSConfig {
        &self.config
    }

    pub fn playlist(&self) -> Option<&HLSPlaylist> {
        self.playlist.as_ref()
    }

    pub fn reference_stream(&self) -> Option<ReferenceStream> {
        self.tracker.reference
    }

    pub fn closed_segments(&self) -> u64 {
        self.closed_segments
    }

    pub fn retained_segments(&self) -> impl Iterator<Item = &PathBuf> {
        self.retention.iter()
    }

    /// Path of the segment being written, if any.
    pub fn current_segment(&self) -> Option<&Path> {
        self.current.as_ref().map(|segment| segment.path.as_path())
    }

    pub async fn write_packet(&mut self, packet: &TsPacket, metadata: &PacketMetadata) -> Result<()> {
        // the first segment opens before any table is known, so it has no head
        if self.current.is_none() {
            self.open_segment().await?;
        }
        self.demux.feed_packet(packet, &mut self.tracker);
        if let Some(pid) = self.tracker.take_new_pmt_pid() {
            self.demux.add_pid(pid);
            self.cc.add_pid(pid);
        }

        let decision = self.policy.decide(
            packet,
            metadata,
            self.tracker.reference,
            self.pcr.bitrate(),
        );
        if let Decision::Cut(reason) = decision {
            if self.policy.unit_packets() == 0 {
                log::debug!("ignoring cut on an empty segment: {:?}", reason);
                self.policy.open_unit();
            } else {
                log::debug!("cutting segment: {:?}", reason);
                self.close_segment(false).await?;
                self.open_segment().await?;
            }
        }

        self.pcr.feed(packet);
        self.write_one(*packet).await?;
        self.policy.add_packets(1);
        Ok(())
    }

    async fn write_one(&mut self, mut packet: TsPacket) -> Result<()> {
        self.cc.feed(&mut packet);
        self.write_raw(&packet).await
    }

    async fn write_raw(&mut self, packet: &TsPacket) -> Result<()> {
        let segment = self
            .current
            .as_mut()
            .ok_or_else(|| TsError::InvalidData("no open segment".into()))?;
        segment.writer.write_all(packet.as_bytes()).await?;
        Ok(())
    }

    async fn open_segment(&mut self) -> Result<()> {
        let path = PathBuf::from(self.namer.next_name());
        log::info!("creating media segment {}", path.display());
        let file = File::create(&path).await?;
        self.current = Some(OpenSegment {
            path,
            writer: BufWriter::new(file),
            created_at: Utc::now(),
        });

        self.pcr.reset();
        self.policy.open_unit();

        let head: Vec<TsPacket> = self.tracker.head_packets().copied().collect();
        let count = head.len() as u64;
        for mut packet in head {
            self.cc.feed_inserted(&mut packet);
            self.write_raw(&packet).await?;
        }
        self.policy.add_packets(count);
        Ok(())
    }

    /// Closes the open segment, lists it and rewrites the playlist.
    ///
    /// Does nothing when no segment is open, so closing twice neither
    /// duplicates the segment in the playlist nor in the retention window.
    pub async fn close_segment(&mut self, end_of_stream: bool) -> Result<()> {
        let Some(mut segment) = self.current.take() else {
            return Ok(());
        };
        segment.writer.flush().await?;
        segment.writer.get_mut().sync_all().await?;
        drop(segment.writer);

        let timing = self.policy.close_unit(self.pcr.bitrate());
        self.closed_segments += 1;
        log::debug!(
            "closed {} ({} packets, {} ms, {} b/s, opened {})",
            segment.path.display(),
            timing.packets,
            timing.duration.as_millis(),
            timing.bitrate,
            segment.created_at.to_rfc3339()
        );

        if let (Some(playlist), Some(playlist_path)) = (self.playlist.as_mut(), self.config.playlist.as_ref()) {
            let sequence_number = playlist.media_sequence + playlist.segments.len() as u64;
            playlist.add_segment(HLSSegment {
                uri: relative_uri(playlist_path, &segment.path),
                path: segment.path.clone(),
                duration: timing.duration,
                bitrate: timing.bitrate,
                packets: timing.packets,
                sequence_number,
                created_at: segment.created_at,
            });
            while self.config.live_depth > 0 && playlist.segments.len() > self.config.live_depth {
                playlist.pop_first_segment();
            }
            playlist.is_endlist = end_of_stream;
            playlist.save(playlist_path).await?;
        }

        if self.config.live_depth > 0 {
            for obsolete in self.retention.register(segment.path) {
                log::info!("deleting obsolete segment file {}", obsolete.display());
                if let Err(e) = tokio::fs::remove_file(&obsolete).await {
                    log::warn!("error deleting {}: {}", obsolete.display(), e);
                }
            }
        }
        Ok(())
    }

    /// Ends the stream: closes the last segment and marks the playlist complete.
    pub async fn finish(&mut self) -> Result<()> {
        self.close_segment(true).await
    }

    /// Releases the open segment file without listing it.
    pub async fn abort(&mut self) {
        if let Some(mut segment) = self.current.take() {
            if let Err(e) = segment.writer.flush().await {
                log::warn!("error flushing {}: {}", segment.path.display(), e);
            }
            self.policy.close_unit(None);
            log::warn!(
                "segment {} is incomplete and was not added to the playlist",
                segment.path.display()
            );
        }
    }
}
