use super::registry::PluginRegistry;
use super::stage::{Flow, Stage, StageRole};
use crate::config::{PipelineConfig, DEFAULT_BATCH_SIZE, DEFAULT_BUFFER_DEPTH, MAX_BATCH_SIZE};
use crate::error::{Result, TsError};
use crate::format::ts::PacketBatch;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// External abort switch of a pipeline.
///
/// Cloning is cheap; every clone controls the same pipeline.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once [`abort`](Self::abort) has been called.
    pub async fn aborted(&self) {
        self.token.cancelled().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    /// The source reached end of stream and every stage stopped.
    Completed,
    /// The abort handle was triggered before completion.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub name: String,
    pub role: StageRole,
    /// Packets produced (source), forwarded (transform) or consumed (sink).
    pub packets: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub status: PipelineStatus,
    pub stages: Vec<StageReport>,
}

/// An ordered chain of stages: one source, any number of transforms, one sink.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    buffer_depth: usize,
    batch_size: usize,
    abort: AbortHandle,
}

impl Pipeline {
    /// Instantiates every stage of `config` through `registry`.
    ///
    /// Unknown plugins, invalid plugin options and stage count violations are
    /// reported here, before anything is opened.
    pub fn build(config: &PipelineConfig, registry: &PluginRegistry) -> Result<Self> {
        config.validate()?;

        let mut stages = Vec::with_capacity(config.stage_count());
        stages.push(registry.create(StageRole::Source, &config.input)?);
        for spec in &config.processors {
            stages.push(registry.create(StageRole::Transform, spec)?);
        }
        stages.push(registry.create(StageRole::Sink, &config.output)?);

        Ok(Self::from_stages(stages)?
            .with_buffer_depth(config.buffer_depth)
            .with_batch_size(config.batch_size))
    }

    /// Assembles a pipeline from already constructed stages.
    pub fn from_stages(stages: Vec<Box<dyn Stage>>) -> Result<Self> {
        if stages.len() < 2 {
            return Err(TsError::Config(
                "a pipeline needs at least an input and an output stage".into(),
            ));
        }
        let last = stages.len() - 1;
        for (index, stage) in stages.iter().enumerate() {
            let expected = match index {
                0 => StageRole::Source,
                i if i == last => StageRole::Sink,
                _ => StageRole::Transform,
            };
            if stage.role() != expected {
                return Err(TsError::Config(format!(
                    "stage {} ('{}') has role {}, expected {}",
                    index,
                    stage.name(),
                    stage.role(),
                    expected
                )));
            }
        }

        Ok(Self {
            stages,
            buffer_depth: DEFAULT_BUFFER_DEPTH,
            batch_size: DEFAULT_BATCH_SIZE,
            abort: AbortHandle::default(),
        })
    }

    /// Number of batches each hand-off queue holds.
    pub fn with_buffer_depth(mut self, depth: usize) -> Self {
        self.buffer_depth = depth.max(1);
        self
    }

    /// Maximum packets per batch.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Runs the pipeline to completion.
    ///
    /// Stages are started in order; if one fails to start, the ones already
    /// started are aborted and the error is returned. Afterwards each stage
    /// runs in its own task. The first stage error cancels every other stage
    /// and is returned once all tasks have terminated.
    pub async fn run(mut self) -> Result<PipelineReport> {
        let stages: Vec<(String, StageRole)> = self
            .stages
            .iter()
            .map(|stage| (stage.name().to_string(), stage.role()))
            .collect();
        log::info!(
            "starting pipeline: {}",
            stages.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>().join(" -> ")
        );

        for index in 0..self.stages.len() {
            if let Err(e) = self.stages[index].start().await {
                log::error!("{}: start failed: {}", stages[index].0, e);
                for started in self.stages[..index].iter_mut().rev() {
                    started.abort().await;
                }
                return Err(e);
            }
        }

        let token = self.abort.token.child_token();
        let failure = Arc::new(Mutex::new(None));
        let counters = Arc::new(Mutex::new(vec![0u64; stages.len()]));

        let (senders, receivers): (Vec<_>, Vec<_>) = (1..stages.len())
            .map(|_| mpsc::channel::<PacketBatch>(self.buffer_depth))
            .unzip();
        let inputs = std::iter::once(None).chain(receivers.into_iter().map(Some));
        let outputs = senders.into_iter().map(Some).chain(std::iter::once(None));

        let tasks: Vec<_> = self
            .stages
            .into_iter()
            .zip(inputs.zip(outputs))
            .enumerate()
            .map(|(index, (stage, (input, output)))| {
                let runner = StageRunner {
                    index,
                    stage,
                    input,
                    output,
                    token: token.clone(),
                    batch_size: self.batch_size,
                    counters: counters.clone(),
                    failure: failure.clone(),
                };
                tokio::spawn(runner.run())
            })
            .collect();

        for (result, (name, _)) in join_all(tasks).await.into_iter().zip(&stages) {
            if let Err(e) = result {
                failure
                    .lock()
                    .get_or_insert_with(|| TsError::stage(name.clone(), format!("task failed: {}", e)));
            }
        }
        let error = failure.lock().take();
        if let Some(error) = error {
            return Err(error);
        }

        let status = if self.abort.is_aborted() {
            PipelineStatus::Aborted
        } else {
            PipelineStatus::Completed
        };
        let counters = counters.lock();
        let report = PipelineReport {
            status,
            stages: stages
                .into_iter()
                .zip(counters.iter())
                .map(|((name, role), &packets)| StageReport { name, role, packets })
                .collect(),
        };
        log::info!("pipeline {:?}", report.status);
        Ok(report)
    }
}

enum Exit {
    Finished,
    Cancelled,
}

enum Handoff {
    Delivered,
    Cancelled,
    Closed,
}

struct StageRunner {
    index: usize,
    stage: Box<dyn Stage>,
    input: Option<mpsc::Receiver<PacketBatch>>,
    output: Option<mpsc::Sender<PacketBatch>>,
    token: CancellationToken,
    batch_size: usize,
    counters: Arc<Mutex<Vec<u64>>>,
    failure: Arc<Mutex<Option<TsError>>>,
}

impl StageRunner {
    async fn run(mut self) {
        let result = match self.input.take() {
            None => self.produce().await,
            Some(input) => self.forward(input).await,
        };

        match result {
            Ok(Exit::Finished) => match self.stage.stop().await {
                Ok(()) => log::debug!("{}: stopped", self.stage.name()),
                Err(e) => self.fail(e),
            },
            Ok(Exit::Cancelled) => {
                self.stage.abort().await;
                log::debug!("{}: aborted", self.stage.name());
            }
            Err(e) => {
                self.fail(e);
                self.stage.abort().await;
            }
        }
        // Dropping the sender here tells the downstream stage the stream ended.
    }

    async fn produce(&mut self) -> Result<Exit> {
        let token = self.token.clone();
        loop {
            let mut batch = PacketBatch::with_capacity(self.batch_size);
            let flow = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(Exit::Cancelled),
                flow = self.stage.process_batch(&mut batch) => flow?,
            };
            self.count(batch.len());
            match hand_off(self.output.as_ref(), &token, batch).await {
                Handoff::Delivered => {}
                Handoff::Cancelled => return Ok(Exit::Cancelled),
                Handoff::Closed => return Ok(Exit::Finished),
            }
            if flow == Flow::EndOfStream {
                return Ok(Exit::Finished);
            }
        }
    }

    async fn forward(&mut self, mut input: mpsc::Receiver<PacketBatch>) -> Result<Exit> {
        let token = self.token.clone();
        loop {
            let received = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(Exit::Cancelled),
                batch = input.recv() => batch,
            };
            let Some(mut batch) = received else {
                return Ok(Exit::Finished);
            };

            let flow = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(Exit::Cancelled),
                flow = self.stage.process_batch(&mut batch) => flow?,
            };
            self.count(batch.len());
            match hand_off(self.output.as_ref(), &token, batch).await {
                Handoff::Delivered => {}
                Handoff::Cancelled => return Ok(Exit::Cancelled),
                Handoff::Closed => return Ok(Exit::Finished),
            }
            if flow == Flow::EndOfStream {
                return Ok(Exit::Finished);
            }
        }
    }

    fn count(&self, packets: usize) {
        self.counters.lock()[self.index] += packets as u64;
    }

    fn fail(&self, error: TsError) {
        let name = self.stage.name().to_string();
        log::error!("{}: {}", name, error);
        let error = match error {
            TsError::Stage { .. } => error,
            other => TsError::stage(name, other.to_string()),
        };
        self.failure.lock().get_or_insert(error);
        self.token.cancel();
    }
}

/// Sends `batch` downstream, blocking while the queue is full.
async fn hand_off(
    output: Option<&mpsc::Sender<PacketBatch>>,
    token: &CancellationToken,
    batch: PacketBatch,
) -> Handoff {
    let Some(output) = output else {
        return Handoff::Delivered;
    };
    if batch.is_empty() {
        return Handoff::Delivered;
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Handoff::Cancelled,
        sent = output.send(batch) => match sent {
            Ok(()) => Handoff::Delivered,
            Err(_) if token.is_cancelled() => Handoff::Cancelled,
            // Downstream ended the stream early.
            Err(_) => Handoff::Closed,
        },
    }
}
