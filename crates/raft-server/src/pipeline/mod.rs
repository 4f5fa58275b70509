//! # pipeline
//!
//! why: turn client commands into durable, replicated log entries in submission order
//! relations: started by server.rs, stages in stages.rs, events in event.rs, counters in metrics.rs
//! what: CommandPipeline (submit/execute/shutdown), CommandReceipt, stage runner

pub mod event;
pub mod metrics;
pub mod stages;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::ClientCommand;
use crate::config::PipelineConfig;
use crate::driver::NodeHandle;
use crate::error::PipelineError;
use crate::journal::SharedJournal;
use crate::replication::ReplicationActorSet;

pub use event::{CommittedEntry, ScheduledCommandEvent};
pub use metrics::{PipelineMetrics, PipelineMetricsSnapshot, StageKind};
pub use stages::{IndexCursor, LogEncoder, LogReplicator, LogWriter, NodeStateValidator, Stage};

type EventSender = mpsc::Sender<Box<ScheduledCommandEvent>>;
type EventReceiver = mpsc::Receiver<Box<ScheduledCommandEvent>>;

/// Resolves once the submitted command is written or dropped.
pub struct CommandReceipt {
    sequence: u64,
    outcome: oneshot::Receiver<Result<CommittedEntry, PipelineError>>,
}

impl CommandReceipt {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub async fn wait(self) -> Result<CommittedEntry, PipelineError> {
        self.outcome.await.map_err(|_| PipelineError::Shutdown)?
    }
}

/// Validate, encode, replicate, write: one task per stage, bounded channels
/// between them.
///
/// Each stage handles events strictly in arrival order, so entries reach the
/// journal in the order they were submitted.
pub struct CommandPipeline {
    input: EventSender,
    metrics: Arc<PipelineMetrics>,
    sequence: AtomicU64,
    tasks: Vec<JoinHandle<()>>,
}

impl CommandPipeline {
    pub fn start(
        config: &PipelineConfig,
        node: NodeHandle,
        actors: Arc<ReplicationActorSet>,
        journal: SharedJournal,
        require_quorum: bool,
    ) -> Self {
        let metrics = Arc::new(PipelineMetrics::new());
        let cursor = Arc::new(IndexCursor::default());
        let capacity = config.buffer_size;

        let (input, validate_rx) = mpsc::channel(capacity);
        let (to_encode, encode_rx) = mpsc::channel(capacity);
        let (to_replicate, replicate_rx) = mpsc::channel(capacity);
        let (to_write, write_rx) = mpsc::channel(capacity);

        let runner = StageRunner {
            metrics: Arc::clone(&metrics),
            cursor: Arc::clone(&cursor),
        };
        let tasks = vec![
            runner.spawn(
                NodeStateValidator::new(node.clone()),
                validate_rx,
                Some(to_encode),
            ),
            runner.spawn(
                LogEncoder::new(node.clone(), Arc::clone(&cursor)),
                encode_rx,
                Some(to_replicate),
            ),
            runner.spawn(
                LogReplicator::new(actors, require_quorum),
                replicate_rx,
                Some(to_write),
            ),
            runner.spawn(
                LogWriter::new(node, journal, Arc::clone(&metrics)),
                write_rx,
                None,
            ),
        ];

        Self {
            input,
            metrics,
            sequence: AtomicU64::new(1),
            tasks,
        }
    }

    /// Schedule `command`; the receipt resolves when it leaves the pipeline.
    pub async fn submit<C: ClientCommand>(
        &self,
        command: C,
    ) -> Result<CommandReceipt, PipelineError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let (tx, outcome) = oneshot::channel();
        let event = ScheduledCommandEvent::new(sequence, Box::new(command), Some(tx));
        self.input
            .send(Box::new(event))
            .await
            .map_err(|_| PipelineError::Shutdown)?;
        self.metrics.record_scheduled();
        Ok(CommandReceipt { sequence, outcome })
    }

    /// Submit and wait for the outcome.
    pub async fn execute<C: ClientCommand>(
        &self,
        command: C,
    ) -> Result<CommittedEntry, PipelineError> {
        self.submit(command).await?.wait().await
    }

    pub fn metrics(&self) -> PipelineMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stop accepting commands, let in-flight events drain, and join the
    /// stage tasks.
    pub async fn shutdown(self) {
        drop(self.input);
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(%err, "pipeline stage task failed");
            }
        }
    }
}

#[derive(Clone)]
struct StageRunner {
    metrics: Arc<PipelineMetrics>,
    cursor: Arc<IndexCursor>,
}

impl StageRunner {
    fn spawn<S: Stage>(
        &self,
        stage: S,
        input: EventReceiver,
        output: Option<EventSender>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.clone().run(stage, input, output))
    }

    async fn run<S: Stage>(
        self,
        mut stage: S,
        mut input: EventReceiver,
        output: Option<EventSender>,
    ) {
        let kind = stage.kind();
        while let Some(mut event) = input.recv().await {
            match stage.handle(&mut event).await {
                Ok(()) => match &output {
                    Some(next) => {
                        if next.send(event).await.is_err() {
                            debug!(stage = kind.name(), "downstream stage closed");
                            break;
                        }
                    }
                    None => match event.committed() {
                        Some(committed) => event.complete(Ok(committed)),
                        None => event.complete(Err(PipelineError::NotEncoded {
                            stage: kind.name(),
                        })),
                    },
                },
                Err(err) => self.drop_event(kind, &mut event, err),
            }
        }
        debug!(stage = kind.name(), "pipeline stage stopped");
    }

    fn drop_event(&self, kind: StageKind, event: &mut ScheduledCommandEvent, err: PipelineError) {
        self.metrics.record_drop(kind);
        if let Some(entry) = event.log_entry() {
            let in_sequence = !matches!(err, PipelineError::OutOfSequence { .. });
            if in_sequence && self.cursor.release(entry.index, event.epoch()) {
                debug!(index = entry.index, "rewound index cursor");
            }
        }
        warn!(
            stage = kind.name(),
            sequence = event.sequence(),
            %err,
            "dropping scheduled command"
        );
        event.complete(Err(err));
    }
}
