//! Many concurrent producers feeding one serialized consumer.
//!
//! Producers run with bounded concurrency and push every item onto a shared
//! unbounded queue as soon as it is made. A single consumer task drains the
//! queue in opportunistic batches and hands each batch to a [`Sink`].
//!
//! A failing producer stops the run: no new inputs are started, producers
//! already in flight run to completion, the end-of-stream marker is queued,
//! the consumer drains what was emitted, and the error is returned. A
//! failing consumer is noticed as soon as it stops, without waiting for the
//! producers in flight.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error};

use crate::error::{Error, PipelineStage, Result};

pub const DEFAULT_CONCURRENCY: usize = 8;

/// Turns one input into any number of items.
#[async_trait]
pub trait Producer: Send + Sync {
    type Input: Send;
    type Item: Send + 'static;

    async fn produce(&self, input: Self::Input, emitter: &Emitter<Self::Item>) -> anyhow::Result<()>;
}

/// Receives batches of items, one batch at a time.
#[async_trait]
pub trait Sink<T>: Send {
    async fn consume(&mut self, batch: Vec<T>) -> anyhow::Result<()>;
}

enum Message<T> {
    Item(T),
    EndOfStream,
}

/// Handle through which a producer queues its items.
pub struct Emitter<T> {
    tx: UnboundedSender<Message<T>>,
}

impl<T> Emitter<T> {
    /// Queue one item. Fails only once the consumer has stopped.
    pub fn emit(&self, item: T) -> anyhow::Result<()> {
        self.tx
            .send(Message::Item(item))
            .map_err(|_| anyhow::anyhow!("consumer has stopped"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Inputs whose producer finished successfully.
    pub inputs: usize,
    pub items: usize,
    pub batches: usize,
}

#[derive(Debug, Default)]
struct ConsumerStats {
    items: usize,
    batches: usize,
}

enum DriveEnd {
    Finished(usize),
    ProducerFailed(anyhow::Error),
    ConsumerStopped(std::result::Result<anyhow::Result<ConsumerStats>, JoinError>),
}

#[derive(Debug)]
pub struct Pipeline {
    concurrency: usize,
    state: PipelineState,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl Pipeline {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Run `producer` over every input and feed all items to `sink`.
    pub async fn run<P, S, I>(&mut self, inputs: I, producer: &P, sink: S) -> Result<PipelineStats>
    where
        P: Producer,
        S: Sink<P::Item> + 'static,
        I: IntoIterator<Item = P::Input>,
    {
        self.state = PipelineState::Running;

        let (tx, rx) = unbounded_channel();
        let mut consumer = tokio::spawn(consume_queue(sink, rx));

        let end = self.drive(inputs, producer, &tx, &mut consumer).await;

        let result = match end {
            DriveEnd::Finished(inputs) => {
                let _ = tx.send(Message::EndOfStream);
                match joined(consumer.await) {
                    Ok(stats) => Ok(PipelineStats {
                        inputs,
                        items: stats.items,
                        batches: stats.batches,
                    }),
                    Err(source) => Err(Error::PipelineFailure {
                        stage: PipelineStage::Consumer,
                        source,
                    }),
                }
            }
            DriveEnd::ProducerFailed(source) => {
                // Let the consumer store what was emitted before the failure.
                let _ = tx.send(Message::EndOfStream);
                if let Err(e) = joined(consumer.await) {
                    error!("consumer also failed: {e:#}");
                }
                Err(Error::PipelineFailure {
                    stage: PipelineStage::Producer,
                    source,
                })
            }
            DriveEnd::ConsumerStopped(result) => Err(Error::PipelineFailure {
                stage: PipelineStage::Consumer,
                source: match joined(result) {
                    Ok(_) => anyhow::anyhow!("consumer stopped before the end of the stream"),
                    Err(e) => e,
                },
            }),
        };

        self.state = if result.is_ok() {
            PipelineState::Completed
        } else {
            PipelineState::Failed
        };
        result
    }

    async fn drive<P, I>(
        &self,
        inputs: I,
        producer: &P,
        tx: &UnboundedSender<Message<P::Item>>,
        consumer: &mut JoinHandle<anyhow::Result<ConsumerStats>>,
    ) -> DriveEnd
    where
        P: Producer,
        I: IntoIterator<Item = P::Input>,
    {
        let emitter = Emitter { tx: tx.clone() };
        let mut inputs = inputs.into_iter();
        let mut in_flight = FuturesUnordered::new();
        let mut finished = 0;
        let mut failure = None;

        loop {
            // No new inputs are started once a producer has failed.
            while failure.is_none() && in_flight.len() < self.concurrency {
                let Some(input) = inputs.next() else { break };
                in_flight.push(producer.produce(input, &emitter));
            }
            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                result = &mut *consumer => return DriveEnd::ConsumerStopped(result),
                next = in_flight.next() => match next {
                    Some(Ok(())) => finished += 1,
                    Some(Err(e)) if failure.is_none() => failure = Some(e),
                    Some(Err(e)) => error!("another producer failed: {e:#}"),
                    None => {}
                },
            }
        }

        match failure {
            Some(e) => DriveEnd::ProducerFailed(e),
            None => DriveEnd::Finished(finished),
        }
    }
}

fn joined<T>(result: std::result::Result<anyhow::Result<T>, JoinError>) -> anyhow::Result<T> {
    match result {
        Ok(inner) => inner,
        Err(e) => Err(anyhow::anyhow!("consumer task panicked or was cancelled: {e}")),
    }
}

async fn consume_queue<T, S>(mut sink: S, mut rx: UnboundedReceiver<Message<T>>) -> anyhow::Result<ConsumerStats>
where
    S: Sink<T>,
{
    let mut stats = ConsumerStats::default();

    while let Some(message) = rx.recv().await {
        let mut batch = match message {
            Message::Item(item) => vec![item],
            Message::EndOfStream => break,
        };

        // Take whatever else is already queued, without waiting.
        let mut end_of_stream = false;
        while let Ok(message) = rx.try_recv() {
            match message {
                Message::Item(item) => batch.push(item),
                Message::EndOfStream => {
                    end_of_stream = true;
                    break;
                }
            }
        }

        debug!(size = batch.len(), "consuming batch");
        stats.items += batch.len();
        stats.batches += 1;
        sink.consume(batch).await?;

        if end_of_stream {
            break;
        }
    }

    Ok(stats)
}
