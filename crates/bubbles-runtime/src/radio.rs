//! Radio Task
//!
//! Carries out the effects the core logic task emits against a
//! [`RadioTransport`] and reports the outcome of connects and writes back as
//! radio events. Work for one address runs on its own link worker, in the
//! order it was issued; different addresses proceed concurrently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bubbles_core::channel::{EffectReceiver, EventSender};
use bubbles_core::{
    Effect, PayloadKind, RadioAddress, RadioConfig, RadioEvent, RadioTransport, TransportError,
};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Work queued for one address
#[derive(Debug)]
enum LinkJob {
    Connect,
    Write {
        kind: PayloadKind,
        chunks: Vec<Vec<u8>>,
    },
    Disconnect,
}

#[derive(Debug)]
struct LinkWorker {
    id: u64,
    jobs: mpsc::UnboundedSender<LinkJob>,
}

/// Everything a link worker needs, shared across workers
struct LinkContext {
    transport: Arc<dyn RadioTransport>,
    events: EventSender,
    config: RadioConfig,
    workers: DashMap<RadioAddress, LinkWorker>,
    next_worker: AtomicU64,
}

// ----------------------------------------------------------------------------
// Radio Task
// ----------------------------------------------------------------------------

pub struct RadioTask {
    effects: EffectReceiver,
    links: Arc<LinkContext>,
    handles: Vec<JoinHandle<()>>,
}

impl RadioTask {
    pub fn new(
        transport: Arc<dyn RadioTransport>,
        effects: EffectReceiver,
        events: EventSender,
        config: RadioConfig,
    ) -> Self {
        Self {
            effects,
            links: Arc::new(LinkContext {
                transport,
                events,
                config,
                workers: DashMap::new(),
                next_worker: AtomicU64::new(0),
            }),
            handles: Vec::new(),
        }
    }

    /// Execute effects until the core logic task drops its sender, then
    /// release the radio
    pub async fn run(mut self) {
        info!(transport = self.links.transport.name(), "radio task starting");
        while let Some(effect) = self.effects.recv().await {
            self.execute(effect).await;
        }

        // Let queued link work finish before the radio goes away
        self.links.workers.clear();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!("link worker failed: {}", e);
            }
        }

        if let Err(e) = self.links.transport.shutdown().await {
            warn!("radio shutdown failed: {}", e);
        }
        info!("radio task stopped");
    }

    async fn execute(&mut self, effect: Effect) {
        let transport = Arc::clone(&self.links.transport);
        let outcome = match effect {
            Effect::Advertise { presence } => transport.advertise(&presence).await,
            Effect::StopAdvertising => transport.stop_advertising().await,
            Effect::StartScan => transport.start_scan().await,
            Effect::StopScan => transport.stop_scan().await,
            Effect::Connect { address } => {
                self.enqueue(address, LinkJob::Connect);
                Ok(())
            }
            Effect::Disconnect { address } => {
                self.enqueue(address, LinkJob::Disconnect);
                Ok(())
            }
            Effect::Write {
                address,
                kind,
                chunks,
            } => {
                self.enqueue(address, LinkJob::Write { kind, chunks });
                Ok(())
            }
            Effect::ScheduleTimer { address, timer, .. } => {
                debug!(%address, %timer, "timer effect reached the radio task, ignored");
                Ok(())
            }
        };
        if let Err(e) = outcome {
            warn!(transport = transport.name(), "radio operation failed: {}", e);
        }
    }

    fn enqueue(&mut self, address: RadioAddress, job: LinkJob) {
        let mut job = job;
        loop {
            let existing = self
                .links
                .workers
                .get(&address)
                .map(|worker| worker.jobs.clone());
            let sender = match existing {
                Some(sender) => sender,
                None => {
                    let (worker, handle) = LinkContext::spawn_worker(&self.links, address.clone());
                    self.handles.retain(|handle| !handle.is_finished());
                    self.handles.push(handle);
                    let sender = worker.jobs.clone();
                    self.links.workers.insert(address.clone(), worker);
                    sender
                }
            };
            match sender.send(job) {
                Ok(()) => return,
                // The worker retired between lookup and send; start a new one
                Err(mpsc::error::SendError(returned)) => {
                    self.links
                        .workers
                        .remove_if(&address, |_, worker| worker.jobs.is_closed());
                    job = returned;
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Link Workers
// ----------------------------------------------------------------------------

impl LinkContext {
    fn spawn_worker(links: &Arc<Self>, address: RadioAddress) -> (LinkWorker, JoinHandle<()>) {
        let id = links.next_worker.fetch_add(1, Ordering::Relaxed);
        let (jobs, receiver) = mpsc::unbounded_channel();
        let context = Arc::clone(links);
        let handle = tokio::spawn(async move {
            context.work(address, id, receiver).await;
        });
        (LinkWorker { id, jobs }, handle)
    }

    async fn work(&self, address: RadioAddress, id: u64, mut jobs: mpsc::UnboundedReceiver<LinkJob>) {
        debug!(%address, worker = id, "link worker started");
        while let Some(job) = jobs.recv().await {
            let closing = matches!(job, LinkJob::Disconnect);
            self.perform(&address, job).await;
            if closing {
                // Retire once the link is gone; anything queued meanwhile still runs
                self.workers.remove_if(&address, |_, worker| worker.id == id);
                jobs.close();
            }
        }
        debug!(%address, worker = id, "link worker finished");
    }

    async fn perform(&self, address: &RadioAddress, job: LinkJob) {
        match job {
            LinkJob::Connect => {
                let event = match self.connect(address).await {
                    Ok(()) => RadioEvent::Connected {
                        address: address.clone(),
                    },
                    Err(e) => {
                        debug!(%address, "connect failed: {}", e);
                        RadioEvent::ConnectFailed {
                            address: address.clone(),
                            reason: e.to_string(),
                        }
                    }
                };
                self.report(event).await;
            }
            LinkJob::Write { kind, chunks } => {
                let event = match self.write(address, &chunks).await {
                    Ok(()) => RadioEvent::WriteCompleted {
                        address: address.clone(),
                        kind,
                    },
                    Err(e) => {
                        warn!(%address, %kind, "write failed: {}", e);
                        RadioEvent::WriteFailed {
                            address: address.clone(),
                            kind,
                            reason: e.to_string(),
                        }
                    }
                };
                self.report(event).await;
            }
            LinkJob::Disconnect => {
                if let Err(e) = self.transport.disconnect(address).await {
                    debug!(%address, "disconnect failed: {}", e);
                }
            }
        }
    }

    async fn connect(&self, address: &RadioAddress) -> Result<(), TransportError> {
        let limit = self.config.connect_timeout;
        match tokio::time::timeout(limit, self.transport.connect(address)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                // Don't leave a half-open link behind
                let _ = self.transport.disconnect(address).await;
                Err(TransportError::Timeout {
                    duration_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Write every chunk in order, retrying each a bounded number of times
    async fn write(&self, address: &RadioAddress, chunks: &[Vec<u8>]) -> Result<(), TransportError> {
        for chunk in chunks {
            let mut attempt = 0;
            loop {
                match self.transport.write_attribute(address, chunk).await {
                    Ok(()) => break,
                    Err(e) if attempt < self.config.write_retries && e.is_transient() => {
                        attempt += 1;
                        debug!(%address, attempt, "retrying write: {}", e);
                        tokio::time::sleep(self.config.write_retry_delay).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    async fn report(&self, event: RadioEvent) {
        if self.events.send(event).await.is_err() {
            debug!("core logic task gone, radio event dropped");
        }
    }
}
