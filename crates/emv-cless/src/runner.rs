//! Kernel transaction worker
//!
//! The kernel's transaction call blocks. It runs on a long-lived worker
//! thread while the calling thread waits on a per-run event channel fed by
//! the worker and by a peripheral scanner thread. The first peripheral event
//! cancels the kernel; the caller still waits for the kernel to return. A
//! kernel panic is reported as a lost transaction and ends the worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use emv_common::ExchangeBuffer;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::kernel::{KernelStatus, PaymentKernel, StepCustomiser};
use crate::services::{InterruptSource, PeripheralEvent, PeripheralScanner};

/// Cooperative cancellation flag shared between threads
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("unable to start transaction worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("transaction worker stopped unexpectedly")]
    Disconnected,
}

/// Commands sent to the worker
#[derive(Debug)]
pub enum WorkerCommand {
    /// Run one transaction with this buffer, reporting on `events`
    Run {
        buffer: ExchangeBuffer,
        cancel: CancelToken,
        events: Sender<WorkerEvent>,
    },
    /// Stop the worker thread
    Stop,
}

/// Messages received by the waiting thread
#[derive(Debug)]
pub enum WorkerEvent {
    /// The kernel returned
    Completed {
        status: KernelStatus,
        buffer: ExchangeBuffer,
    },
    /// The kernel panicked; the buffer is gone and the worker has stopped
    Lost,
    /// A peripheral fired while the kernel was running
    Peripheral(PeripheralEvent),
}

/// Result of one kernel run
#[derive(Debug)]
pub struct Execution {
    pub status: KernelStatus,
    pub buffer: ExchangeBuffer,
    pub interruption: Option<InterruptSource>,
}

/// Handle to the worker thread running the kernel
pub struct TransactionWorker {
    command_tx: Sender<WorkerCommand>,
    handle: Option<JoinHandle<()>>,
}

impl TransactionWorker {
    /// Spawn the worker thread
    pub fn spawn(
        kernel: Arc<dyn PaymentKernel>,
        customiser: Arc<dyn StepCustomiser>,
    ) -> Result<Self, WorkerError> {
        let (command_tx, command_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("cless-kernel".to_string())
            .spawn(move || run(kernel, customiser, command_rx))?;

        Ok(Self {
            command_tx,
            handle: Some(handle),
        })
    }

    /// Run one transaction on the worker and wait for it
    ///
    /// A peripheral event latched before the start stops the transaction
    /// without entering the kernel. The first one reported while the kernel
    /// runs cancels it and is returned as the interruption source, unless
    /// the kernel completed regardless.
    pub fn execute(
        &self,
        buffer: ExchangeBuffer,
        kernel: &dyn PaymentKernel,
        scanner: Option<&Arc<dyn PeripheralScanner>>,
    ) -> Result<Execution, WorkerError> {
        if let Some(event) = scanner.and_then(|scanner| scanner.latched()) {
            info!(event = ?event, "Peripheral event pending at start");
            return Ok(Execution {
                status: KernelStatus::Stopped,
                buffer,
                interruption: Some(event.source()),
            });
        }

        let (events_tx, events_rx) = mpsc::channel();
        let cancel = CancelToken::new();
        self.command_tx
            .send(WorkerCommand::Run {
                buffer,
                cancel: cancel.clone(),
                events: events_tx.clone(),
            })
            .map_err(|_| WorkerError::Disconnected)?;

        let stop_scanning = CancelToken::new();
        let scanning = scanner.and_then(|scanner| {
            start_scanning(Arc::clone(scanner), stop_scanning.clone(), events_tx)
        });

        let mut interruption = None;
        let result = loop {
            match events_rx.recv() {
                Ok(WorkerEvent::Completed { status, buffer }) => {
                    if interruption.is_some() && !status.is_stopped() {
                        debug!(status = ?status, "Kernel completed before the interruption");
                        interruption = None;
                    }
                    break Ok(Execution {
                        status,
                        buffer,
                        interruption,
                    });
                }
                Ok(WorkerEvent::Peripheral(event)) => {
                    if interruption.is_none() {
                        info!(event = ?event, "Transaction interrupted");
                        interruption = Some(event.source());
                        cancel.cancel();
                        kernel.cancel();
                    }
                }
                Ok(WorkerEvent::Lost) | Err(_) => break Err(WorkerError::Disconnected),
            }
        };

        stop_scanning.cancel();
        if let Some(handle) = scanning {
            if handle.join().is_err() {
                warn!("Peripheral scanner panicked");
            }
        }

        result
    }

    /// Whether the worker thread is still running
    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TransactionWorker {
    fn drop(&mut self) {
        let _ = self.command_tx.send(WorkerCommand::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Transaction worker panicked");
            }
        }
    }
}

fn start_scanning(
    scanner: Arc<dyn PeripheralScanner>,
    token: CancelToken,
    events: Sender<WorkerEvent>,
) -> Option<JoinHandle<()>> {
    let spawned = thread::Builder::new()
        .name("cless-scanner".to_string())
        .spawn(move || {
            if let Some(event) = scanner.wait(&token) {
                let _ = events.send(WorkerEvent::Peripheral(event));
            }
        });

    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Unable to start peripheral scanner");
            None
        }
    }
}

fn run(
    kernel: Arc<dyn PaymentKernel>,
    customiser: Arc<dyn StepCustomiser>,
    commands: Receiver<WorkerCommand>,
) {
    info!("Transaction worker started");

    loop {
        match commands.recv() {
            Ok(WorkerCommand::Run {
                mut buffer,
                cancel,
                events,
            }) => {
                // Cancelled before the kernel could see it
                if cancel.is_cancelled() {
                    let _ = events.send(WorkerEvent::Completed {
                        status: KernelStatus::Stopped,
                        buffer,
                    });
                    continue;
                }

                debug!("Kernel transaction started");
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    kernel.do_transaction(&mut buffer, customiser.as_ref())
                }));
                match outcome {
                    Ok(status) => {
                        debug!(status = ?status, "Kernel transaction finished");
                        let _ = events.send(WorkerEvent::Completed { status, buffer });
                    }
                    Err(_) => {
                        error!("Kernel panicked during the transaction");
                        let _ = events.send(WorkerEvent::Lost);
                        break;
                    }
                }
            }
            Ok(WorkerCommand::Stop) | Err(_) => break,
        }
    }

    info!("Transaction worker stopped");
}
