//! Contactless transaction session
//!
//! Entry point used by the orchestrator: prepares the kernel data, runs the
//! kernel inline or on the worker thread and resolves the outcome.

use std::sync::Arc;

use emv_ca_keys::CaKeyStore;
use emv_card::ContactlessDriver;
use emv_common::ExchangeBuffer;
use tracing::{info, warn};

use crate::aid::{self, AidAdjustment};
use crate::config::{ConfigError, ExecutionMode, TerminalConfig};
use crate::customise::Customiser;
use crate::dump::dump_buffer;
use crate::flow::add_paywave_specific_data;
use crate::kernel::{KernelDirective, KernelStatus, PaymentKernel, StepCustomiser};
use crate::outcome::{Disposition, TransactionReport};
use crate::resolver::{Collaborators, Resolver};
use crate::runner::TransactionWorker;
use crate::services::InterruptSource;
use crate::txn_log;

/// One contactless reader driving one payment kernel
pub struct ContactlessSession {
    config: TerminalConfig,
    kernel: Arc<dyn PaymentKernel>,
    driver: Box<dyn ContactlessDriver>,
    services: Collaborators,
    customiser: Arc<Customiser>,
    worker: Option<TransactionWorker>,
    amount_over_limit: bool,
}

impl ContactlessSession {
    /// Create a session; the configuration is validated and the deny list
    /// built here
    pub fn new(
        config: TerminalConfig,
        kernel: Arc<dyn PaymentKernel>,
        driver: Box<dyn ContactlessDriver>,
        services: Collaborators,
        ca_keys: CaKeyStore,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let black_list = config.build_black_list()?;
        let customiser = Customiser::new(
            Arc::new(ca_keys),
            Arc::new(black_list),
            Arc::clone(&services.ihm),
        );

        Ok(Self {
            config,
            kernel,
            driver,
            services,
            customiser: Arc::new(customiser),
            worker: None,
            amount_over_limit: false,
        })
    }

    /// Create a session with the CA keys named in the configuration
    pub fn from_config(
        config: TerminalConfig,
        kernel: Arc<dyn PaymentKernel>,
        driver: Box<dyn ContactlessDriver>,
        services: Collaborators,
    ) -> Result<Self, ConfigError> {
        let ca_keys = config.load_ca_keys()?;
        Self::new(config, kernel, driver, services, ca_keys)
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    /// The callback handed to the kernel
    pub fn customiser(&self) -> Arc<Customiser> {
        Arc::clone(&self.customiser)
    }

    /// Kernel callback entry point
    pub fn customise_step(&self, buffer: &mut ExchangeBuffer, step: u8) -> KernelDirective {
        self.customiser.customise_step(buffer, step)
    }

    /// Whether the last AID adjustment found the amount at or above the
    /// contactless limit
    pub fn is_amount_over_limit(&self) -> bool {
        self.amount_over_limit
    }

    pub fn set_amount_over_limit(&mut self, over_limit: bool) {
        self.amount_over_limit = over_limit;
    }

    /// Adjust the AID parameters before the kernel runs and record the limit
    /// check
    pub fn adjust_aid_parameters(
        &mut self,
        entry_point: &mut ExchangeBuffer,
        aid_parameters: &mut ExchangeBuffer,
        amount: u64,
    ) -> AidAdjustment {
        let adjustment = aid::adjust_aid_parameters(entry_point, aid_parameters, amount);
        self.amount_over_limit = adjustment.amount_over_limit;
        adjustment
    }

    pub fn debug_activation(&self, enabled: bool) {
        txn_log::debug_activation(self.kernel.as_ref(), enabled);
    }

    /// Run one transaction and return what the orchestrator does next
    pub fn perform_transaction(&mut self, buffer: &mut ExchangeBuffer) -> Disposition {
        self.run_transaction(buffer).disposition
    }

    /// Run one transaction and return the full report
    pub fn run_transaction(&mut self, buffer: &mut ExchangeBuffer) -> TransactionReport {
        self.customiser.verdict().reset();

        let black_list_present = !self.customiser.black_list().is_empty();
        if let Err(e) = add_paywave_specific_data(buffer, &self.config, black_list_present) {
            warn!(error = %e, "Unable to add payWave specific data");
            return TransactionReport::new(KernelStatus::InternalError);
        }

        let (status, interruption) = self.execute(buffer);

        if self.config.dump_transaction_data {
            dump_buffer("Transaction Data", buffer);
        }

        let mut report = Resolver {
            config: &self.config,
            kernel: self.kernel.as_ref(),
            driver: self.driver.as_mut(),
            services: &self.services,
        }
        .resolve(status, interruption, buffer);
        report.black_listed = self.customiser.verdict().get();

        self.kernel.clear();

        info!(
            status = ?report.kernel_status,
            disposition = ?report.disposition,
            decision = ?report.decision,
            black_listed = ?report.black_listed,
            "Transaction resolved"
        );
        report
    }

    fn execute(&mut self, buffer: &mut ExchangeBuffer) -> (KernelStatus, Option<InterruptSource>) {
        match self.config.execution {
            ExecutionMode::Inline => (self.run_inline(buffer), None),
            ExecutionMode::Forked => self.run_forked(buffer),
        }
    }

    fn run_inline(&self, buffer: &mut ExchangeBuffer) -> KernelStatus {
        self.kernel.do_transaction(buffer, self.customiser.as_ref())
    }

    fn run_forked(&mut self, buffer: &mut ExchangeBuffer) -> (KernelStatus, Option<InterruptSource>) {
        let worker = match self.worker.take().filter(TransactionWorker::is_alive) {
            Some(worker) => worker,
            None => {
                let customiser: Arc<dyn StepCustomiser> = self.customiser.clone();
                match TransactionWorker::spawn(Arc::clone(&self.kernel), customiser) {
                    Ok(worker) => worker,
                    Err(e) => {
                        warn!(error = %e, "Running kernel on the calling thread");
                        return (self.run_inline(buffer), None);
                    }
                }
            }
        };

        let input = std::mem::take(buffer);
        match worker.execute(input, self.kernel.as_ref(), self.services.scanner.as_ref()) {
            Ok(execution) => {
                *buffer = execution.buffer;
                self.worker = Some(worker);
                (execution.status, execution.interruption)
            }
            Err(e) => {
                // The buffer went down with the worker; a new one is spawned
                // for the next transaction
                warn!(error = %e, "Kernel transaction lost");
                (KernelStatus::InternalError, None)
            }
        }
    }
}
