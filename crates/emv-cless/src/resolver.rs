//! Outcome resolution
//!
//! Maps the kernel status and the response buffer to a disposition for the
//! orchestrator, running the online PIN, online authorisation and issuer
//! script sub-protocols on the way. Sub-protocol failures end in a decline or
//! a restart, never in an error returned to the caller.

use std::sync::Arc;
use std::time::Duration;

use emv_card::{ContactlessDriver, PresentmentPrompts};
use emv_common::{bcd_to_u64, tags, ExchangeBuffer};
use tracing::{debug, info, warn};

use crate::config::TerminalConfig;
use crate::kernel::{KernelStatus, PaymentKernel};
use crate::kernel_data::{TransactionData, APPROVED_RESPONSE_CODE};
use crate::outcome::{Decision, Disposition, PinFailure, TransactionReport};
use crate::scripts::ScriptManager;
use crate::services::{
    Batch, ContactFallback, Ihm, InterruptSource, Notice, OnlineHost, PeripheralEvent,
    PeripheralScanner, PinEntry, PinOutcome, PinRequest, Question,
};
use crate::txn_log::{dump_database, manage_transaction_log};

/// Terminal services the resolver calls out to
#[derive(Clone)]
pub struct Collaborators {
    pub ihm: Arc<dyn Ihm>,
    pub pin: Arc<dyn PinEntry>,
    pub host: Arc<dyn OnlineHost>,
    pub batch: Arc<dyn Batch>,
    pub fallback: Arc<dyn ContactFallback>,
    /// Peripherals watched during the kernel run and the re-presentment wait
    pub scanner: Option<Arc<dyn PeripheralScanner>>,
}

/// Re-presentment prompts shown through the terminal display
struct IhmPrompts<'a>(&'a dyn Ihm);

impl PresentmentPrompts for IhmPrompts<'_> {
    fn represent_card(&self) {
        self.0.represent_card_sequence();
    }

    fn remove_card(&self) {
        self.0.remove_card_sequence();
    }
}

/// Resolves one kernel outcome
pub struct Resolver<'a> {
    pub config: &'a TerminalConfig,
    pub kernel: &'a dyn PaymentKernel,
    pub driver: &'a mut dyn ContactlessDriver,
    pub services: &'a Collaborators,
}

impl Resolver<'_> {
    /// Resolve `status` and run the exit housekeeping
    ///
    /// # Arguments
    /// * `status` - Status returned by the kernel transaction
    /// * `interruption` - Peripheral that stopped the kernel, if any
    /// * `buffer` - Kernel response; online responses and the issuer script
    ///   result are appended to it
    pub fn resolve(
        &mut self,
        status: KernelStatus,
        interruption: Option<InterruptSource>,
        buffer: &mut ExchangeBuffer,
    ) -> TransactionReport {
        let data = TransactionData::from_buffer(buffer);
        let status = self.adjust_status(status, &data, buffer);

        let mut report = TransactionReport::new(status);
        report.interruption = interruption;

        match status {
            KernelStatus::Stopped => self.interrupted(
                interruption.unwrap_or(InterruptSource::Unspecified),
                &data,
                &mut report,
            ),
            KernelStatus::Ok => {
                // A finished transaction always carries a disposition
                self.error(Notice::StatusError, &mut report);
            }
            KernelStatus::OfflineApproved => self.offline_approved(&data, &mut report),
            KernelStatus::OfflineDeclined => self.offline_declined(&mut report),
            KernelStatus::OnlineAuthorisation => self.online(&data, buffer, &mut report),
            KernelStatus::UseContactInterface => {
                report.disposition = Disposition::RestartWithoutContactless;
            }
            KernelStatus::CommunicationError => report.disposition = Disposition::Restart,
            KernelStatus::RemoveAid => report.disposition = Disposition::RemoveAid,
            KernelStatus::Mobile => self.mobile(&data, &mut report),
            KernelStatus::InternalError | KernelStatus::Other(_) => {
                debug!(status = ?status, "Kernel error");
                if self.config.alternate_region_mode {
                    report.disposition = Disposition::RestartWithoutContactless;
                } else {
                    self.error(Notice::TransactionError, &mut report);
                }
            }
        }

        self.housekeeping(buffer, &mut report);
        report
    }

    /// PIN request and refund promotion
    fn adjust_status(
        &self,
        status: KernelStatus,
        data: &TransactionData,
        buffer: &mut ExchangeBuffer,
    ) -> KernelStatus {
        if data.online_pin_requested
            && matches!(status, KernelStatus::OfflineApproved | KernelStatus::OnlineAuthorisation)
        {
            debug!("Online PIN requested, transaction goes online");
            return KernelStatus::OnlineAuthorisation;
        }

        // A card returning an AAC for a refund only completed its action
        // analysis; the refund is not declined
        if status == KernelStatus::OfflineDeclined && data.is_refund_declined_by_card() {
            info!("Refund declined by card, treated as approved");
            let fetched = self.kernel.get_all_data(buffer);
            if fetched != KernelStatus::Ok {
                debug!(status = ?fetched, "Kernel data not fully retrieved for refund");
            }
            return KernelStatus::OfflineApproved;
        }

        status
    }

    fn interrupted(
        &self,
        source: InterruptSource,
        data: &TransactionData,
        report: &mut TransactionReport,
    ) {
        let ihm = self.services.ihm.as_ref();
        match source {
            InterruptSource::ChipCard => {
                if !self.services.fallback.chip_transaction(data.amount, data.currency_code) {
                    warn!("Chip transaction after interruption failed");
                }
            }
            InterruptSource::Swipe => {
                if !self.services.fallback.swipe_transaction(data.amount, data.currency_code) {
                    warn!("Swipe transaction after interruption failed");
                }
            }
            InterruptSource::Keyboard | InterruptSource::UserEvent => {
                ihm.notify(Notice::Interrupted(source));
            }
            InterruptSource::Unspecified => {
                ihm.notify(Notice::Interrupted(source));
                ihm.notify(Notice::TransactionError);
            }
        }
        report.decision = Some(Decision::Interrupted(source));
    }

    fn offline_approved(&mut self, data: &TransactionData, report: &mut TransactionReport) {
        self.driver.close_field();
        let ihm = self.services.ihm.as_ref();

        if self.config.asia_gui_mode {
            ihm.notify(Notice::AvailableAmount(data.available_offline_amount));
        }

        if data.signature_requested {
            self.signature(false, report);
        } else {
            ihm.notify(Notice::Approved {
                online: false,
                with_available_amount: true,
            });
            report.marked_for_batch = true;
            report.decision = Some(Decision::Approved { online: false });
        }

        self.transaction_log();
    }

    fn offline_declined(&mut self, report: &mut TransactionReport) {
        self.driver.close_field();
        self.services.ihm.notify(Notice::Declined { online: false });
        report.decision = Some(Decision::Declined { online: false });
        self.transaction_log();
    }

    fn online(
        &mut self,
        data: &TransactionData,
        buffer: &mut ExchangeBuffer,
        report: &mut TransactionReport,
    ) {
        self.driver.close_field();
        let ihm = Arc::clone(&self.services.ihm);

        if data.online_pin_requested {
            if let Err(failure) = self.online_pin(data, buffer) {
                debug!(failure = ?failure, "Online PIN entry failed");
                report.pin_failure = Some(failure);
                ihm.notify(if failure == PinFailure::Cancelled {
                    Notice::PinCancelled
                } else {
                    Notice::PinError
                });
                report.decision = Some(Decision::Declined { online: true });
                self.transaction_log();
                return;
            }
        }

        ihm.notify(Notice::OnlineProcessing);
        report.online_authorisation_attempted = true;

        let approved = match self.services.host.authorise(buffer) {
            Ok(()) => match buffer.find(tags::AUTHORISATION_RESPONSE_CODE) {
                Some(code) => code == &APPROVED_RESPONSE_CODE[..],
                None => {
                    debug!("No authorisation response code");
                    false
                }
            },
            Err(e) => {
                warn!(error = %e, "Online authorisation failed");
                false
            }
        };

        if approved {
            let prompts = IhmPrompts(ihm.as_ref());
            let scanner = self.services.scanner.as_deref();
            let cancel = || scanner.is_some_and(|s| s.latched() == Some(PeripheralEvent::CancelKey));
            let outcome = ScriptManager {
                kernel: self.kernel,
                driver: &mut *self.driver,
                prompts: &prompts,
                cancel: &cancel,
                policy: self.config.presentment.policy(),
            }
            .run(buffer);
            report.scripts = Some(outcome);

            if data.signature_requested {
                self.signature(true, report);
            } else {
                // The balance on the card may have changed with the scripts
                ihm.notify(Notice::Approved {
                    online: true,
                    with_available_amount: !outcome.executed(),
                });
                report.marked_for_batch = true;
                report.decision = Some(Decision::Approved { online: true });
            }
        } else {
            ihm.notify(Notice::Declined { online: true });
            report.decision = Some(Decision::Declined { online: true });
        }

        self.transaction_log();
    }

    fn online_pin(
        &self,
        data: &TransactionData,
        buffer: &mut ExchangeBuffer,
    ) -> Result<(), PinFailure> {
        let pan = buffer
            .find(tags::APPLICATION_PAN)
            .map(<[u8]>::to_vec)
            .ok_or(PinFailure::MissingPan)?;
        let amount = buffer
            .find(tags::AMOUNT_AUTHORISED_NUMERIC)
            .and_then(bcd_to_u64)
            .ok_or(PinFailure::MissingAmount)?;

        let request = PinRequest {
            pan: &pan,
            amount,
            first_key_timeout: Duration::from_millis(self.config.pin.first_key_timeout_ms),
            inter_key_timeout: Duration::from_millis(self.config.pin.inter_key_timeout_ms),
            language: data.preferred_language,
        };

        match self.services.pin.online_pin(&request) {
            PinOutcome::Entered(block) => buffer
                .add_tag(tags::ENCIPHERED_PIN_CODE, &block)
                .map_err(|e| {
                    warn!(error = %e, "Unable to add enciphered PIN");
                    PinFailure::Storage
                }),
            PinOutcome::Cancelled => Err(PinFailure::Cancelled),
            PinOutcome::Failed => Err(PinFailure::EntryFailed),
        }
    }

    fn signature(&self, online: bool, report: &mut TransactionReport) {
        let ihm = self.services.ihm.as_ref();
        ihm.notify(Notice::SignatureRequired);

        if self.config.loop_mode || ihm.ask(Question::SignatureOk) {
            ihm.notify(Notice::SignatureAccepted);
            report.marked_for_batch = true;
            report.decision = Some(Decision::Approved { online });
        } else {
            ihm.notify(Notice::SignatureRejected);
            report.decision = Some(Decision::Declined { online });
        }
    }

    fn mobile(&mut self, data: &TransactionData, report: &mut TransactionReport) {
        match data.qvsdc_supported() {
            Some(true) => {
                self.services.ihm.notify(Notice::PhoneInstructions);
                if !self.config.asia_gui_mode {
                    // The field comes back up with the next discovery
                    self.driver.close_field();
                }
                report.disposition = Disposition::RestartDoubleTap;
            }
            Some(false) => self.error(Notice::StatusError, report),
            None => report.disposition = Disposition::RestartDoubleTap,
        }
    }

    fn error(&self, notice: Notice, report: &mut TransactionReport) {
        self.services.ihm.notify(notice);
        report.decision = Some(Decision::Error);
        report.disposition = Disposition::End;
    }

    fn transaction_log(&self) {
        if !self.config.loop_mode {
            manage_transaction_log(self.kernel, self.services.ihm.as_ref());
        }
    }

    fn housekeeping(&mut self, buffer: &ExchangeBuffer, report: &mut TransactionReport) {
        if !report.disposition.leaves_field_state() && self.driver.is_field_open() {
            if let Err(e) = self.driver.deselect(false) {
                debug!(error = %e, "Card deselection failed");
            }
        }

        if !report.disposition.is_final() {
            return;
        }

        if report.marked_for_batch {
            match self.services.batch.add_transaction(buffer) {
                Ok(()) => report.batch_recorded = true,
                Err(e) => {
                    warn!(error = %e, "Unable to record transaction in batch");
                    self.services.ihm.notify(Notice::BatchError);
                }
            }
        }

        self.services.batch.increment_sequence_counter();
        report.sequence_counter_incremented = true;

        if self.config.dump_database {
            dump_database(self.kernel);
        }
    }
}
