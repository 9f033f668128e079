//! Scripted payment kernel and contactless reader

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use emv_card::{CardTechnology, ContactlessDriver, DriverError};
use emv_cless::flow::StepSet;
use emv_cless::{CustomisationStep, KernelDirective, KernelStatus, PaymentKernel, StepCustomiser};
use emv_common::{tags, ExchangeBuffer, Tag};
use tracing::{debug, info, warn};

/// Capacity of the buffers handed to customisation steps
const STEP_BUFFER_CAPACITY: usize = 1024;

/// Granularity of the simulated processing time
const TICK: Duration = Duration::from_millis(10);

/// What the kernel does on the next transaction
#[derive(Debug, Clone)]
pub struct KernelScript {
    pub status: KernelStatus,
    /// Records appended to the transaction buffer
    pub response: Vec<(Tag, Vec<u8>)>,
    /// Card application identifier, also used as the CA key RID
    pub aid: Vec<u8>,
    pub pan: Vec<u8>,
    pub pan_sequence_number: u8,
    pub ca_key_index: u8,
    /// Time the card spends in the field
    pub processing_time: Duration,
    /// Issuer script result returned after script delivery
    pub script_result: Vec<u8>,
}

/// Kernel that replays a [`KernelScript`]
///
/// It calls back the customisation steps the terminal asked for, in the
/// order a qVSDC transaction reaches them.
pub struct ScriptedKernel {
    script: KernelScript,
    cancelled: AtomicBool,
    database: Mutex<Vec<(Tag, Vec<u8>)>>,
}

impl ScriptedKernel {
    pub fn new(script: KernelScript) -> Self {
        Self {
            script,
            cancelled: AtomicBool::new(false),
            database: Mutex::new(Vec::new()),
        }
    }

    fn run_step(
        &self,
        customiser: &dyn StepCustomiser,
        step: CustomisationStep,
        input: &[(Tag, &[u8])],
    ) -> Option<ExchangeBuffer> {
        let mut buffer = match ExchangeBuffer::with_capacity(STEP_BUFFER_CAPACITY) {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!(error = %e, "Unable to allocate step buffer");
                return None;
            }
        };
        for (tag, value) in input {
            if let Err(e) = buffer.add_tag(*tag, value) {
                warn!(error = %e, tag = %tag, "Unable to build step input");
                return None;
            }
        }

        match customiser.customise_step(&mut buffer, step.id()) {
            KernelDirective::Continue => Some(buffer),
            KernelDirective::Stop => {
                debug!(step = ?step, "Terminal stopped the kernel");
                None
            }
        }
    }

    /// Simulated card processing; `false` if the transaction was cancelled
    fn process(&self) -> bool {
        let start = Instant::now();
        while start.elapsed() < self.script.processing_time {
            if self.cancelled.load(Ordering::SeqCst) {
                return false;
            }
            thread::sleep(TICK);
        }
        !self.cancelled.load(Ordering::SeqCst)
    }

    fn remember(&self, buffer: &ExchangeBuffer) {
        let records = buffer
            .records()
            .map(|(tag, value)| (tag, value.to_vec()))
            .collect();
        if let Ok(mut database) = self.database.lock() {
            *database = records;
        }
    }

    fn lookup(&self, tag: Tag) -> Option<Vec<u8>> {
        let database = self.database.lock().ok()?;
        database
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, value)| value.clone())
    }
}

impl PaymentKernel for ScriptedKernel {
    fn do_transaction(
        &self,
        buffer: &mut ExchangeBuffer,
        customiser: &dyn StepCustomiser,
    ) -> KernelStatus {
        let script = &self.script;
        let steps = buffer
            .find(tags::KERNEL_PAYMENT_FLOW_CUSTOM)
            .and_then(StepSet::from_bytes)
            .unwrap_or_default();
        info!(status = ?script.status, "Kernel transaction started");

        if !self.process() {
            info!("Kernel transaction cancelled");
            return KernelStatus::Stopped;
        }

        if steps.contains(CustomisationStep::QvsdcGetCertificate) {
            let index = [script.ca_key_index];
            let output = self.run_step(
                customiser,
                CustomisationStep::QvsdcGetCertificate,
                &[
                    (tags::CA_PUBLIC_KEY_INDEX_CARD, index.as_slice()),
                    (tags::DF_NAME, script.aid.as_slice()),
                ],
            );
            match output.as_ref().and_then(|o| o.find(tags::CA_PUBLIC_KEY_MODULUS)) {
                Some(modulus) => debug!(bytes = modulus.len(), "CA public key received"),
                None => debug!("No CA public key, offline data authentication skipped"),
            }
        }

        let mut status = script.status;
        if steps.contains(CustomisationStep::QvsdcBlackListControl) {
            let psn = [script.pan_sequence_number];
            let output = self.run_step(
                customiser,
                CustomisationStep::QvsdcBlackListControl,
                &[
                    (tags::APPLICATION_PAN, script.pan.as_slice()),
                    (tags::APPLICATION_PAN_SEQUENCE_NUMBER, psn.as_slice()),
                ],
            );
            let listed = output
                .as_ref()
                .and_then(|o| o.find(tags::KERNEL_PAN_IN_BLACK_LIST))
                .and_then(|v| v.first())
                .is_some_and(|b| *b != 0);
            if listed && status == KernelStatus::OfflineApproved {
                info!("PAN in black list, transaction declined");
                status = KernelStatus::OfflineDeclined;
            }
        }

        if steps.contains(CustomisationStep::QvsdcRemoveCard)
            && self
                .run_step(customiser, CustomisationStep::QvsdcRemoveCard, &[])
                .is_none()
        {
            return KernelStatus::Stopped;
        }

        let psn = [script.pan_sequence_number];
        let card_records = [
            (tags::APPLICATION_PAN, script.pan.as_slice()),
            (tags::APPLICATION_PAN_SEQUENCE_NUMBER, psn.as_slice()),
            (tags::DF_NAME, script.aid.as_slice()),
        ];
        for (tag, value) in card_records
            .into_iter()
            .chain(script.response.iter().map(|(t, v)| (*t, v.as_slice())))
        {
            if let Err(e) = buffer.add_tag(tag, value) {
                warn!(error = %e, tag = %tag, "Transaction buffer full");
                return KernelStatus::InternalError;
            }
        }

        self.remember(buffer);
        info!(status = ?status, "Kernel transaction completed");
        status
    }

    fn after_transaction(&self, buffer: &mut ExchangeBuffer) -> KernelStatus {
        let scripts = buffer
            .find(tags::PAYWAVE_ISSUER_SCRIPT_LIST)
            .map_or(0, <[u8]>::len);
        info!(script_bytes = scripts, "Issuer data delivered to the card");

        buffer.clear();
        match buffer.add_tag(tags::PAYWAVE_ISSUER_SCRIPT_RESULT, &self.script.script_result) {
            Ok(()) => KernelStatus::Ok,
            Err(e) => {
                warn!(error = %e, "Unable to return issuer script result");
                KernelStatus::InternalError
            }
        }
    }

    fn cancel(&self) {
        info!("Kernel cancel requested");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn get_data(&self, buffer: &mut ExchangeBuffer) -> KernelStatus {
        let requested: Vec<Tag> = buffer
            .records()
            .filter(|(_, value)| value.is_empty())
            .map(|(tag, _)| tag)
            .collect();

        buffer.clear();
        for tag in requested {
            let value = self.lookup(tag).unwrap_or_default();
            if buffer.add_tag(tag, &value).is_err() {
                return KernelStatus::InternalError;
            }
        }
        KernelStatus::Ok
    }

    fn get_all_data(&self, buffer: &mut ExchangeBuffer) -> KernelStatus {
        let Ok(database) = self.database.lock() else {
            return KernelStatus::InternalError;
        };
        for (tag, value) in database.iter() {
            if buffer.add_tag(*tag, value).is_err() {
                return KernelStatus::InternalError;
            }
        }
        KernelStatus::Ok
    }

    fn debug_management(&self, buffer: &mut ExchangeBuffer) -> KernelStatus {
        let mask = buffer
            .find(tags::KERNEL_DEBUG_ACTIVATION)
            .and_then(|v| v.first().copied())
            .unwrap_or(0);
        info!(mask, "Kernel debug settings applied");
        KernelStatus::Ok
    }

    fn clear(&self) {
        // A cancel stays pending until the transaction is cleared
        self.cancelled.store(false, Ordering::SeqCst);
        if let Ok(mut database) = self.database.lock() {
            database.clear();
        }
    }
}

/// Reader with one card that may or may not come back after the transaction
pub struct SimDriver {
    field_open: bool,
    card_present: bool,
}

impl SimDriver {
    /// `represent` - the card is tapped again when the terminal asks for it
    pub fn new(represent: bool) -> Self {
        Self {
            field_open: true,
            card_present: represent,
        }
    }
}

impl ContactlessDriver for SimDriver {
    fn open_field(&mut self) -> Result<(), DriverError> {
        debug!("Field on");
        self.field_open = true;
        Ok(())
    }

    fn close_field(&mut self) {
        if self.field_open {
            debug!("Field off");
        }
        self.field_open = false;
    }

    fn is_field_open(&self) -> bool {
        self.field_open
    }

    fn detect_card(
        &mut self,
        _technology: CardTechnology,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        if !self.field_open {
            return Err(DriverError::FieldUnavailable("field is off".to_string()));
        }
        if self.card_present {
            return Ok(());
        }
        thread::sleep(timeout.min(Duration::from_millis(100)));
        Err(DriverError::NoCard)
    }

    fn activate_card(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn exchange_apdu(&mut self, command: &[u8]) -> Result<Vec<u8>, DriverError> {
        debug!(command = %hex::encode_upper(command), "C-APDU");
        Ok(vec![0x90, 0x00])
    }

    fn deselect(&mut self, wait_removal: bool) -> Result<(), DriverError> {
        debug!(wait_removal, "Card deselected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Passthrough;

    impl StepCustomiser for Passthrough {
        fn customise_step(&self, buffer: &mut ExchangeBuffer, step: u8) -> KernelDirective {
            if step == CustomisationStep::QvsdcBlackListControl.id() {
                buffer.clear();
                buffer.add_tag(tags::KERNEL_PAN_IN_BLACK_LIST, &[0x01]).unwrap();
            }
            KernelDirective::Continue
        }
    }

    fn script(status: KernelStatus) -> KernelScript {
        KernelScript {
            status,
            response: vec![(tags::KERNEL_SIGNATURE_REQUESTED, vec![0x01])],
            aid: vec![0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10],
            pan: vec![0x47, 0x61, 0x73, 0x90, 0x01, 0x01, 0x00, 0x10],
            pan_sequence_number: 1,
            ca_key_index: 0x92,
            processing_time: Duration::ZERO,
            script_result: vec![0x00; 5],
        }
    }

    fn custom(steps: &[CustomisationStep]) -> ExchangeBuffer {
        let mut set = StepSet::default();
        for step in steps {
            set.insert(*step);
        }
        let mut buffer = ExchangeBuffer::with_capacity(512).unwrap();
        buffer.add_tag(tags::KERNEL_PAYMENT_FLOW_CUSTOM, set.as_bytes()).unwrap();
        buffer
    }

    #[test]
    fn test_response_appended_and_remembered() {
        let kernel = ScriptedKernel::new(script(KernelStatus::OfflineApproved));
        let mut buffer = custom(&[]);

        assert_eq!(kernel.do_transaction(&mut buffer, &Passthrough), KernelStatus::OfflineApproved);
        assert_eq!(buffer.find(tags::KERNEL_SIGNATURE_REQUESTED), Some(&[0x01][..]));

        let mut request = ExchangeBuffer::with_capacity(64).unwrap();
        request.request_tag(tags::APPLICATION_PAN_SEQUENCE_NUMBER).unwrap();
        assert_eq!(kernel.get_data(&mut request), KernelStatus::Ok);
        assert_eq!(request.find(tags::APPLICATION_PAN_SEQUENCE_NUMBER), Some(&[0x01][..]));

        kernel.clear();
        let mut all = ExchangeBuffer::with_capacity(512).unwrap();
        kernel.get_all_data(&mut all);
        assert!(all.is_empty());
    }

    #[test]
    fn test_black_listed_pan_declines() {
        let kernel = ScriptedKernel::new(script(KernelStatus::OfflineApproved));
        let mut buffer = custom(&[CustomisationStep::QvsdcBlackListControl]);

        assert_eq!(kernel.do_transaction(&mut buffer, &Passthrough), KernelStatus::OfflineDeclined);
    }

    #[test]
    fn test_cancel_stops_processing() {
        let mut script = script(KernelStatus::OfflineApproved);
        script.processing_time = Duration::from_secs(5);
        let kernel = ScriptedKernel::new(script);

        thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(30));
                kernel.cancel();
            });
            let mut buffer = custom(&[]);
            assert_eq!(kernel.do_transaction(&mut buffer, &Passthrough), KernelStatus::Stopped);
        });
    }

    #[test]
    fn test_cancel_before_start_is_kept_until_clear() {
        let kernel = ScriptedKernel::new(script(KernelStatus::OfflineApproved));

        kernel.cancel();
        assert_eq!(kernel.do_transaction(&mut custom(&[]), &Passthrough), KernelStatus::Stopped);

        kernel.clear();
        assert_eq!(
            kernel.do_transaction(&mut custom(&[]), &Passthrough),
            KernelStatus::OfflineApproved
        );
    }

    #[test]
    fn test_script_result_returned() {
        let kernel = ScriptedKernel::new(script(KernelStatus::OnlineAuthorisation));
        let mut staging = ExchangeBuffer::with_capacity(256).unwrap();
        staging.add_tag(tags::PAYWAVE_ISSUER_SCRIPT_LIST, &[0x71, 0x00]).unwrap();

        assert_eq!(kernel.after_transaction(&mut staging), KernelStatus::Ok);
        assert_eq!(staging.find(tags::PAYWAVE_ISSUER_SCRIPT_RESULT), Some(&[0x00; 5][..]));
    }

    #[test]
    fn test_absent_card_not_detected() {
        let mut driver = SimDriver::new(false);
        let err = driver
            .detect_card(CardTechnology::TYPE_AB, Duration::from_millis(1))
            .unwrap_err();
        assert_eq!(err, DriverError::NoCard);

        driver.close_field();
        assert!(!driver.is_field_open());
    }
}
