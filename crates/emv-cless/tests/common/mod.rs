//! Test doubles for the kernel, the reader and the terminal services
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use emv_card::{CardTechnology, ContactlessDriver, DriverError};
use emv_cless::{
    Batch, BatchError, CancelToken, Collaborators, ContactFallback, HostError, Ihm,
    KernelStatus, Notice, OnlineHost, PaymentKernel, PeripheralEvent, PeripheralScanner,
    PinEntry, PinOutcome, PinRequest, Question, StepCustomiser, TerminalConfig,
};
use emv_common::{tags, ExchangeBuffer, Tag};

pub const PAN: &[u8] = &[0x47, 0x61, 0x73, 0x90, 0x01, 0x01, 0x00, 0x10];
pub const SELECT: &[u8] = &[0x00, 0xA4, 0x04, 0x00, 0x07, 0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10, 0x00];

pub fn buffer_with(records: &[(Tag, &[u8])]) -> ExchangeBuffer {
    let mut buffer = ExchangeBuffer::with_capacity(1024).unwrap();
    for (tag, value) in records {
        buffer.add_tag(*tag, value).unwrap();
    }
    buffer
}

/// Scripted payment kernel
#[derive(Default)]
pub struct MockKernel {
    pub status: Option<KernelStatus>,
    /// Records appended to the buffer by `do_transaction`
    pub response: Vec<(Tag, Vec<u8>)>,
    /// Records appended by `get_all_data`
    pub database: Vec<(Tag, Vec<u8>)>,
    /// Issuer script result written by `after_transaction`
    pub script_result: Option<Vec<u8>>,
    /// PAN handed to the black-list step during `do_transaction`
    pub black_list_pan: Option<Vec<u8>>,
    /// Run until cancelled
    pub block_until_cancelled: bool,
    /// Panic inside the next `do_transaction`
    pub fault_once: AtomicBool,
    pub cancelled: AtomicBool,
    pub calls: Mutex<Vec<&'static str>>,
    pub seen_input: Mutex<Option<ExchangeBuffer>>,
}

impl MockKernel {
    pub fn returning(status: KernelStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == name).count()
    }

    fn log(&self, name: &'static str) {
        self.calls.lock().unwrap().push(name);
    }
}

impl PaymentKernel for MockKernel {
    fn do_transaction(
        &self,
        buffer: &mut ExchangeBuffer,
        customiser: &dyn StepCustomiser,
    ) -> KernelStatus {
        self.log("do_transaction");
        if self.fault_once.swap(false, Ordering::SeqCst) {
            panic!("kernel fault");
        }
        *self.seen_input.lock().unwrap() = Some(buffer.clone());

        if let Some(pan) = &self.black_list_pan {
            let mut step = ExchangeBuffer::with_capacity(64).unwrap();
            step.add_tag(tags::APPLICATION_PAN, pan).unwrap();
            customiser.customise_step(&mut step, emv_cless::customise::steps::QVSDC_BLACK_LIST_CONTROL);
        }

        if self.block_until_cancelled {
            let start = Instant::now();
            while !self.cancelled.load(Ordering::SeqCst) {
                if start.elapsed() > Duration::from_secs(5) {
                    return KernelStatus::InternalError;
                }
                thread::sleep(Duration::from_millis(1));
            }
            return KernelStatus::Stopped;
        }

        for (tag, value) in &self.response {
            buffer.add_tag(*tag, value).unwrap();
        }
        self.status.unwrap_or(KernelStatus::OfflineApproved)
    }

    fn after_transaction(&self, buffer: &mut ExchangeBuffer) -> KernelStatus {
        self.log("after_transaction");
        if let Some(result) = &self.script_result {
            buffer.add_tag(tags::PAYWAVE_ISSUER_SCRIPT_RESULT, result).unwrap();
        }
        KernelStatus::Ok
    }

    fn cancel(&self) {
        self.log("cancel");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn get_data(&self, _: &mut ExchangeBuffer) -> KernelStatus {
        self.log("get_data");
        KernelStatus::Ok
    }

    fn get_all_data(&self, buffer: &mut ExchangeBuffer) -> KernelStatus {
        self.log("get_all_data");
        for (tag, value) in &self.database {
            if buffer.add_tag(*tag, value).is_err() {
                return KernelStatus::InternalError;
            }
        }
        KernelStatus::Ok
    }

    fn debug_management(&self, _: &mut ExchangeBuffer) -> KernelStatus {
        self.log("debug_management");
        KernelStatus::Ok
    }

    fn clear(&self) {
        self.log("clear");
    }
}

#[derive(Debug, Default)]
pub struct DriverLog {
    pub field_open: bool,
    pub card_present: bool,
    pub opens: u32,
    pub closes: u32,
    pub deselects: u32,
    pub commands: Vec<Vec<u8>>,
}

/// Reader whose state is shared with the test
#[derive(Clone, Default)]
pub struct MockDriver(pub Arc<Mutex<DriverLog>>);

impl MockDriver {
    pub fn with_open_field() -> Self {
        let driver = Self::default();
        driver.0.lock().unwrap().field_open = true;
        driver
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, DriverLog> {
        self.0.lock().unwrap()
    }
}

impl ContactlessDriver for MockDriver {
    fn open_field(&mut self) -> Result<(), DriverError> {
        let mut log = self.log();
        log.field_open = true;
        log.opens += 1;
        Ok(())
    }

    fn close_field(&mut self) {
        let mut log = self.log();
        log.field_open = false;
        log.closes += 1;
    }

    fn is_field_open(&self) -> bool {
        self.log().field_open
    }

    fn detect_card(&mut self, _: CardTechnology, _: Duration) -> Result<(), DriverError> {
        if self.log().card_present {
            Ok(())
        } else {
            Err(DriverError::NoCard)
        }
    }

    fn activate_card(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn exchange_apdu(&mut self, command: &[u8]) -> Result<Vec<u8>, DriverError> {
        self.log().commands.push(command.to_vec());
        Ok(vec![0x90, 0x00])
    }

    fn deselect(&mut self, _: bool) -> Result<(), DriverError> {
        self.log().deselects += 1;
        Ok(())
    }
}

/// Display that records every notice
#[derive(Default)]
pub struct RecordingIhm {
    pub notices: Mutex<Vec<Notice>>,
    pub signature_ok: bool,
    pub print_log: bool,
    pub questions: Mutex<Vec<Question>>,
    pub removals: AtomicU32,
}

impl RecordingIhm {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn saw(&self, notice: &Notice) -> bool {
        self.notices.lock().unwrap().contains(notice)
    }
}

impl Ihm for RecordingIhm {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }

    fn remove_card_sequence(&self) {
        self.removals.fetch_add(1, Ordering::SeqCst);
    }

    fn represent_card_sequence(&self) {}

    fn ask(&self, question: Question) -> bool {
        self.questions.lock().unwrap().push(question);
        match question {
            Question::SignatureOk => self.signature_ok,
            Question::PrintTransactionLog => self.print_log,
        }
    }
}

pub struct MockPin {
    pub outcome: PinOutcome,
    pub requests: AtomicU32,
}

impl Default for MockPin {
    fn default() -> Self {
        Self {
            outcome: PinOutcome::Entered(vec![0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0]),
            requests: AtomicU32::new(0),
        }
    }
}

impl PinEntry for MockPin {
    fn online_pin(&self, _: &PinRequest<'_>) -> PinOutcome {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

/// Host answering with a fixed set of records
#[derive(Default)]
pub struct MockHost {
    pub response: Vec<(Tag, Vec<u8>)>,
    pub error: Option<HostError>,
    pub calls: AtomicU32,
}

impl MockHost {
    pub fn answering(code: &[u8; 2]) -> Self {
        Self {
            response: vec![(tags::AUTHORISATION_RESPONSE_CODE, code.to_vec())],
            ..Self::default()
        }
    }
}

impl OnlineHost for MockHost {
    fn authorise(&self, buffer: &mut ExchangeBuffer) -> Result<(), HostError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        for (tag, value) in &self.response {
            buffer
                .add_tag(*tag, value)
                .map_err(|e| HostError::MalformedResponse(e.to_string()))?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct CountingBatch {
    pub fail: bool,
    pub records: AtomicU32,
    pub sequence: AtomicU32,
}

impl Batch for CountingBatch {
    fn add_transaction(&self, _: &ExchangeBuffer) -> Result<(), BatchError> {
        if self.fail {
            return Err(BatchError::Full);
        }
        self.records.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn increment_sequence_counter(&self) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingFallback {
    pub chip: Mutex<Vec<(u64, u16)>>,
    pub swipe: Mutex<Vec<(u64, u16)>>,
}

impl ContactFallback for RecordingFallback {
    fn chip_transaction(&self, amount: u64, currency_code: u16) -> bool {
        self.chip.lock().unwrap().push((amount, currency_code));
        true
    }

    fn swipe_transaction(&self, amount: u64, currency_code: u16) -> bool {
        self.swipe.lock().unwrap().push((amount, currency_code));
        true
    }
}

/// Scanner that reports the cancel key shortly after it starts waiting
pub struct CancelKeyScanner {
    pub delay: Duration,
}

impl PeripheralScanner for CancelKeyScanner {
    fn latched(&self) -> Option<PeripheralEvent> {
        None
    }

    fn wait(&self, cancel: &CancelToken) -> Option<PeripheralEvent> {
        let start = Instant::now();
        while !cancel.is_cancelled() {
            if start.elapsed() >= self.delay {
                return Some(PeripheralEvent::CancelKey);
            }
            thread::sleep(Duration::from_millis(1));
        }
        None
    }
}

/// Scanner with an event already pending when the transaction starts
pub struct LatchedScanner(pub PeripheralEvent);

impl PeripheralScanner for LatchedScanner {
    fn latched(&self) -> Option<PeripheralEvent> {
        Some(self.0)
    }

    fn wait(&self, _: &CancelToken) -> Option<PeripheralEvent> {
        Some(self.0)
    }
}

/// Everything a resolver or session test needs
pub struct Harness {
    pub config: TerminalConfig,
    pub ihm: Arc<RecordingIhm>,
    pub pin: Arc<MockPin>,
    pub host: Arc<MockHost>,
    pub batch: Arc<CountingBatch>,
    pub fallback: Arc<RecordingFallback>,
    pub scanner: Option<Arc<dyn PeripheralScanner>>,
    pub driver: MockDriver,
}

impl Default for Harness {
    fn default() -> Self {
        Self {
            config: TerminalConfig::default(),
            ihm: Arc::new(RecordingIhm::default()),
            pin: Arc::new(MockPin::default()),
            host: Arc::new(MockHost::default()),
            batch: Arc::new(CountingBatch::default()),
            fallback: Arc::new(RecordingFallback::default()),
            scanner: None,
            driver: MockDriver::with_open_field(),
        }
    }
}

impl Harness {
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            ihm: self.ihm.clone(),
            pin: self.pin.clone(),
            host: self.host.clone(),
            batch: self.batch.clone(),
            fallback: self.fallback.clone(),
            scanner: self.scanner.clone(),
        }
    }

    pub fn sequence(&self) -> u32 {
        self.batch.sequence.load(Ordering::SeqCst)
    }

    pub fn batch_records(&self) -> u32 {
        self.batch.records.load(Ordering::SeqCst)
    }
}
