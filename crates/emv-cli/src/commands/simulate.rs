//! Run contactless transactions against the simulated kernel

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, ValueEnum};
#[cfg(feature = "pcsc")]
use emv_card::PcscDriver;
use emv_card::commands as apdu;
use emv_card::{ContactlessDriver, DriverError};
use emv_cless::{
    Collaborators, ContactlessSession, ExecutionMode, KernelStatus, PaymentKernel, PeripheralScanner,
    PinOutcome, TerminalConfig, TransactionReport,
};
use emv_common::{tags, ExchangeBuffer, ExchangeError, Tag};
use tracing::debug;

use crate::commands::display_tags;
use crate::formatters::FormatMode;
use crate::sim::{
    ConsoleFallback, ConsoleIhm, KernelScript, KeyScanner, MemoryBatch, ScriptedKernel,
    SimDriver, SimHost, SimulatedPin,
};

/// Capacity of the transaction buffer
const TRANSACTION_BUFFER_CAPACITY: usize = 4096;

/// Capacity of the entry point and AID parameter buffers
const PARAMETER_BUFFER_CAPACITY: usize = 256;

/// payWave AID used by the simulated card
const PAYWAVE_AID: [u8; 7] = [0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10];

/// Kernel status returned by the simulated kernel
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Outcome {
    OfflineApproved,
    OfflineDeclined,
    Online,
    CommunicationError,
    UseContact,
    RemoveAid,
    Mobile,
    InternalError,
    /// Kernel returns OK, which carries no disposition
    Unexpected,
}

impl Outcome {
    fn status(self) -> KernelStatus {
        match self {
            Outcome::OfflineApproved => KernelStatus::OfflineApproved,
            Outcome::OfflineDeclined => KernelStatus::OfflineDeclined,
            Outcome::Online => KernelStatus::OnlineAuthorisation,
            Outcome::CommunicationError => KernelStatus::CommunicationError,
            Outcome::UseContact => KernelStatus::UseContactInterface,
            Outcome::RemoveAid => KernelStatus::RemoveAid,
            Outcome::Mobile => KernelStatus::Mobile,
            Outcome::InternalError => KernelStatus::InternalError,
            Outcome::Unexpected => KernelStatus::Ok,
        }
    }

    /// Cryptogram Information Data matching the outcome
    fn cid(self) -> u8 {
        match self {
            Outcome::OfflineApproved => 0x40,
            Outcome::Online => 0x80,
            _ => 0x00,
        }
    }
}

/// Result of the simulated online PIN entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PinResult {
    Entered,
    Cancelled,
    Failed,
}

impl PinResult {
    fn outcome(self) -> PinOutcome {
        match self {
            PinResult::Entered => {
                PinOutcome::Entered(vec![0x7A, 0x4C, 0x19, 0xE2, 0x03, 0x5B, 0x88, 0xD1])
            }
            PinResult::Cancelled => PinOutcome::Cancelled,
            PinResult::Failed => PinOutcome::Failed,
        }
    }
}

#[derive(Args)]
pub struct SimulateArgs {
    /// Kernel status to simulate
    #[arg(short, long, value_enum, default_value_t = Outcome::OfflineApproved)]
    outcome: Outcome,

    /// Terminal configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Amount in minor units
    #[arg(short, long, default_value_t = 1000)]
    amount: u64,

    /// ISO 4217 numeric currency code
    #[arg(long, default_value_t = 978)]
    currency: u16,

    /// Contactless transaction limit of the AID, minor units
    #[arg(long, default_value_t = 5000)]
    limit: u64,

    /// Card Primary Account Number
    #[arg(long, default_value = "4761739001010010")]
    pan: String,

    /// Terminal Transaction Qualifiers, hex
    #[arg(long, default_value = "36208000")]
    ttq: String,

    /// Card Transaction Qualifiers, hex
    #[arg(long, default_value = "0040")]
    ctq: String,

    /// Authorisation response code returned by the host
    #[arg(long, default_value = "00")]
    host_code: String,

    /// Card requests online PIN
    #[arg(long)]
    pin: bool,

    /// Result of the online PIN entry
    #[arg(long, value_enum, default_value_t = PinResult::Entered)]
    pin_result: PinResult,

    /// Card requests a signature
    #[arg(long)]
    signature: bool,

    /// Answer merchant questions without prompting
    #[arg(long)]
    answer: Option<bool>,

    /// Refund transaction
    #[arg(long)]
    refund: bool,

    /// Host sends issuer scripts
    #[arg(long)]
    scripts: bool,

    /// Card is tapped again when the terminal asks for it
    #[arg(long)]
    represent: bool,

    /// Time the card spends in the kernel, in milliseconds
    #[arg(long, default_value_t = 0)]
    kernel_delay_ms: u64,

    /// Use the first PC/SC reader for card re-presentment
    #[cfg(feature = "pcsc")]
    #[arg(long)]
    pcsc: bool,

    /// Run the kernel on the calling thread, without keyboard scanning
    #[arg(long)]
    inline: bool,

    /// Enable kernel traces
    #[arg(long)]
    kernel_debug: bool,

    /// Number of transactions to run
    #[arg(short = 'n', long, default_value_t = 1)]
    transactions: u32,

    /// Output format for the transaction data
    #[arg(short, long, value_enum, default_value_t = FormatMode::Human)]
    format: FormatMode,
}

pub fn cmd_simulate(args: &SimulateArgs) {
    let mut config = match &args.config {
        Some(path) => match TerminalConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Invalid configuration: {}", e);
                return;
            }
        },
        None => TerminalConfig::default(),
    };
    if args.inline {
        config.execution = ExecutionMode::Inline;
    }

    let card = match CardData::parse(args) {
        Ok(card) => card,
        Err(e) => {
            eprintln!("{}", e);
            return;
        }
    };

    let kernel: Arc<dyn PaymentKernel> = Arc::new(ScriptedKernel::new(kernel_script(args, &card)));
    let batch = Arc::new(MemoryBatch::default());
    let services = Collaborators {
        ihm: Arc::new(ConsoleIhm {
            auto_answer: args.answer,
        }),
        pin: Arc::new(SimulatedPin {
            outcome: args.pin_result.outcome(),
        }),
        host: Arc::new(SimHost {
            response_code: card.host_code,
            scripts: args.scripts,
        }),
        batch: batch.clone(),
        fallback: Arc::new(ConsoleFallback),
        scanner: match config.execution {
            ExecutionMode::Forked => Some(Arc::new(KeyScanner) as Arc<dyn PeripheralScanner>),
            ExecutionMode::Inline => None,
        },
    };

    let driver = match open_driver(args) {
        Ok(driver) => driver,
        Err(e) => {
            eprintln!("Failed to open card reader: {}", e);
            return;
        }
    };

    let mut session = match ContactlessSession::from_config(config, kernel, driver, services) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Failed to start contactless session: {}", e);
            return;
        }
    };

    if args.kernel_debug {
        session.debug_activation(true);
    }

    println!("EMV Contactless Simulator - {} Mode", args.format.description());
    if session.config().execution == ExecutionMode::Forked {
        println!("Esc: cancel   i: insert chip card   s: swipe card   q: stop");
    }

    for n in 1..=args.transactions {
        println!("\n=== Transaction {} ===\n", n);

        let mut buffer = match build_transaction(&mut session, args, &card) {
            Ok(buffer) => buffer,
            Err(e) => {
                eprintln!("Failed to build transaction data: {}", e);
                return;
            }
        };

        let report = session.run_transaction(&mut buffer);

        println!("\nTransaction data:");
        display_tags(&buffer, args.format);
        print_report(&report);
    }

    println!(
        "\nBatch: {} transaction(s), sequence counter {}",
        batch.transaction_count(),
        batch.sequence_counter()
    );
}

#[cfg(feature = "pcsc")]
fn open_driver(args: &SimulateArgs) -> Result<Box<dyn ContactlessDriver>, DriverError> {
    if args.pcsc {
        let driver = PcscDriver::new()?;
        println!("Reader: {}", driver.reader_name());
        return Ok(Box::new(driver));
    }
    Ok(Box::new(SimDriver::new(args.represent)))
}

#[cfg(not(feature = "pcsc"))]
fn open_driver(args: &SimulateArgs) -> Result<Box<dyn ContactlessDriver>, DriverError> {
    Ok(Box::new(SimDriver::new(args.represent)))
}

/// Command line values converted to their wire form
struct CardData {
    pan: Vec<u8>,
    ttq: Vec<u8>,
    ctq: Vec<u8>,
    host_code: [u8; 2],
}

impl CardData {
    fn parse(args: &SimulateArgs) -> Result<Self, String> {
        let pan = pan_to_cn(&args.pan).ok_or_else(|| format!("Invalid PAN: {}", args.pan))?;
        let ttq = hex::decode(&args.ttq).map_err(|e| format!("Invalid TTQ: {}", e))?;
        if ttq.len() != 4 {
            return Err(format!("TTQ must be 4 bytes, got {}", ttq.len()));
        }
        let ctq = hex::decode(&args.ctq).map_err(|e| format!("Invalid CTQ: {}", e))?;
        let host_code = args
            .host_code
            .as_bytes()
            .try_into()
            .map_err(|_| format!("Response code must be two characters: {}", args.host_code))?;

        Ok(Self {
            pan,
            ttq,
            ctq,
            host_code,
        })
    }
}

fn kernel_script(args: &SimulateArgs, card: &CardData) -> KernelScript {
    let mut response: Vec<(Tag, Vec<u8>)> = vec![
        (tags::CARD_TRANSACTION_QUALIFIERS, card.ctq.clone()),
        (tags::CRYPTOGRAM_INFORMATION_DATA, vec![args.outcome.cid()]),
        (
            tags::APPLICATION_CRYPTOGRAM,
            vec![0x3F, 0x1D, 0x92, 0x07, 0xB5, 0x6E, 0xC4, 0x28],
        ),
        (tags::APPLICATION_TRANSACTION_COUNTER, vec![0x00, 0x2A]),
        (
            tags::AVAILABLE_OFFLINE_SPENDING_AMOUNT,
            to_bcd(args.limit.saturating_sub(args.amount), 6),
        ),
    ];
    if args.signature {
        response.push((tags::KERNEL_SIGNATURE_REQUESTED, vec![0x01]));
    }
    if args.pin {
        response.push((tags::KERNEL_ONLINE_PIN_REQUESTED, vec![0x01]));
    }
    if args.refund && args.outcome == Outcome::OfflineDeclined {
        response.push((tags::PAYWAVE_DECLINED_BY_CARD, vec![0x01]));
    }

    KernelScript {
        status: args.outcome.status(),
        response,
        aid: PAYWAVE_AID.to_vec(),
        pan: card.pan.clone(),
        pan_sequence_number: 1,
        ca_key_index: 0x92,
        processing_time: Duration::from_millis(args.kernel_delay_ms),
        script_result: vec![0x20, 0x00, 0x00, 0x00, 0x01],
    }
}

/// Entry point data for one transaction, with the AID parameters adjusted
fn build_transaction(
    session: &mut ContactlessSession,
    args: &SimulateArgs,
    card: &CardData,
) -> Result<ExchangeBuffer, ExchangeError> {
    let mut entry_point = ExchangeBuffer::with_capacity(PARAMETER_BUFFER_CAPACITY)?;
    entry_point.add_tag(tags::TERMINAL_TRANSACTION_QUALIFIERS, &card.ttq)?;

    let mut aid = ExchangeBuffer::with_capacity(PARAMETER_BUFFER_CAPACITY)?;
    aid.add_tag(tags::TERMINAL_TRANSACTION_QUALIFIERS, &card.ttq)?;
    aid.add_tag(tags::AID_OPTIONS, &[0x06])?;
    aid.add_tag(tags::CLESS_TRANSACTION_LIMIT, &to_bcd(args.limit, 6))?;

    let adjustment = session.adjust_aid_parameters(&mut entry_point, &mut aid, args.amount);
    if session.is_amount_over_limit() {
        println!(">> Amount over contactless limit, online cryptogram required");
    }
    debug!(adjustment = ?adjustment, "AID parameters adjusted");

    let mut buffer = ExchangeBuffer::with_capacity(TRANSACTION_BUFFER_CAPACITY)?;
    let transaction_type = if args.refund { 0x20 } else { 0x00 };
    buffer.add_tag(tags::TRANSACTION_TYPE, &[transaction_type])?;
    buffer.add_tag(tags::AMOUNT_AUTHORISED_NUMERIC, &to_bcd(args.amount, 6))?;
    buffer.add_tag(
        tags::AMOUNT_AUTHORISED_BINARY,
        &(args.amount.min(u64::from(u32::MAX)) as u32).to_be_bytes(),
    )?;
    buffer.add_tag(tags::TRANSACTION_CURRENCY_CODE, &to_bcd(u64::from(args.currency), 2))?;
    for (tag, value) in aid.records() {
        if tag != tags::AID_OPTIONS {
            buffer.add_tag(tag, value)?;
        }
    }

    let select = apdu::select(&PAYWAVE_AID).build();
    buffer.add_tag(tags::FINAL_SELECT_COMMAND_SENT, &select)?;

    Ok(buffer)
}

fn print_report(report: &TransactionReport) {
    println!("\nResult:");
    println!("  Kernel status: {:?}", report.kernel_status);
    println!("  Disposition:   {:?}", report.disposition);
    match report.decision {
        Some(decision) => println!("  Decision:      {:?}", decision),
        None => println!("  Decision:      none"),
    }
    if let Some(source) = report.interruption {
        println!("  Interrupted:   {:?}", source);
    }
    if let Some(failure) = report.pin_failure {
        println!("  PIN failure:   {:?}", failure);
    }
    if let Some(scripts) = report.scripts {
        println!("  Scripts:       {:?}", scripts);
    }
    if let Some(listed) = report.black_listed {
        println!("  Black listed:  {}", listed);
    }
    println!(
        "  Batch:         {}",
        if report.batch_recorded { "recorded" } else { "not recorded" }
    );
}

/// Right-aligned packed BCD on `len` bytes
fn to_bcd(mut value: u64, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    for byte in out.iter_mut().rev() {
        let low = (value % 10) as u8;
        value /= 10;
        let high = (value % 10) as u8;
        value /= 10;
        *byte = (high << 4) | low;
    }
    out
}

/// PAN digits as compressed numeric, padded with `F`
fn pan_to_cn(pan: &str) -> Option<Vec<u8>> {
    if pan.is_empty() || pan.len() > 19 || !pan.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let nibbles: Vec<u8> = pan.bytes().map(|b| b - b'0').collect();
    Some(
        nibbles
            .chunks(2)
            .map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0x0F))
            .collect(),
    )
}
