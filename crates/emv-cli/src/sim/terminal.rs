//! Console implementations of the terminal services

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use emv_cless::{
    Batch, BatchError, ContactFallback, HostError, Ihm, InterruptSource, Notice, OnlineHost,
    PinEntry, PinOutcome, PinRequest, Question,
};
use emv_common::{tags, ExchangeBuffer, Tag};
use tracing::info;

/// Display and merchant prompts on stdout
pub struct ConsoleIhm {
    /// Answer every question with this instead of reading stdin
    pub auto_answer: Option<bool>,
}

impl ConsoleIhm {
    fn message(notice: &Notice) -> String {
        match notice {
            Notice::Approved { online, .. } => {
                format!("APPROVED ({})", if *online { "online" } else { "offline" })
            }
            Notice::Declined { online } => {
                format!("DECLINED ({})", if *online { "online" } else { "offline" })
            }
            Notice::AvailableAmount(Some(amount)) => {
                format!("Available amount: {}.{:02}", amount / 100, amount % 100)
            }
            Notice::AvailableAmount(None) => "Available amount: unknown".to_string(),
            Notice::SignatureRequired => "Signature required".to_string(),
            Notice::SignatureAccepted => "Signature accepted".to_string(),
            Notice::SignatureRejected => "Signature rejected".to_string(),
            Notice::OnlineProcessing => "Online request in progress...".to_string(),
            Notice::PinCancelled => "PIN entry cancelled".to_string(),
            Notice::PinError => "PIN entry error".to_string(),
            Notice::PhoneInstructions => "See phone for instructions".to_string(),
            Notice::StatusError => "Unexpected kernel status".to_string(),
            Notice::TransactionError => "Transaction error".to_string(),
            Notice::Interrupted(source) => match source {
                InterruptSource::Keyboard => "Transaction cancelled".to_string(),
                InterruptSource::ChipCard => "Chip card inserted".to_string(),
                InterruptSource::Swipe => "Card swiped".to_string(),
                InterruptSource::UserEvent | InterruptSource::Unspecified => {
                    "Transaction interrupted".to_string()
                }
            },
            Notice::BatchError => "Unable to store transaction".to_string(),
        }
    }
}

impl Ihm for ConsoleIhm {
    fn notify(&self, notice: Notice) {
        println!(">> {}", Self::message(&notice));
    }

    fn remove_card_sequence(&self) {
        println!(">> Remove card");
    }

    fn represent_card_sequence(&self) {
        println!(">> Present card again");
    }

    fn ask(&self, question: Question) -> bool {
        let prompt = match question {
            Question::SignatureOk => "Signature OK?",
            Question::PrintTransactionLog => "Print card transaction log?",
        };

        if let Some(answer) = self.auto_answer {
            println!("?? {} {}", prompt, if answer { "yes" } else { "no" });
            return answer;
        }

        print!("?? {} [y/N] ", prompt);
        let _ = io::stdout().flush();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(_) => matches!(line.trim(), "y" | "Y" | "yes"),
            Err(_) => false,
        }
    }
}

/// PIN pad that always gives the same answer
pub struct SimulatedPin {
    pub outcome: PinOutcome,
}

impl PinEntry for SimulatedPin {
    fn online_pin(&self, request: &PinRequest<'_>) -> PinOutcome {
        println!(
            ">> Enter PIN (amount {}.{:02})",
            request.amount / 100,
            request.amount % 100
        );
        self.outcome.clone()
    }
}

/// Issuer host answering with a fixed response code
pub struct SimHost {
    pub response_code: [u8; 2],
    /// Add issuer authentication data and one script of each template
    pub scripts: bool,
}

impl SimHost {
    fn response(&self) -> Vec<(Tag, Vec<u8>)> {
        let mut records = vec![(tags::AUTHORISATION_RESPONSE_CODE, self.response_code.to_vec())];
        if self.scripts {
            records.push((
                tags::ISSUER_AUTHENTICATION_DATA,
                vec![0x9A, 0x2C, 0x61, 0x07, 0xE4, 0x5D, 0x10, 0x3B, 0x30, 0x30],
            ));
            // Script identifier then one PIN UNBLOCK command
            let command = [0x9F, 0x18, 0x04, 0x00, 0x00, 0x00, 0x01, 0x86, 0x05, 0x84, 0x24, 0x00, 0x00, 0x00];
            records.push((tags::ISSUER_SCRIPT_TEMPLATE_1, command.to_vec()));
            records.push((tags::ISSUER_SCRIPT_TEMPLATE_2, command.to_vec()));
        }
        records
    }
}

impl OnlineHost for SimHost {
    fn authorise(&self, buffer: &mut ExchangeBuffer) -> Result<(), HostError> {
        let pin = buffer.contains(tags::ENCIPHERED_PIN_CODE);
        info!(
            response_code = %String::from_utf8_lossy(&self.response_code),
            online_pin = pin,
            "Host authorisation"
        );

        for (tag, value) in self.response() {
            buffer
                .add_tag(tag, &value)
                .map_err(|e| HostError::MalformedResponse(e.to_string()))?;
        }
        Ok(())
    }
}

/// Batch kept in memory for the lifetime of the process
#[derive(Default)]
pub struct MemoryBatch {
    records: Mutex<Vec<Vec<u8>>>,
    sequence: AtomicU32,
}

impl MemoryBatch {
    pub fn transaction_count(&self) -> usize {
        self.records.lock().map_or(0, |records| records.len())
    }

    pub fn sequence_counter(&self) -> u32 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl Batch for MemoryBatch {
    fn add_transaction(&self, buffer: &ExchangeBuffer) -> Result<(), BatchError> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| BatchError::Storage(e.to_string()))?;
        records.push(buffer.as_bytes().to_vec());
        Ok(())
    }

    fn increment_sequence_counter(&self) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
    }
}

/// Contact interfaces, reported but not run
pub struct ConsoleFallback;

impl ContactFallback for ConsoleFallback {
    fn chip_transaction(&self, amount: u64, currency_code: u16) -> bool {
        println!(
            ">> Chip transaction for {}.{:02} (currency {:03})",
            amount / 100,
            amount % 100,
            currency_code
        );
        true
    }

    fn swipe_transaction(&self, amount: u64, currency_code: u16) -> bool {
        println!(
            ">> Swipe transaction for {}.{:02} (currency {:03})",
            amount / 100,
            amount % 100,
            currency_code
        );
        true
    }
}
