//! Card transaction log and kernel debug settings

use emv_common::{tags, ExchangeBuffer};
use tracing::{debug, warn};

use crate::dump::dump_buffer;
use crate::kernel::{KernelStatus, PaymentKernel};
use crate::services::{Ihm, Question};

/// Capacity of buffers filled from the kernel database
pub const KERNEL_DATA_CAPACITY: usize = 4096;

/// Capacity of the debug settings buffer
pub const DEBUG_BUFFER_CAPACITY: usize = 256;

/// Debug mask bits understood by the kernel
pub mod debug_mask {
    pub const TRACES: u8 = 0x01;
    pub const APDU: u8 = 0x02;
    pub const TIMERS: u8 = 0x04;
}

/// Fetch the card transaction log and print it if the merchant asks
///
/// Returns `true` if the kernel returned any log data.
pub fn manage_transaction_log(kernel: &dyn PaymentKernel, ihm: &dyn Ihm) -> bool {
    let mut buffer = match ExchangeBuffer::with_capacity(KERNEL_DATA_CAPACITY) {
        Ok(buffer) => buffer,
        Err(e) => {
            warn!(error = %e, "Unable to allocate transaction log buffer");
            return false;
        }
    };

    let requested = buffer
        .request_tag(tags::LOG_FORMAT)
        .and_then(|()| buffer.request_tag(tags::PAYWAVE_TRANSACTION_LOG_RECORD));
    if let Err(e) = requested {
        warn!(error = %e, "Unable to request transaction log");
        return false;
    }

    let status = kernel.get_data(&mut buffer);
    if status != KernelStatus::Ok {
        debug!(status = ?status, "Transaction log not available");
    }

    let available = buffer.records().any(|(_, value)| !value.is_empty());
    if available && ihm.ask(Question::PrintTransactionLog) {
        dump_buffer("Transaction Log", &buffer);
    }
    available
}

/// Dump the whole kernel database to the log
pub fn dump_database(kernel: &dyn PaymentKernel) {
    let mut buffer = match ExchangeBuffer::with_capacity(KERNEL_DATA_CAPACITY) {
        Ok(buffer) => buffer,
        Err(e) => {
            warn!(error = %e, "Unable to allocate database buffer");
            return;
        }
    };

    let status = kernel.get_all_data(&mut buffer);
    if status != KernelStatus::Ok {
        debug!(status = ?status, "Kernel database incomplete");
    }
    dump_buffer("Kernel Database", &buffer);
}

/// Switch the kernel debug features on or off
pub fn debug_activation(kernel: &dyn PaymentKernel, enabled: bool) {
    let mode = if enabled {
        debug_mask::TRACES | debug_mask::APDU | debug_mask::TIMERS
    } else {
        0x00
    };

    let mut buffer = match ExchangeBuffer::with_capacity(DEBUG_BUFFER_CAPACITY) {
        Ok(buffer) => buffer,
        Err(e) => {
            warn!(error = %e, "Unable to allocate debug buffer");
            return;
        }
    };

    if let Err(e) = buffer.add_tag(tags::KERNEL_DEBUG_ACTIVATION, &[mode]) {
        warn!(error = %e, "Unable to add debug activation");
        return;
    }

    let status = kernel.debug_management(&mut buffer);
    if status != KernelStatus::Ok {
        warn!(status = ?status, "Kernel debug activation failed");
    }
}
