//! Buffer dumps
//!
//! Dumps go to the log, one event per record, so they follow the log
//! filter like everything else.

use emv_common::{get_tag_name, ExchangeBuffer};
use tracing::info;

/// Log every record of `buffer` under `title`
pub fn dump_buffer(title: &str, buffer: &ExchangeBuffer) {
    info!(title, records = buffer.records().count(), bytes = buffer.len(), "Buffer dump");
    for (tag, value) in buffer.records() {
        info!(
            title,
            tag = %tag,
            name = get_tag_name(tag),
            len = value.len(),
            value = %hex::encode_upper(value),
        );
    }
}
