//! Hardware-dependent integration tests
//!
//! These tests require a PC/SC reader and, for most of them, a contactless
//! Visa card. They are ignored by default and must be explicitly run with:
//!
//!     cargo test --package emv-card --features pcsc --test hardware_integration -- --ignored

use std::time::Duration;

use emv_card::apdu::commands;
use emv_card::{
    stop_card, wait_for_card, CardTechnology, ContactlessDriver, PcscDriver, Presentment,
    PresentmentPolicy, PresentmentPrompts,
};

const VISA_CREDIT: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10];

struct ConsolePrompts;

impl PresentmentPrompts for ConsolePrompts {
    fn represent_card(&self) {
        println!("Present card");
    }

    fn remove_card(&self) {
        println!("Remove card");
    }
}

/// Test that we can bind to a card reader
///
/// **Requires**: Card reader connected (card not required)
#[test]
#[ignore = "requires hardware: card reader"]
fn test_connect_to_reader() {
    let driver = PcscDriver::new().expect("Failed to connect to card reader. Is a reader connected?");
    let readers = driver.list_readers().expect("Failed to list readers");
    assert!(readers.contains(&driver.reader_name()));
}

/// Test that a card on the reader is detected and activated
///
/// **Requires**: Card on the reader
#[test]
#[ignore = "requires hardware: card on reader"]
fn test_detect_and_activate() {
    let mut driver = PcscDriver::new().expect("Failed to connect to reader");
    driver.open_field().unwrap();
    driver
        .detect_card(CardTechnology::TYPE_AB, Duration::from_secs(5))
        .expect("No card detected");
    driver.activate_card().expect("Card activation failed");
    stop_card(&mut driver);
    assert!(!driver.is_field_open());
}

/// Test the re-presentment wait against a real Visa card
///
/// **Requires**: Visa card presented within 20 seconds
#[test]
#[ignore = "requires hardware: Visa card"]
fn test_wait_for_visa_card() {
    let mut driver = PcscDriver::new().expect("Failed to connect to reader");
    let select = commands::select(VISA_CREDIT).build();
    let never = || false;

    let result = wait_for_card(
        &mut driver,
        &select,
        &ConsolePrompts,
        &never,
        PresentmentPolicy::default(),
    );
    stop_card(&mut driver);

    assert_eq!(result, Presentment::Found);
}
