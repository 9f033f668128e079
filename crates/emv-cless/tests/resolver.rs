//! Outcome resolution against scripted collaborators

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{buffer_with, CountingBatch, Harness, MockHost, MockKernel, MockPin, RecordingIhm, PAN, SELECT};
use emv_cless::{
    Decision, Disposition, HostError, InterruptSource, KernelStatus, Notice, PinFailure,
    PinOutcome, Question, Resolver, ScriptOutcome, TransactionReport,
};
use emv_common::{tags, ExchangeBuffer};
use rstest::rstest;

const AMOUNT_NUMERIC: &[u8] = &[0x00, 0x00, 0x00, 0x00, 0x12, 0x34];

fn resolve(
    harness: &Harness,
    kernel: &MockKernel,
    status: KernelStatus,
    interruption: Option<InterruptSource>,
    buffer: &mut ExchangeBuffer,
) -> TransactionReport {
    let services = harness.collaborators();
    let mut driver = harness.driver.clone();
    Resolver {
        config: &harness.config,
        kernel,
        driver: &mut driver,
        services: &services,
    }
    .resolve(status, interruption, buffer)
}

#[test]
fn test_refund_declined_by_card_is_approved() {
    let harness = Harness::default();
    let kernel = MockKernel::default();
    let mut buffer = buffer_with(&[
        (tags::TRANSACTION_TYPE, &[0x20]),
        (tags::PAYWAVE_DECLINED_BY_CARD, &[0x01]),
    ]);

    let report = resolve(&harness, &kernel, KernelStatus::OfflineDeclined, None, &mut buffer);

    assert_eq!(report.kernel_status, KernelStatus::OfflineApproved);
    assert_eq!(report.decision, Some(Decision::Approved { online: false }));
    assert!(report.marked_for_batch);
    assert!(report.batch_recorded);
    assert_eq!(harness.batch_records(), 1);
    assert_eq!(kernel.calls("get_all_data"), 1);
}

#[test]
fn test_refund_without_declined_marker_stays_declined() {
    let harness = Harness::default();
    let kernel = MockKernel::default();
    let mut buffer = buffer_with(&[(tags::TRANSACTION_TYPE, &[0x20])]);

    let report = resolve(&harness, &kernel, KernelStatus::OfflineDeclined, None, &mut buffer);

    assert_eq!(report.decision, Some(Decision::Declined { online: false }));
    assert!(!report.marked_for_batch);
    assert!(harness.ihm.saw(&Notice::Declined { online: false }));
    assert_eq!(harness.batch_records(), 0);
    assert_eq!(harness.sequence(), 1);
}

#[test]
fn test_offline_approved_end_to_end() {
    let harness = Harness::default();
    let kernel = MockKernel::default();
    let mut buffer = buffer_with(&[(tags::AMOUNT_AUTHORISED_BINARY, &[0x00, 0x00, 0x04, 0xD2])]);

    let report = resolve(&harness, &kernel, KernelStatus::OfflineApproved, None, &mut buffer);

    assert_eq!(report.disposition, Disposition::End);
    assert_eq!(report.decision, Some(Decision::Approved { online: false }));
    assert!(report.marked_for_batch);
    assert!(report.sequence_counter_incremented);
    assert_eq!(harness.sequence(), 1);
    assert_eq!(harness.batch_records(), 1);
    assert!(harness.ihm.saw(&Notice::Approved {
        online: false,
        with_available_amount: true
    }));
    // The field is closed before the result is shown
    assert!(!harness.driver.log().field_open);
    assert_eq!(kernel.calls("get_data"), 1);
}

#[test]
fn test_signature_rejected_declines() {
    let harness = Harness {
        ihm: Arc::new(RecordingIhm {
            signature_ok: false,
            ..RecordingIhm::default()
        }),
        ..Harness::default()
    };
    let kernel = MockKernel::default();
    let mut buffer = buffer_with(&[(tags::KERNEL_SIGNATURE_REQUESTED, &[0x01])]);

    let report = resolve(&harness, &kernel, KernelStatus::OfflineApproved, None, &mut buffer);

    assert_eq!(report.decision, Some(Decision::Declined { online: false }));
    assert!(!report.marked_for_batch);
    assert_eq!(
        harness.ihm.notices(),
        vec![Notice::SignatureRequired, Notice::SignatureRejected]
    );
    assert_eq!(harness.sequence(), 1);
}

#[test]
fn test_signature_accepted_automatically_in_loop_mode() {
    let mut harness = Harness::default();
    harness.config.loop_mode = true;
    let kernel = MockKernel::default();
    let mut buffer = buffer_with(&[(tags::KERNEL_SIGNATURE_REQUESTED, &[0x01])]);

    let report = resolve(&harness, &kernel, KernelStatus::OfflineApproved, None, &mut buffer);

    assert_eq!(report.decision, Some(Decision::Approved { online: false }));
    assert!(report.marked_for_batch);
    assert!(harness.ihm.saw(&Notice::SignatureAccepted));
    assert!(!harness.ihm.questions.lock().unwrap().contains(&Question::SignatureOk));
    // No transaction log prompt in loop mode
    assert_eq!(kernel.calls("get_data"), 0);
}

#[test]
fn test_online_pin_without_pan_declines_locally() {
    let harness = Harness::default();
    let kernel = MockKernel::default();
    let mut buffer = buffer_with(&[
        (tags::KERNEL_ONLINE_PIN_REQUESTED, &[0x01]),
        (tags::AMOUNT_AUTHORISED_NUMERIC, AMOUNT_NUMERIC),
    ]);

    let report = resolve(&harness, &kernel, KernelStatus::OnlineAuthorisation, None, &mut buffer);

    assert_eq!(report.pin_failure, Some(PinFailure::MissingPan));
    assert_eq!(report.decision, Some(Decision::Declined { online: true }));
    assert_eq!(report.disposition, Disposition::End);
    assert!(!report.online_authorisation_attempted);
    assert_eq!(harness.host.calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.pin.requests.load(Ordering::SeqCst), 0);
    assert!(harness.ihm.saw(&Notice::PinError));
    assert!(!harness.ihm.saw(&Notice::Declined { online: true }));
}

#[test]
fn test_online_pin_without_amount_declines_locally() {
    let harness = Harness::default();
    let kernel = MockKernel::default();
    let mut buffer = buffer_with(&[
        (tags::KERNEL_ONLINE_PIN_REQUESTED, &[0x01]),
        (tags::APPLICATION_PAN, PAN),
    ]);

    let report = resolve(&harness, &kernel, KernelStatus::OnlineAuthorisation, None, &mut buffer);

    assert_eq!(report.pin_failure, Some(PinFailure::MissingAmount));
    assert_eq!(harness.host.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_online_pin_cancelled() {
    let harness = Harness {
        pin: Arc::new(MockPin {
            outcome: PinOutcome::Cancelled,
            ..MockPin::default()
        }),
        ..Harness::default()
    };
    let kernel = MockKernel::default();
    let mut buffer = buffer_with(&[
        (tags::KERNEL_ONLINE_PIN_REQUESTED, &[0x01]),
        (tags::APPLICATION_PAN, PAN),
        (tags::AMOUNT_AUTHORISED_NUMERIC, AMOUNT_NUMERIC),
    ]);

    let report = resolve(&harness, &kernel, KernelStatus::OnlineAuthorisation, None, &mut buffer);

    assert_eq!(report.pin_failure, Some(PinFailure::Cancelled));
    assert!(harness.ihm.saw(&Notice::PinCancelled));
    assert_eq!(harness.host.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_online_pin_requested_forces_online() {
    let harness = Harness {
        host: Arc::new(MockHost::answering(b"00")),
        ..Harness::default()
    };
    let kernel = MockKernel::default();
    let mut buffer = buffer_with(&[
        (tags::KERNEL_ONLINE_PIN_REQUESTED, &[0x01]),
        (tags::APPLICATION_PAN, PAN),
        (tags::AMOUNT_AUTHORISED_NUMERIC, AMOUNT_NUMERIC),
    ]);

    let report = resolve(&harness, &kernel, KernelStatus::OfflineApproved, None, &mut buffer);

    assert_eq!(report.kernel_status, KernelStatus::OnlineAuthorisation);
    assert_eq!(report.pin_failure, None);
    assert!(report.online_authorisation_attempted);
    assert!(buffer.contains(tags::ENCIPHERED_PIN_CODE));
    assert_eq!(report.decision, Some(Decision::Approved { online: true }));
    assert_eq!(report.scripts, Some(ScriptOutcome::NothingToDeliver));
    assert!(harness.ihm.saw(&Notice::Approved {
        online: true,
        with_available_amount: true
    }));
}

#[rstest]
#[case::declined_code(MockHost::answering(b"05"))]
#[case::no_response_code(MockHost::default())]
#[case::unreachable(MockHost { error: Some(HostError::Timeout), ..MockHost::default() })]
fn test_online_not_approved(#[case] host: MockHost) {
    let harness = Harness {
        host: Arc::new(host),
        ..Harness::default()
    };
    let kernel = MockKernel::default();
    let mut buffer = buffer_with(&[]);

    let report = resolve(&harness, &kernel, KernelStatus::OnlineAuthorisation, None, &mut buffer);

    assert!(report.online_authorisation_attempted);
    assert_eq!(report.decision, Some(Decision::Declined { online: true }));
    assert_eq!(report.scripts, None);
    assert!(!report.marked_for_batch);
    assert!(harness.ihm.saw(&Notice::OnlineProcessing));
    assert!(harness.ihm.saw(&Notice::Declined { online: true }));
}

fn script_host() -> MockHost {
    MockHost {
        response: vec![
            (tags::AUTHORISATION_RESPONSE_CODE, b"00".to_vec()),
            (tags::ISSUER_AUTHENTICATION_DATA, vec![0x11; 10]),
            (tags::ISSUER_SCRIPT_TEMPLATE_1, vec![0x86, 0x02, 0xAA, 0xBB]),
        ],
        ..MockHost::default()
    }
}

fn script_kernel(ctq: &[u8]) -> MockKernel {
    MockKernel {
        database: vec![
            (tags::TERMINAL_TRANSACTION_QUALIFIERS, vec![0x20, 0x00, 0x80, 0x00]),
            (tags::CARD_TRANSACTION_QUALIFIERS, ctq.to_vec()),
            (tags::FINAL_SELECT_COMMAND_SENT, SELECT.to_vec()),
        ],
        script_result: Some(vec![0x20, 0x00, 0x00, 0x00, 0x00]),
        ..MockKernel::default()
    }
}

#[test]
fn test_online_approved_delivers_issuer_scripts() {
    let harness = Harness {
        host: Arc::new(script_host()),
        ..Harness::default()
    };
    harness.driver.log().card_present = true;
    let kernel = script_kernel(&[0x00, 0x40]);
    let mut buffer = buffer_with(&[]);

    let report = resolve(&harness, &kernel, KernelStatus::OnlineAuthorisation, None, &mut buffer);

    assert_eq!(
        report.scripts,
        Some(ScriptOutcome::Executed {
            status: KernelStatus::Ok
        })
    );
    assert!(report.scripts_executed());
    assert_eq!(
        buffer.find(tags::PAYWAVE_ISSUER_SCRIPT_RESULT),
        Some(&[0x20, 0x00, 0x00, 0x00, 0x00][..])
    );
    assert_eq!(harness.driver.log().commands, vec![SELECT.to_vec()]);
    assert_eq!(kernel.calls("after_transaction"), 1);
    assert_eq!(report.decision, Some(Decision::Approved { online: true }));
    assert!(harness.ihm.saw(&Notice::Approved {
        online: true,
        with_available_amount: false
    }));
    assert_eq!(harness.batch_records(), 1);
    assert!(!harness.driver.log().field_open);
}

#[test]
fn test_issuer_scripts_need_card_permission() {
    let harness = Harness {
        host: Arc::new(script_host()),
        ..Harness::default()
    };
    harness.driver.log().card_present = true;
    let kernel = script_kernel(&[0x00, 0x00]);
    let mut buffer = buffer_with(&[]);

    let report = resolve(&harness, &kernel, KernelStatus::OnlineAuthorisation, None, &mut buffer);

    assert_eq!(report.scripts, Some(ScriptOutcome::NotEligible));
    assert_eq!(kernel.calls("after_transaction"), 0);
    assert!(harness.driver.log().commands.is_empty());
    // Still an approval; scripts do not decide the transaction
    assert_eq!(report.decision, Some(Decision::Approved { online: true }));
}

#[test]
fn test_issuer_scripts_card_not_presented() {
    let harness = Harness {
        host: Arc::new(script_host()),
        ..Harness::default()
    };
    let kernel = script_kernel(&[0x00, 0x40]);
    let mut buffer = buffer_with(&[]);

    let report = resolve(&harness, &kernel, KernelStatus::OnlineAuthorisation, None, &mut buffer);

    assert_eq!(report.scripts, Some(ScriptOutcome::CardNotPresented));
    assert_eq!(kernel.calls("after_transaction"), 0);
    assert!(!buffer.contains(tags::PAYWAVE_ISSUER_SCRIPT_RESULT));
    assert!(harness.ihm.saw(&Notice::Approved {
        online: true,
        with_available_amount: true
    }));
}

#[rstest]
#[case::contact_interface(KernelStatus::UseContactInterface, Disposition::RestartWithoutContactless, 1)]
#[case::communication_error(KernelStatus::CommunicationError, Disposition::Restart, 0)]
#[case::remove_aid(KernelStatus::RemoveAid, Disposition::RemoveAid, 0)]
#[case::internal_error(KernelStatus::InternalError, Disposition::End, 1)]
#[case::ok_without_disposition(KernelStatus::Ok, Disposition::End, 1)]
#[case::unknown(KernelStatus::Other(0x1234), Disposition::End, 1)]
fn test_status_dispositions(
    #[case] status: KernelStatus,
    #[case] expected: Disposition,
    #[case] sequence: u32,
) {
    let harness = Harness::default();
    let kernel = MockKernel::default();
    let mut buffer = buffer_with(&[]);

    let report = resolve(&harness, &kernel, status, None, &mut buffer);

    assert_eq!(report.disposition, expected);
    assert_eq!(harness.sequence(), sequence);
    assert_eq!(report.sequence_counter_incremented, sequence == 1);
    assert!(!report.marked_for_batch);
}

#[rstest]
#[case::error_ends(KernelStatus::Ok, 1)]
#[case::restart(KernelStatus::CommunicationError, 1)]
#[case::contact_interface(KernelStatus::UseContactInterface, 0)]
#[case::remove_aid(KernelStatus::RemoveAid, 0)]
fn test_field_left_for_next_attempt(#[case] status: KernelStatus, #[case] deselects: u32) {
    let harness = Harness::default();
    let kernel = MockKernel::default();
    let mut buffer = buffer_with(&[]);

    resolve(&harness, &kernel, status, None, &mut buffer);

    assert_eq!(harness.driver.log().deselects, deselects);
}

#[test]
fn test_generic_error_shown() {
    let harness = Harness::default();
    let kernel = MockKernel::default();
    let mut buffer = buffer_with(&[]);

    let report = resolve(&harness, &kernel, KernelStatus::InternalError, None, &mut buffer);

    assert_eq!(report.decision, Some(Decision::Error));
    assert_eq!(harness.ihm.notices(), vec![Notice::TransactionError]);
}

#[test]
fn test_alternate_region_restarts_silently() {
    let mut harness = Harness::default();
    harness.config.alternate_region_mode = true;
    let kernel = MockKernel::default();
    let mut buffer = buffer_with(&[]);

    let report = resolve(&harness, &kernel, KernelStatus::InternalError, None, &mut buffer);

    assert_eq!(report.disposition, Disposition::RestartWithoutContactless);
    assert!(harness.ihm.notices().is_empty());
}

#[rstest]
#[case::qvsdc(Some(vec![0x20, 0x00, 0x00, 0x00]), Disposition::RestartDoubleTap, Some(Notice::PhoneInstructions))]
#[case::msd_only(Some(vec![0x80, 0x00, 0x00, 0x00]), Disposition::End, Some(Notice::StatusError))]
#[case::no_ttq(None, Disposition::RestartDoubleTap, None)]
fn test_mobile(
    #[case] ttq: Option<Vec<u8>>,
    #[case] expected: Disposition,
    #[case] notice: Option<Notice>,
) {
    let harness = Harness::default();
    let kernel = MockKernel::default();
    let mut buffer = ExchangeBuffer::with_capacity(64).unwrap();
    if let Some(ttq) = &ttq {
        buffer.add_tag(tags::TERMINAL_TRANSACTION_QUALIFIERS, ttq).unwrap();
    }

    let report = resolve(&harness, &kernel, KernelStatus::Mobile, None, &mut buffer);

    assert_eq!(report.disposition, expected);
    assert_eq!(harness.ihm.notices(), notice.into_iter().collect::<Vec<_>>());
}

#[test]
fn test_mobile_closes_field_except_in_asia_mode() {
    let ttq = [0x20, 0x00, 0x00, 0x00];

    let harness = Harness::default();
    let mut buffer = buffer_with(&[(tags::TERMINAL_TRANSACTION_QUALIFIERS, &ttq)]);
    resolve(&harness, &MockKernel::default(), KernelStatus::Mobile, None, &mut buffer);
    assert!(!harness.driver.log().field_open);

    let mut harness = Harness::default();
    harness.config.asia_gui_mode = true;
    let mut buffer = buffer_with(&[(tags::TERMINAL_TRANSACTION_QUALIFIERS, &ttq)]);
    resolve(&harness, &MockKernel::default(), KernelStatus::Mobile, None, &mut buffer);
    assert!(harness.driver.log().field_open);
    assert_eq!(harness.driver.log().deselects, 0);
}

#[rstest]
#[case::keyboard(Some(InterruptSource::Keyboard), vec![Notice::Interrupted(InterruptSource::Keyboard)])]
#[case::user_event(Some(InterruptSource::UserEvent), vec![Notice::Interrupted(InterruptSource::UserEvent)])]
#[case::unspecified(None, vec![Notice::Interrupted(InterruptSource::Unspecified), Notice::TransactionError])]
fn test_interrupted_notices(
    #[case] interruption: Option<InterruptSource>,
    #[case] notices: Vec<Notice>,
) {
    let harness = Harness::default();
    let kernel = MockKernel::default();
    let mut buffer = buffer_with(&[]);

    let report = resolve(&harness, &kernel, KernelStatus::Stopped, interruption, &mut buffer);

    assert_eq!(harness.ihm.notices(), notices);
    assert_eq!(
        report.decision,
        Some(Decision::Interrupted(
            interruption.unwrap_or(InterruptSource::Unspecified)
        ))
    );
    assert!(!report.marked_for_batch);
}

#[test]
fn test_chip_inserted_starts_contact_transaction() {
    let harness = Harness::default();
    let kernel = MockKernel::default();
    let mut buffer = buffer_with(&[
        (tags::AMOUNT_AUTHORISED_BINARY, &[0x00, 0x00, 0x04, 0xD2]),
        (tags::TRANSACTION_CURRENCY_CODE, &[0x09, 0x78]),
    ]);

    let report = resolve(
        &harness,
        &kernel,
        KernelStatus::Stopped,
        Some(InterruptSource::ChipCard),
        &mut buffer,
    );

    assert_eq!(*harness.fallback.chip.lock().unwrap(), vec![(1234, 978)]);
    assert!(harness.fallback.swipe.lock().unwrap().is_empty());
    assert!(harness.ihm.notices().is_empty());
    assert_eq!(report.decision, Some(Decision::Interrupted(InterruptSource::ChipCard)));
}

#[test]
fn test_batch_failure_is_reported() {
    let harness = Harness {
        batch: Arc::new(CountingBatch {
            fail: true,
            ..CountingBatch::default()
        }),
        ..Harness::default()
    };
    let kernel = MockKernel::default();
    let mut buffer = buffer_with(&[]);

    let report = resolve(&harness, &kernel, KernelStatus::OfflineApproved, None, &mut buffer);

    assert!(report.marked_for_batch);
    assert!(!report.batch_recorded);
    assert!(harness.ihm.saw(&Notice::BatchError));
    assert_eq!(harness.sequence(), 1);
}

#[test]
fn test_database_dump_reads_kernel_data() {
    let mut harness = Harness::default();
    harness.config.dump_database = true;
    let kernel = MockKernel::default();

    resolve(&harness, &kernel, KernelStatus::OfflineDeclined, None, &mut buffer_with(&[]));
    assert_eq!(kernel.calls("get_all_data"), 1);

    resolve(&harness, &kernel, KernelStatus::CommunicationError, None, &mut buffer_with(&[]));
    assert_eq!(kernel.calls("get_all_data"), 1);
}
