//! Kernel customisation steps
//!
//! While a transaction runs the kernel calls back at the steps the terminal
//! asked to customise. Each callback gets the exchange buffer holding the
//! step input; the handler leaves the step output in the same buffer.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use emv_ca_keys::CaKeyStore;
use emv_common::{tags, ExchangeBuffer};
use tracing::{debug, warn};

use crate::black_list::{BlackList, VOID_PAN_SEQUENCE_NUMBER};
use crate::kernel::{KernelDirective, StepCustomiser};
use crate::services::Ihm;

/// payWave step identifiers
pub mod steps {
    pub const MSD_REMOVE_CARD: u8 = 0x10;
    pub const QVSDC_REMOVE_CARD: u8 = 0x11;
    pub const QVSDC_GET_CERTIFICATE: u8 = 0x12;
    pub const QVSDC_BLACK_LIST_CONTROL: u8 = 0x13;
}

/// A kernel callback point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomisationStep {
    /// Magnetic stripe profile card read, card can leave the field
    MsdRemoveCard,
    /// qVSDC card read, card can leave the field
    QvsdcRemoveCard,
    /// CA public key needed for offline data authentication
    QvsdcGetCertificate,
    /// PAN known, check the deny list
    QvsdcBlackListControl,
    Unknown(u8),
}

impl CustomisationStep {
    pub fn from_u8(step: u8) -> Self {
        match step {
            steps::MSD_REMOVE_CARD => Self::MsdRemoveCard,
            steps::QVSDC_REMOVE_CARD => Self::QvsdcRemoveCard,
            steps::QVSDC_GET_CERTIFICATE => Self::QvsdcGetCertificate,
            steps::QVSDC_BLACK_LIST_CONTROL => Self::QvsdcBlackListControl,
            other => Self::Unknown(other),
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Self::MsdRemoveCard => steps::MSD_REMOVE_CARD,
            Self::QvsdcRemoveCard => steps::QVSDC_REMOVE_CARD,
            Self::QvsdcGetCertificate => steps::QVSDC_GET_CERTIFICATE,
            Self::QvsdcBlackListControl => steps::QVSDC_BLACK_LIST_CONTROL,
            Self::Unknown(other) => other,
        }
    }
}

/// What a step handler needs from the terminal
pub struct StepContext<'a> {
    pub ca_keys: &'a CaKeyStore,
    pub black_list: &'a BlackList,
    pub ihm: &'a dyn Ihm,
}

/// Result of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    pub directive: KernelDirective,
    /// Deny list verdict, when the black-list step reached one
    pub black_listed: Option<bool>,
}

impl StepOutcome {
    fn proceed() -> Self {
        Self {
            directive: KernelDirective::Continue,
            black_listed: None,
        }
    }
}

/// Handle one customisation step
///
/// Input tags are read before the buffer is cleared for the step output.
pub fn dispatch(
    step: CustomisationStep,
    buffer: &mut ExchangeBuffer,
    ctx: &StepContext<'_>,
) -> StepOutcome {
    match step {
        CustomisationStep::MsdRemoveCard | CustomisationStep::QvsdcRemoveCard => {
            debug!(step = ?step, "Remove card");
            ctx.ihm.remove_card_sequence();
            buffer.clear();
            StepOutcome::proceed()
        }
        CustomisationStep::QvsdcGetCertificate => {
            supply_ca_key(buffer, ctx.ca_keys);
            StepOutcome::proceed()
        }
        CustomisationStep::QvsdcBlackListControl => StepOutcome {
            directive: KernelDirective::Continue,
            black_listed: check_black_list(buffer, ctx.black_list),
        },
        CustomisationStep::Unknown(id) => {
            debug!(step = id, "Unknown customisation step");
            StepOutcome::proceed()
        }
    }
}

fn supply_ca_key(buffer: &mut ExchangeBuffer, ca_keys: &CaKeyStore) {
    let index = buffer
        .find(tags::CA_PUBLIC_KEY_INDEX_CARD)
        .and_then(|v| v.first().copied())
        .unwrap_or(0);

    let mut rid = [0u8; 5];
    if let Some(aid) = buffer.find(tags::DF_NAME) {
        let n = aid.len().min(rid.len());
        rid[..n].copy_from_slice(&aid[..n]);
    }

    buffer.clear();

    let Some(key) = ca_keys.get(&rid, index) else {
        warn!(rid = %hex::encode_upper(rid), index, "CA public key not found");
        return;
    };

    let written = buffer
        .add_tag(tags::CA_PUBLIC_KEY_MODULUS, &key.modulus_bytes())
        .and_then(|()| buffer.add_tag(tags::CA_PUBLIC_KEY_EXPONENT, &key.exponent_bytes()));
    match written {
        Ok(()) => debug!(rid = %hex::encode_upper(rid), index, "CA public key supplied"),
        Err(e) => warn!(error = %e, "Unable to store CA public key"),
    }
}

fn check_black_list(buffer: &mut ExchangeBuffer, black_list: &BlackList) -> Option<bool> {
    let Some(pan) = buffer.find(tags::APPLICATION_PAN).map(<[u8]>::to_vec) else {
        debug!("PAN missing, black list not checked");
        return None;
    };
    let sequence_number = buffer
        .find(tags::APPLICATION_PAN_SEQUENCE_NUMBER)
        .and_then(|v| v.first().copied())
        .unwrap_or(VOID_PAN_SEQUENCE_NUMBER);

    buffer.clear();

    match black_list.check(&pan, sequence_number) {
        Ok(true) => match buffer.add_tag(tags::KERNEL_PAN_IN_BLACK_LIST, &[0x01]) {
            Ok(()) => {
                debug!("PAN in black list");
                Some(true)
            }
            Err(e) => {
                warn!(error = %e, "Unable to flag black-listed PAN");
                buffer.clear();
                None
            }
        },
        Ok(false) => Some(false),
        Err(e) => {
            warn!(error = %e, "Black list check failed");
            buffer.clear();
            None
        }
    }
}

/// Deny list verdict recorded by the kernel callback
///
/// The kernel cannot hand a return value back to the terminal, so the
/// callback leaves the verdict here for the resolver to pick up.
#[derive(Debug, Default)]
pub struct BlackListVerdict(AtomicU8);

impl BlackListVerdict {
    const UNKNOWN: u8 = 0;
    const CLEAR: u8 = 1;
    const LISTED: u8 = 2;

    pub fn record(&self, listed: bool) {
        let value = if listed { Self::LISTED } else { Self::CLEAR };
        self.0.store(value, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(Self::UNKNOWN, Ordering::SeqCst);
    }

    /// `None` until the black-list step reached a verdict
    pub fn get(&self) -> Option<bool> {
        match self.0.load(Ordering::SeqCst) {
            Self::LISTED => Some(true),
            Self::CLEAR => Some(false),
            _ => None,
        }
    }
}

/// The customisation callback handed to the kernel
#[derive(Clone)]
pub struct Customiser {
    ca_keys: Arc<CaKeyStore>,
    black_list: Arc<BlackList>,
    ihm: Arc<dyn Ihm>,
    verdict: Arc<BlackListVerdict>,
}

impl Customiser {
    pub fn new(ca_keys: Arc<CaKeyStore>, black_list: Arc<BlackList>, ihm: Arc<dyn Ihm>) -> Self {
        Self {
            ca_keys,
            black_list,
            ihm,
            verdict: Arc::new(BlackListVerdict::default()),
        }
    }

    pub fn verdict(&self) -> &BlackListVerdict {
        &self.verdict
    }

    pub fn black_list(&self) -> &BlackList {
        &self.black_list
    }
}

impl StepCustomiser for Customiser {
    fn customise_step(&self, buffer: &mut ExchangeBuffer, step: u8) -> KernelDirective {
        let ctx = StepContext {
            ca_keys: &self.ca_keys,
            black_list: &self.black_list,
            ihm: self.ihm.as_ref(),
        };
        let outcome = dispatch(CustomisationStep::from_u8(step), buffer, &ctx);
        if let Some(listed) = outcome.black_listed {
            self.verdict.record(listed);
        }
        outcome.directive
    }
}
